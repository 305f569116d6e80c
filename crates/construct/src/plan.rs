//! A synthesized plan: resources, their creation order, and outputs.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map, Value};

use crate::resources::{Resource, ResourceType};
use crate::{ConstructError, EnvValue, LogicalId, StackContext};

/// Resources and outputs synthesized for one stack.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    stack: StackContext,
    resources: Vec<Resource>,
    outputs: BTreeMap<String, EnvValue>,
}

impl Plan {
    /// Creates an empty plan for `stack`.
    pub fn new(stack: StackContext) -> Self {
        Self {
            stack,
            resources: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// The stack this plan belongs to.
    pub fn stack(&self) -> &StackContext {
        &self.stack
    }

    /// Appends a resource. Logical ids must be unique.
    pub fn add(&mut self, resource: Resource) -> Result<(), ConstructError> {
        if self.get(&resource.logical_id).is_some() {
            return Err(ConstructError::DuplicateLogicalId {
                id: resource.logical_id,
            });
        }
        self.resources.push(resource);
        Ok(())
    }

    /// Declares a named output.
    pub fn add_output(&mut self, name: impl Into<String>, value: impl Into<EnvValue>) {
        self.outputs.insert(name.into(), value.into());
    }

    /// Looks up a resource by logical id.
    pub fn get(&self, id: &LogicalId) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.logical_id == id)
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Resources of one type, in declaration order.
    pub fn of_type(&self, ty: ResourceType) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.resource_type() == ty)
    }

    /// Named outputs.
    pub fn outputs(&self) -> &BTreeMap<String, EnvValue> {
        &self.outputs
    }

    /// Checks that every dependency and output reference names a resource in
    /// the plan.
    pub fn validate(&self) -> Result<(), ConstructError> {
        for resource in &self.resources {
            for dep in resource.dependencies() {
                if self.get(&dep).is_none() {
                    return Err(ConstructError::UnknownDependency {
                        resource: resource.logical_id.clone(),
                        dependency: dep,
                    });
                }
            }
        }
        for value in self.outputs.values() {
            if let Some(r) = value.as_reference() {
                if self.get(r.resource()).is_none() {
                    return Err(ConstructError::UnresolvedAttribute {
                        resource: r.resource().clone(),
                        attribute: r.attribute().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns resources in an order where every resource follows all of its
    /// dependencies. Ties keep declaration order.
    pub fn creation_order(&self) -> Result<Vec<&Resource>, ConstructError> {
        self.validate()?;

        let mut remaining: Vec<(&Resource, BTreeSet<LogicalId>)> = self
            .resources
            .iter()
            .map(|r| (r, r.dependencies()))
            .collect();
        let mut created: BTreeSet<LogicalId> = BTreeSet::new();
        let mut order = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let ready = remaining
                .iter()
                .position(|(_, deps)| deps.iter().all(|d| created.contains(d)));

            match ready {
                Some(i) => {
                    let (resource, _) = remaining.remove(i);
                    created.insert(resource.logical_id.clone());
                    order.push(resource);
                }
                None => {
                    return Err(ConstructError::DependencyCycle {
                        involved: remaining
                            .iter()
                            .map(|(r, _)| r.logical_id.clone())
                            .collect(),
                    });
                }
            }
        }

        Ok(order)
    }

    /// Renders the plan as a JSON template document.
    pub fn to_template(&self) -> Result<Value, serde_json::Error> {
        let mut resources = Map::new();
        for r in &self.resources {
            resources.insert(r.logical_id.to_string(), serde_json::to_value(r)?);
        }

        let mut outputs = Map::new();
        for (name, value) in &self.outputs {
            outputs.insert(name.clone(), json!({ "Value": serde_json::to_value(value)? }));
        }

        Ok(json!({
            "Stack": self.stack.name.as_str(),
            "Account": self.stack.account,
            "Resources": resources,
            "Outputs": outputs,
        }))
    }
}
