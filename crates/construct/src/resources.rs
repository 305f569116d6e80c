//! Resources a plan is made of.
//!
//! Each [`Resource`] pairs a logical id with a [`ResourceKind`] and any
//! explicit dependencies. Implicit dependencies (attribute references in an
//! environment, a grant's grantee, a trigger's handler) are reported by
//! [`Resource::dependencies`] so ordering never has to special-case a kind.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::credentials::{PolicyStatement, ResourceScope};
use crate::{BuildOptions, ExecutionEnvironment, ExecutorTimeout, IdentityName, LogicalId, RepositoryName};

/// Attribute names produced by created resources.
pub mod attributes {
    /// Push-capable clone URL of a repository.
    pub const CLONE_URL_HTTP: &str = "CloneUrlHttp";
    /// Physical name of a repository, function, or identity.
    pub const NAME: &str = "Name";
    /// Outcome of the fork run driven by a trigger.
    pub const FORK_STATUS: &str = "ForkStatus";
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Destination repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RepositorySpec {
    pub repository_name: RepositoryName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The compute handler that runs the Fork Executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionSpec {
    /// Name of the executor entry point to package (e.g. `"fork"`).
    pub entry: String,
    #[serde(serialize_with = "serialize_timeout")]
    pub timeout: ExecutorTimeout,
    pub environment: ExecutionEnvironment,
    #[serde(skip_serializing_if = "BuildOptions::is_empty")]
    pub build: BuildOptions,
}

fn serialize_timeout<S: serde::Serializer>(
    timeout: &ExecutorTimeout,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match timeout.as_duration() {
        Some(d) => serializer.serialize_some(&d.as_secs()),
        None => serializer.serialize_none(),
    }
}

/// A dedicated identity whose credentials the executor may rotate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IdentitySpec {
    pub user_name: IdentityName,
}

/// Rights attached to a resource's execution identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GrantSpec {
    pub grantee: LogicalId,
    pub statements: Vec<PolicyStatement>,
}

/// Runs `handler` once, after every resource in `resources` is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TriggerSpec {
    pub handler: LogicalId,
    pub resources: Vec<LogicalId>,
}

/// What a resource is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "Type", content = "Properties")]
pub enum ResourceKind {
    #[serde(rename = "Forked::Repository")]
    Repository(RepositorySpec),
    #[serde(rename = "Forked::Function")]
    Function(FunctionSpec),
    #[serde(rename = "Forked::Identity")]
    Identity(IdentitySpec),
    #[serde(rename = "Forked::Grant")]
    Grant(GrantSpec),
    #[serde(rename = "Forked::Trigger")]
    Trigger(TriggerSpec),
}

/// Discriminant of [`ResourceKind`], for counting and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Repository,
    Function,
    Identity,
    Grant,
    Trigger,
}

impl ResourceKind {
    /// Returns the kind's discriminant.
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Self::Repository(_) => ResourceType::Repository,
            Self::Function(_) => ResourceType::Function,
            Self::Identity(_) => ResourceType::Identity,
            Self::Grant(_) => ResourceType::Grant,
            Self::Trigger(_) => ResourceType::Trigger,
        }
    }
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// One entry of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    #[serde(skip)]
    pub logical_id: LogicalId,
    #[serde(flatten)]
    pub kind: ResourceKind,
    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<LogicalId>,
}

impl Resource {
    /// Creates a resource with no explicit dependencies.
    pub fn new(logical_id: LogicalId, kind: ResourceKind) -> Self {
        Self {
            logical_id,
            kind,
            depends_on: Vec::new(),
        }
    }

    /// Adds an explicit dependency.
    pub fn depends_on(mut self, id: LogicalId) -> Self {
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    /// Returns the resource's discriminant.
    pub fn resource_type(&self) -> ResourceType {
        self.kind.resource_type()
    }

    /// Every resource that must exist before this one can be created:
    /// explicit dependencies plus those implied by the kind's properties.
    pub fn dependencies(&self) -> BTreeSet<LogicalId> {
        let mut deps: BTreeSet<LogicalId> = self.depends_on.iter().cloned().collect();
        match &self.kind {
            ResourceKind::Repository(_) | ResourceKind::Identity(_) => {}
            ResourceKind::Function(f) => {
                deps.extend(f.environment.references().map(|r| r.resource().clone()));
            }
            ResourceKind::Grant(g) => {
                deps.insert(g.grantee.clone());
                deps.extend(
                    g.statements
                        .iter()
                        .flat_map(|s| &s.resources)
                        .filter_map(|scope| match scope {
                            ResourceScope::Repository(id) => Some(id.clone()),
                            _ => None,
                        }),
                );
            }
            ResourceKind::Trigger(t) => {
                deps.insert(t.handler.clone());
                deps.extend(t.resources.iter().cloned());
            }
        }
        deps
    }
}
