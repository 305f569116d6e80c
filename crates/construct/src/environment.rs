//! The execution environment handed to the Fork Executor.
//!
//! At synthesis time the environment is a mapping from variable name to
//! [`EnvValue`]: either a literal, or a reference to an attribute that another
//! resource only produces once it has been created (the destination clone URL
//! is the canonical example). At deploy time the references are resolved
//! against [`ResolvedAttributes`] to obtain the plain string mapping the
//! executor actually sees.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ConstructError, LogicalId};

/// Source repository URL to clone from.
pub const SRC_REPO: &str = "SRC_REPO";
/// Destination clone URL to push to.
pub const DEST_REPO: &str = "DEST_REPO";
/// Service identity whose credentials the executor rotates.
pub const USER_NAME: &str = "USER_NAME";
/// Pre-existing secret holding destination credentials.
pub const DEST_SECRET: &str = "DEST_SECRET";

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A reference to an attribute of another resource in the same plan.
///
/// Serialises as `{"GetAtt": ["<logical id>", "<attribute>"]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRef {
    #[serde(rename = "GetAtt")]
    target: (LogicalId, String),
}

impl AttributeRef {
    /// Creates a reference to `attribute` of `resource`.
    pub fn new(resource: LogicalId, attribute: impl Into<String>) -> Self {
        Self {
            target: (resource, attribute.into()),
        }
    }

    /// The referenced resource.
    pub fn resource(&self) -> &LogicalId {
        &self.target.0
    }

    /// The referenced attribute name.
    pub fn attribute(&self) -> &str {
        &self.target.1
    }
}

/// A value in the execution environment: known now, or known after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    /// A value fixed at synthesis time.
    Literal(String),
    /// A value produced by another resource at creation time.
    Attribute(AttributeRef),
}

impl EnvValue {
    /// Returns the attribute reference, if this value is one.
    pub fn as_reference(&self) -> Option<&AttributeRef> {
        match self {
            Self::Attribute(r) => Some(r),
            Self::Literal(_) => None,
        }
    }

    /// Returns `true` for an empty literal. References are never empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Literal(s) if s.is_empty())
    }
}

impl From<&str> for EnvValue {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<String> for EnvValue {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

impl From<AttributeRef> for EnvValue {
    fn from(value: AttributeRef) -> Self {
        Self::Attribute(value)
    }
}

// ---------------------------------------------------------------------------
// Resolved attributes
// ---------------------------------------------------------------------------

/// Attributes produced by created resources, keyed by logical id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAttributes(BTreeMap<LogicalId, BTreeMap<String, String>>);

impl ResolvedAttributes {
    /// Creates an empty attribute table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the attributes of a newly created resource, merging with any
    /// already recorded for it.
    pub fn insert(&mut self, id: LogicalId, attributes: BTreeMap<String, String>) {
        self.0.entry(id).or_default().extend(attributes);
    }

    /// Looks up a single attribute.
    pub fn get(&self, reference: &AttributeRef) -> Option<&str> {
        self.0
            .get(reference.resource())
            .and_then(|attrs| attrs.get(reference.attribute()))
            .map(String::as_str)
    }

    /// Returns every attribute of one resource.
    pub fn of(&self, id: &LogicalId) -> Option<&BTreeMap<String, String>> {
        self.0.get(id)
    }

    /// Resolves a single environment value.
    pub fn resolve(&self, value: &EnvValue) -> Result<String, ConstructError> {
        match value {
            EnvValue::Literal(s) => Ok(s.clone()),
            EnvValue::Attribute(r) => self.get(r).map(str::to_string).ok_or_else(|| {
                ConstructError::UnresolvedAttribute {
                    resource: r.resource().clone(),
                    attribute: r.attribute().to_string(),
                }
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Ordered environment mapping rendered into the function resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEnvironment(BTreeMap<String, EnvValue>);

impl ExecutionEnvironment {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<EnvValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the value for `key`.
    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.0.get(key)
    }

    /// Returns `true` if `key` is set.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &EnvValue)> {
        self.0.iter()
    }

    /// Iterates every attribute reference in the environment.
    pub fn references(&self) -> impl Iterator<Item = &AttributeRef> {
        self.0.values().filter_map(EnvValue::as_reference)
    }

    /// Returns `true` if both `SRC_REPO` and `DEST_REPO` are present and
    /// non-empty.
    pub fn has_repositories(&self) -> bool {
        [SRC_REPO, DEST_REPO]
            .iter()
            .all(|k| self.get(k).is_some_and(|v| !v.is_empty()))
    }

    /// Resolves every value against created-resource attributes.
    pub fn resolve(
        &self,
        attributes: &ResolvedAttributes,
    ) -> Result<BTreeMap<String, String>, ConstructError> {
        self.0
            .iter()
            .map(|(k, v)| Ok((k.clone(), attributes.resolve(v)?)))
            .collect()
    }
}
