//! Newtype domain identifiers.
//!
//! Every named thing in a synthesized plan is represented as a distinct newtype
//! wrapping a `String`. This prevents accidentally interchanging, for example,
//! a [`SecretName`] with an [`IdentityName`] even though both are strings
//! under the hood.
//!
//! String identifiers are never empty. Deserialisation goes through the same
//! check as [`new`](LogicalId::new), so an empty value in a config file is a
//! configuration error rather than a silently accepted blank.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display,
// and serde conversions that reject empty strings.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value).ok_or_else(|| {
                    concat!(stringify!($name), " must not be empty").to_string()
                })
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: construct tree
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies a construct within its stack (e.g. `"Mirror"`).
    ///
    /// Every logical id synthesized by the construct is prefixed with it.
    ConstructId
}

string_id! {
    /// Identifies one resource within a synthesized plan.
    ///
    /// Logical ids are unique per plan and are the keys of the rendered
    /// template's `Resources` map.
    LogicalId
}

impl LogicalId {
    /// Derives a child id by appending `suffix` (e.g. `Mirror` + `Handler`).
    pub fn child(&self, suffix: &str) -> Self {
        Self(format!("{}{}", self.0, suffix))
    }
}

impl From<&ConstructId> for LogicalId {
    fn from(id: &ConstructId) -> Self {
        Self(id.as_str().to_string())
    }
}

string_id! {
    /// Identifies a stack: the unit that a plan is synthesized into.
    StackName
}

// ---------------------------------------------------------------------------
// Identifiers: resource names
// ---------------------------------------------------------------------------

string_id! {
    /// Name of the destination repository (e.g. `"mirror-of-a"`).
    RepositoryName
}

string_id! {
    /// Name of an identity (user) that may hold push credentials.
    IdentityName
}

string_id! {
    /// Name of a pre-existing secret holding destination credentials.
    SecretName
}

string_id! {
    /// Name of a managed policy attached to an identity for the duration of a fork.
    PolicyName
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single fork execution (one invocation of the Fork Executor).
///
/// Generated fresh for every invocation; propagated through spans and status
/// reports so all activity from a single run can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForkRunId(Uuid);

impl ForkRunId {
    /// Generates a new random run identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a [`ForkRunId`] from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }

    /// Returns the first eight hex digits, used for ephemeral resource names.
    pub fn short(self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl std::fmt::Display for ForkRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identifiers_are_rejected() {
        assert!(SecretName::new("").is_none());
        assert!(LogicalId::new("Mirror").is_some());
    }

    #[test]
    fn deserialising_an_empty_name_fails() {
        let result: Result<SecretName, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());

        let name: SecretName = serde_json::from_str("\"git-creds\"").unwrap();
        assert_eq!(name.as_str(), "git-creds");
    }

    #[test]
    fn child_ids_append_the_suffix() {
        let id = LogicalId::new("Mirror").unwrap();
        assert_eq!(id.child("Handler").as_str(), "MirrorHandler");
    }

    #[test]
    fn short_run_id_is_eight_hex_chars() {
        let short = ForkRunId::new_random().short();
        assert_eq!(short.len(), 8);
        assert!(short.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
