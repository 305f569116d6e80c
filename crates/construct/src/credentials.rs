//! Credential strategies: how the Fork Executor obtains push access.
//!
//! A [`CredentialStrategy`] is selected when the construct is configured. It
//! determines three things, each derived by an exhaustive match:
//!
//! | Strategy | Identity resource | Executor grant | Extra env |
//! |----------|-------------------|----------------|-----------|
//! | `AmbientPrincipal` | none | six identity-lifecycle actions on `identity/*` | none |
//! | `ServiceIdentity` | one | credential + policy rotation on `identity/<name>` | `USER_NAME` |
//! | `ExternalSecret` | none | secret read + repository pull/push | `DEST_SECRET` |
//!
//! Action and scope names are provider-neutral; a backend maps them onto its
//! own policy language.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::environment::{DEST_SECRET, USER_NAME};
use crate::{
    ConstructError, ConstructId, EnvValue, IdentityName, LogicalId, SecretName, StackContext,
};

/// Longest identity name the construct will generate.
pub const MAX_IDENTITY_NAME_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Actions and scopes
// ---------------------------------------------------------------------------

/// A right that can be granted to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "identity:CreateUser")]
    CreateUser,
    #[serde(rename = "identity:DeleteUser")]
    DeleteUser,
    #[serde(rename = "identity:AttachUserPolicy")]
    AttachUserPolicy,
    #[serde(rename = "identity:DetachUserPolicy")]
    DetachUserPolicy,
    #[serde(rename = "identity:CreateServiceSpecificCredential")]
    CreateServiceSpecificCredential,
    #[serde(rename = "identity:DeleteServiceSpecificCredential")]
    DeleteServiceSpecificCredential,
    #[serde(rename = "secret:GetSecretValue")]
    GetSecretValue,
    #[serde(rename = "repository:GitPull")]
    GitPull,
    #[serde(rename = "repository:GitPush")]
    GitPush,
}

impl Action {
    /// Rights needed to mint, use, and tear down a throwaway identity at run time.
    pub const IDENTITY_LIFECYCLE: [Action; 6] = [
        Action::CreateUser,
        Action::CreateServiceSpecificCredential,
        Action::AttachUserPolicy,
        Action::DetachUserPolicy,
        Action::DeleteServiceSpecificCredential,
        Action::DeleteUser,
    ];

    /// Rights needed to rotate the credentials and permissions of an existing identity.
    pub const IDENTITY_ROTATION: [Action; 4] = [
        Action::CreateServiceSpecificCredential,
        Action::DeleteServiceSpecificCredential,
        Action::AttachUserPolicy,
        Action::DetachUserPolicy,
    ];

    /// Returns the rendered action name (e.g. `"identity:CreateUser"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateUser => "identity:CreateUser",
            Self::DeleteUser => "identity:DeleteUser",
            Self::AttachUserPolicy => "identity:AttachUserPolicy",
            Self::DetachUserPolicy => "identity:DetachUserPolicy",
            Self::CreateServiceSpecificCredential => "identity:CreateServiceSpecificCredential",
            Self::DeleteServiceSpecificCredential => "identity:DeleteServiceSpecificCredential",
            Self::GetSecretValue => "secret:GetSecretValue",
            Self::GitPull => "repository:GitPull",
            Self::GitPush => "repository:GitPush",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resources a grant applies to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "kebab-case")]
pub enum ResourceScope {
    /// Every identity in the account (`identity/*`).
    AllIdentities,
    /// Exactly one identity.
    Identity(IdentityName),
    /// Exactly one secret.
    Secret(SecretName),
    /// A repository resource in the same plan.
    Repository(LogicalId),
}

impl ResourceScope {
    /// Renders the scope as a resource name qualified by the stack's account.
    pub fn qualified(&self, stack: &StackContext) -> String {
        format!("{}:{}", stack.account, self)
    }

    /// Returns `true` if this scope covers more than one concrete resource.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::AllIdentities)
    }
}

impl std::fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllIdentities => write!(f, "identity/*"),
            Self::Identity(name) => write!(f, "identity/{name}"),
            Self::Secret(name) => write!(f, "secret/{name}"),
            Self::Repository(id) => write!(f, "repository/{id}"),
        }
    }
}

/// A set of actions allowed on a set of resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    pub actions: BTreeSet<Action>,
    pub resources: Vec<ResourceScope>,
}

impl PolicyStatement {
    /// Creates a statement allowing `actions` on `resources`.
    pub fn allow(
        actions: impl IntoIterator<Item = Action>,
        resources: impl IntoIterator<Item = ResourceScope>,
    ) -> Self {
        Self {
            actions: actions.into_iter().collect(),
            resources: resources.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// How the Fork Executor is given rights to push into the destination.
///
/// In config this is the `credentials` table, tagged by `strategy`:
///
/// ```toml
/// [credentials]
/// strategy = "external-secret"
/// secretName = "mirror-git-credentials"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum CredentialStrategy {
    /// The executor's own identity may create a throwaway identity per run.
    AmbientPrincipal,

    /// A dedicated identity is provisioned with the stack; the executor may
    /// only rotate its credentials and policy attachment.
    ServiceIdentity {
        /// Explicit identity name. Generated from the stack and construct id
        /// when omitted.
        #[serde(
            default,
            rename = "identityName",
            skip_serializing_if = "Option::is_none"
        )]
        identity_name: Option<IdentityName>,
    },

    /// Credentials come from a pre-existing secret; no identity is created.
    ExternalSecret {
        /// The secret to read. Must already exist and hold
        /// `{"username": ..., "password": ...}`.
        #[serde(rename = "secretName")]
        secret_name: SecretName,
    },
}

impl Default for CredentialStrategy {
    fn default() -> Self {
        Self::ServiceIdentity {
            identity_name: None,
        }
    }
}

impl CredentialStrategy {
    /// Builds the external-secret strategy from a raw name.
    pub fn external_secret(secret_name: &str) -> Result<Self, ConstructError> {
        let secret_name =
            SecretName::new(secret_name).ok_or_else(|| ConstructError::InvalidProperty {
                field: "secretName",
                reason: "must not be empty".into(),
            })?;
        Ok(Self::ExternalSecret { secret_name })
    }

    /// Short label used in logs and rendered metadata.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AmbientPrincipal => "ambient-principal",
            Self::ServiceIdentity { .. } => "service-identity",
            Self::ExternalSecret { .. } => "external-secret",
        }
    }

    /// Binds the strategy to a concrete construct, fixing any generated names.
    pub fn bind(&self, stack: &StackContext, id: &ConstructId) -> CredentialBinding {
        match self {
            Self::AmbientPrincipal => CredentialBinding::AmbientPrincipal,
            Self::ServiceIdentity { identity_name } => CredentialBinding::ServiceIdentity {
                identity_name: identity_name
                    .clone()
                    .unwrap_or_else(|| generated_identity_name(stack, id)),
            },
            Self::ExternalSecret { secret_name } => CredentialBinding::ExternalSecret {
                secret_name: secret_name.clone(),
            },
        }
    }
}

/// A strategy with every name fixed, ready to contribute to a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialBinding {
    AmbientPrincipal,
    ServiceIdentity { identity_name: IdentityName },
    ExternalSecret { secret_name: SecretName },
}

impl CredentialBinding {
    /// The identity this binding provisions, if any.
    pub fn provisioned_identity(&self) -> Option<&IdentityName> {
        match self {
            Self::ServiceIdentity { identity_name } => Some(identity_name),
            Self::AmbientPrincipal | Self::ExternalSecret { .. } => None,
        }
    }

    /// The policy statements granted to the executor, one per scope kind.
    ///
    /// `repository` is the logical id of the destination repository; only
    /// the external-secret binding grants rights on it directly.
    pub fn executor_statements(&self, repository: &LogicalId) -> Vec<PolicyStatement> {
        match self {
            Self::AmbientPrincipal => vec![PolicyStatement::allow(
                Action::IDENTITY_LIFECYCLE,
                [ResourceScope::AllIdentities],
            )],
            Self::ServiceIdentity { identity_name } => vec![PolicyStatement::allow(
                Action::IDENTITY_ROTATION,
                [ResourceScope::Identity(identity_name.clone())],
            )],
            Self::ExternalSecret { secret_name } => vec![
                PolicyStatement::allow(
                    [Action::GetSecretValue],
                    [ResourceScope::Secret(secret_name.clone())],
                ),
                PolicyStatement::allow(
                    [Action::GitPull, Action::GitPush],
                    [ResourceScope::Repository(repository.clone())],
                ),
            ],
        }
    }

    /// The strategy-specific environment entry, if any.
    pub fn environment_entry(&self) -> Option<(&'static str, EnvValue)> {
        match self {
            Self::AmbientPrincipal => None,
            Self::ServiceIdentity { identity_name } => {
                Some((USER_NAME, EnvValue::from(identity_name.as_str())))
            }
            Self::ExternalSecret { secret_name } => {
                Some((DEST_SECRET, EnvValue::from(secret_name.as_str())))
            }
        }
    }
}

/// Deterministic identity name: `<stack>-<construct>-git-user`, restricted to
/// `[A-Za-z0-9+=,.@_-]` and truncated to [`MAX_IDENTITY_NAME_LEN`].
fn generated_identity_name(stack: &StackContext, id: &ConstructId) -> IdentityName {
    let raw = format!("{}-{}-git-user", stack.name, id);
    let sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "+=,.@_-".contains(c) {
                c
            } else {
                '-'
            }
        })
        .take(MAX_IDENTITY_NAME_LEN)
        .collect();

    // Non-empty: the suffix alone survives sanitising.
    IdentityName::new(sanitized).unwrap_or_else(|| unreachable!("generated name is never empty"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StackName;

    fn stack() -> StackContext {
        StackContext::new(StackName::new("dev").unwrap(), "123456789012")
    }

    fn construct_id() -> ConstructId {
        ConstructId::new("Mirror").unwrap()
    }

    fn repo() -> LogicalId {
        LogicalId::new("Mirror").unwrap()
    }

    #[test]
    fn ambient_grants_exactly_the_six_lifecycle_actions_on_all_identities() {
        let binding = CredentialStrategy::AmbientPrincipal.bind(&stack(), &construct_id());
        let statements = binding.executor_statements(&repo());
        assert_eq!(statements.len(), 1);
        let statement = &statements[0];

        let expected: BTreeSet<Action> = Action::IDENTITY_LIFECYCLE.into_iter().collect();
        assert_eq!(statement.actions, expected);
        assert_eq!(statement.actions.len(), 6);
        assert_eq!(statement.resources, vec![ResourceScope::AllIdentities]);
        assert!(binding.environment_entry().is_none());
    }

    #[test]
    fn service_identity_rotation_is_scoped_to_the_generated_identity() {
        let binding = CredentialStrategy::default().bind(&stack(), &construct_id());
        let name = binding.provisioned_identity().unwrap().clone();
        assert_eq!(name.as_str(), "dev-Mirror-git-user");

        let statements = binding.executor_statements(&repo());
        assert_eq!(statements.len(), 1);
        let statement = &statements[0];
        assert_eq!(statement.resources, vec![ResourceScope::Identity(name.clone())]);
        assert!(!statement.actions.contains(&Action::CreateUser));
        assert!(!statement.actions.contains(&Action::DeleteUser));

        let (key, value) = binding.environment_entry().unwrap();
        assert_eq!(key, USER_NAME);
        assert_eq!(value, EnvValue::from(name.as_str()));
    }

    #[test]
    fn explicit_identity_name_wins_over_generated() {
        let strategy = CredentialStrategy::ServiceIdentity {
            identity_name: IdentityName::new("mirror-bot"),
        };
        let binding = strategy.bind(&stack(), &construct_id());
        assert_eq!(binding.provisioned_identity().unwrap().as_str(), "mirror-bot");
    }

    #[test]
    fn external_secret_never_provisions_an_identity() {
        let binding = CredentialStrategy::external_secret("git-creds")
            .unwrap()
            .bind(&stack(), &construct_id());
        assert!(binding.provisioned_identity().is_none());

        let statements = binding.executor_statements(&repo());
        assert!(statements
            .iter()
            .flat_map(|s| &s.actions)
            .all(|a| !a.as_str().starts_with("identity:")));
    }

    #[test]
    fn external_secret_grants_are_split_by_scope() {
        let binding = CredentialStrategy::external_secret("git-creds")
            .unwrap()
            .bind(&stack(), &construct_id());
        let statements = binding.executor_statements(&repo());
        assert_eq!(statements.len(), 2);

        for statement in &statements {
            assert_eq!(statement.resources.len(), 1);
            let expected = match &statement.resources[0] {
                ResourceScope::Secret(name) => {
                    assert_eq!(name.as_str(), "git-creds");
                    BTreeSet::from([Action::GetSecretValue])
                }
                ResourceScope::Repository(id) => {
                    assert_eq!(id, &repo());
                    BTreeSet::from([Action::GitPull, Action::GitPush])
                }
                other => panic!("unexpected scope {other:?}"),
            };
            assert_eq!(statement.actions, expected);
        }
    }

    #[test]
    fn external_secret_requires_a_name() {
        assert!(CredentialStrategy::external_secret("").is_err());

        let missing: Result<CredentialStrategy, _> =
            serde_json::from_str(r#"{"strategy":"external-secret"}"#);
        let err = missing.unwrap_err().to_string();
        assert!(err.contains("secretName"), "unexpected error: {err}");
    }

    #[test]
    fn generated_names_are_sanitised_and_bounded() {
        let stack = StackContext::new(StackName::new("my stack/with:odd chars").unwrap(), "local");
        let id = ConstructId::new("A".repeat(80)).unwrap();
        let name = CredentialStrategy::default()
            .bind(&stack, &id)
            .provisioned_identity()
            .unwrap()
            .clone();
        assert!(name.as_str().len() <= MAX_IDENTITY_NAME_LEN);
        assert!(name.as_str().starts_with("my-stack-with-odd-chars-"));
    }

    #[test]
    fn scopes_render_with_the_account() {
        let scope = ResourceScope::AllIdentities;
        assert_eq!(scope.qualified(&stack()), "123456789012:identity/*");
        assert!(scope.is_wildcard());
    }
}
