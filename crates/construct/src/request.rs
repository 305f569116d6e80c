//! The executor-side view of an execution environment.

use std::collections::BTreeMap;

use crate::environment::{DEST_REPO, DEST_SECRET, SRC_REPO, USER_NAME};
use crate::{ForkError, IdentityName, SecretName};

/// Where the executor gets its push credentials from, as read from the
/// environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Neither `USER_NAME` nor `DEST_SECRET` is set: mint a throwaway identity.
    AmbientPrincipal,
    /// `USER_NAME` is set: rotate that identity's credentials.
    ServiceIdentity(IdentityName),
    /// `DEST_SECRET` is set: read credentials from that secret.
    ExternalSecret(SecretName),
}

impl CredentialSource {
    /// Short label used in logs and status reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AmbientPrincipal => "ambient-principal",
            Self::ServiceIdentity(_) => "service-identity",
            Self::ExternalSecret(_) => "external-secret",
        }
    }
}

/// One validated fork invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkRequest {
    pub source: String,
    pub destination: String,
    pub credentials: CredentialSource,
}

impl ForkRequest {
    /// Validates a resolved environment mapping.
    pub fn from_env_map(env: &BTreeMap<String, String>) -> Result<Self, ForkError> {
        Self::from_lookup(|key| env.get(key).cloned())
    }

    /// Validates an environment read through `lookup`.
    ///
    /// `SRC_REPO` and `DEST_REPO` must be set and non-empty; at most one of
    /// `USER_NAME` and `DEST_SECRET` may be set. Empty optional values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ForkError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ForkError::InvalidRequest {
                    reason: format!("{key} is not set"),
                })
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let source = required(SRC_REPO)?;
        let destination = required(DEST_REPO)?;

        let credentials = match (optional(USER_NAME), optional(DEST_SECRET)) {
            (Some(_), Some(_)) => {
                return Err(ForkError::InvalidRequest {
                    reason: format!("{USER_NAME} and {DEST_SECRET} are mutually exclusive"),
                })
            }
            (Some(user), None) => CredentialSource::ServiceIdentity(
                IdentityName::new(user).ok_or_else(|| ForkError::InvalidRequest {
                    reason: format!("{USER_NAME} is empty"),
                })?,
            ),
            (None, Some(secret)) => CredentialSource::ExternalSecret(
                SecretName::new(secret).ok_or_else(|| ForkError::InvalidRequest {
                    reason: format!("{DEST_SECRET} is empty"),
                })?,
            ),
            (None, None) => CredentialSource::AmbientPrincipal,
        };

        Ok(Self {
            source,
            destination,
            credentials,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn repositories_only_means_ambient() {
        let request = ForkRequest::from_env_map(&env(&[
            (SRC_REPO, "https://example.com/a.git"),
            (DEST_REPO, "https://git.example.com/b"),
        ]))
        .unwrap();
        assert_eq!(request.credentials, CredentialSource::AmbientPrincipal);
    }

    #[test]
    fn user_name_selects_service_identity() {
        let request = ForkRequest::from_env_map(&env(&[
            (SRC_REPO, "https://example.com/a.git"),
            (DEST_REPO, "https://git.example.com/b"),
            (USER_NAME, "dev-Mirror-git-user"),
        ]))
        .unwrap();
        assert_eq!(
            request.credentials,
            CredentialSource::ServiceIdentity(IdentityName::new("dev-Mirror-git-user").unwrap())
        );
    }

    #[test]
    fn both_credential_keys_are_rejected() {
        let err = ForkRequest::from_env_map(&env(&[
            (SRC_REPO, "https://example.com/a.git"),
            (DEST_REPO, "https://git.example.com/b"),
            (USER_NAME, "u"),
            (DEST_SECRET, "s"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn blank_destination_is_rejected() {
        let err = ForkRequest::from_env_map(&env(&[
            (SRC_REPO, "https://example.com/a.git"),
            (DEST_REPO, "  "),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("DEST_REPO"));
    }
}
