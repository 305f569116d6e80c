//! Leasing push credentials for the duration of one fork run.
//!
//! Each acquisition step records how to undo itself. [`CredentialLease::release`]
//! undoes them in reverse order and keeps going when a step fails, so a
//! broken broker call never strands a policy attachment or an identity:
//!
//! | Source | Acquire | Release |
//! |--------|---------|---------|
//! | ambient principal | create user → attach policy → create credential | delete credential → detach policy → delete user |
//! | service identity | attach policy → create credential | delete credential → detach policy |
//! | external secret | read secret | nothing |

use std::sync::Arc;

use tracing::{debug, info, warn};

use construct::{
    CredentialError, CredentialSource, ForkRunId, IdentityBroker, IdentityName, PolicyName,
    SecretName, SecretStore,
};

use crate::auth::PushCredentials;

#[derive(Debug, Clone)]
enum ReleaseStep {
    DeleteUser(IdentityName),
    DetachPolicy(IdentityName, PolicyName),
    DeleteCredential(IdentityName, String),
}

/// Push credentials plus the steps needed to give them back.
pub struct CredentialLease {
    broker: Arc<dyn IdentityBroker>,
    secrets: Arc<dyn SecretStore>,
    policy: PolicyName,
    steps: Vec<ReleaseStep>,
    credentials: Option<PushCredentials>,
}

impl CredentialLease {
    /// Creates an empty lease. Nothing is acquired until [`acquire`](Self::acquire).
    pub fn new(
        broker: Arc<dyn IdentityBroker>,
        secrets: Arc<dyn SecretStore>,
        policy: PolicyName,
    ) -> Self {
        Self {
            broker,
            secrets,
            policy,
            steps: Vec::new(),
            credentials: None,
        }
    }

    /// The leased credentials, once acquired.
    pub fn credentials(&self) -> Option<&PushCredentials> {
        self.credentials.as_ref()
    }

    /// Obtains credentials for `source`.
    ///
    /// Steps completed before a failure stay recorded; the caller must still
    /// call [`release`](Self::release).
    pub async fn acquire(
        &mut self,
        source: &CredentialSource,
        run_id: ForkRunId,
    ) -> Result<&PushCredentials, CredentialError> {
        let credentials = match source {
            CredentialSource::AmbientPrincipal => {
                let user = ephemeral_user(run_id);
                self.broker.create_user(&user).await?;
                self.steps.push(ReleaseStep::DeleteUser(user.clone()));
                info!(user = %user, "created ephemeral git user");
                self.rotate_in(&user).await?
            }
            CredentialSource::ServiceIdentity(user) => self.rotate_in(user).await?,
            CredentialSource::ExternalSecret(name) => self.read_secret(name).await?,
        };

        Ok(self.credentials.insert(credentials))
    }

    async fn rotate_in(&mut self, user: &IdentityName) -> Result<PushCredentials, CredentialError> {
        self.broker.attach_policy(user, &self.policy).await?;
        self.steps
            .push(ReleaseStep::DetachPolicy(user.clone(), self.policy.clone()));
        debug!(user = %user, policy = %self.policy, "attached push policy");

        let credential = self.broker.create_service_credential(user).await?;
        self.steps
            .push(ReleaseStep::DeleteCredential(user.clone(), credential.id.clone()));
        debug!(user = %user, credential_id = %credential.id, "created git credential");

        Ok(PushCredentials::from(&credential))
    }

    async fn read_secret(&self, name: &SecretName) -> Result<PushCredentials, CredentialError> {
        let raw = self.secrets.get_secret_value(name).await?;
        let credentials: PushCredentials =
            serde_json::from_str(&raw).map_err(|e| CredentialError::MalformedSecret {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        debug!(secret = %name, username = %credentials.username, "read destination secret");
        Ok(credentials)
    }

    /// Undoes every acquisition step in reverse order.
    ///
    /// Returns one message per failed step; an empty vector means everything
    /// was released.
    pub async fn release(mut self) -> Vec<String> {
        let mut failures = Vec::new();
        while let Some(step) = self.steps.pop() {
            let result = match &step {
                ReleaseStep::DeleteCredential(user, id) => {
                    self.broker.delete_service_credential(user, id).await
                }
                ReleaseStep::DetachPolicy(user, policy) => {
                    self.broker.detach_policy(user, policy).await
                }
                ReleaseStep::DeleteUser(user) => self.broker.delete_user(user).await,
            };
            if let Err(e) = result {
                warn!(step = ?step, error = %e, "credential release step failed");
                failures.push(e.to_string());
            }
        }
        failures
    }
}

/// Name of the throwaway identity minted for one ambient-principal run.
pub fn ephemeral_user(run_id: ForkRunId) -> IdentityName {
    // `fork-` plus eight hex digits is never empty.
    IdentityName::new(format!("fork-{}", run_id.short()))
        .unwrap_or_else(|| unreachable!("ephemeral user name is never empty"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryIdentityBroker, InMemorySecretStore};

    fn policy() -> PolicyName {
        PolicyName::new("RepositoryPowerUser").unwrap()
    }

    fn lease(broker: &Arc<InMemoryIdentityBroker>, secrets: InMemorySecretStore) -> CredentialLease {
        CredentialLease::new(broker.clone(), Arc::new(secrets), policy())
    }

    #[tokio::test]
    async fn ambient_principal_mints_and_removes_a_throwaway_user() {
        let broker = Arc::new(InMemoryIdentityBroker::new());
        let mut lease = lease(&broker, InMemorySecretStore::new());
        let run_id = ForkRunId::new_random();

        lease
            .acquire(&CredentialSource::AmbientPrincipal, run_id)
            .await
            .unwrap();
        let user = ephemeral_user(run_id);
        assert!(broker.has_user(&user));
        assert!(broker.attached_policies(&user).contains(&policy()));

        assert!(lease.release().await.is_empty());
        assert!(!broker.has_user(&user));
        assert_eq!(
            broker.calls(),
            vec![
                "create_user",
                "attach_policy",
                "create_service_credential",
                "delete_service_credential",
                "detach_policy",
                "delete_user",
            ]
        );
    }

    #[tokio::test]
    async fn service_identity_rotates_without_touching_the_user() {
        let user = IdentityName::new("dev-Mirror-git-user").unwrap();
        let broker = Arc::new(InMemoryIdentityBroker::new().with_user(user.clone()));
        let mut lease = lease(&broker, InMemorySecretStore::new());

        let credentials = lease
            .acquire(
                &CredentialSource::ServiceIdentity(user.clone()),
                ForkRunId::new_random(),
            )
            .await
            .unwrap()
            .clone();
        assert!(credentials.username.starts_with("dev-Mirror-git-user"));

        assert!(lease.release().await.is_empty());
        assert!(broker.has_user(&user));
        assert!(broker.attached_policies(&user).is_empty());
        assert!(!broker.calls().contains(&"create_user".to_string()));
    }

    #[tokio::test]
    async fn partial_acquisition_is_still_released() {
        let user = IdentityName::new("dev-Mirror-git-user").unwrap();
        let broker = Arc::new(
            InMemoryIdentityBroker::new()
                .with_user(user.clone())
                .failing_on("create_service_credential"),
        );
        let mut lease = lease(&broker, InMemorySecretStore::new());

        let err = lease
            .acquire(
                &CredentialSource::ServiceIdentity(user.clone()),
                ForkRunId::new_random(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Broker { .. }));
        assert!(broker.attached_policies(&user).contains(&policy()));

        assert!(lease.release().await.is_empty());
        assert!(broker.attached_policies(&user).is_empty());
    }

    #[tokio::test]
    async fn release_continues_past_failures() {
        let broker = Arc::new(InMemoryIdentityBroker::new().failing_on("detach_policy"));
        let mut lease = lease(&broker, InMemorySecretStore::new());
        let run_id = ForkRunId::new_random();

        lease
            .acquire(&CredentialSource::AmbientPrincipal, run_id)
            .await
            .unwrap();
        let failures = lease.release().await;

        assert_eq!(failures.len(), 1);
        assert!(broker.calls().contains(&"delete_user".to_string()));
    }

    #[tokio::test]
    async fn external_secret_is_parsed_and_needs_no_release() {
        let broker = Arc::new(InMemoryIdentityBroker::new());
        let secrets = InMemorySecretStore::new()
            .with_secret("git-creds", r#"{"username":"bot","password":"pw"}"#);
        let mut lease = lease(&broker, secrets);

        let credentials = lease
            .acquire(
                &CredentialSource::ExternalSecret(SecretName::new("git-creds").unwrap()),
                ForkRunId::new_random(),
            )
            .await
            .unwrap()
            .clone();
        assert_eq!(credentials.username, "bot");
        assert_eq!(credentials.password, "pw");

        assert!(lease.release().await.is_empty());
        assert!(broker.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_secret_is_reported() {
        let broker = Arc::new(InMemoryIdentityBroker::new());
        let secrets = InMemorySecretStore::new().with_secret("git-creds", "not json");
        let mut lease = lease(&broker, secrets);

        let err = lease
            .acquire(
                &CredentialSource::ExternalSecret(SecretName::new("git-creds").unwrap()),
                ForkRunId::new_random(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::MalformedSecret { .. }));
    }
}
