//! In-memory implementations of the credential ports.
//!
//! Used by tests and by local deployments, where destination repositories
//! are plain paths and credentials only need to be well-formed, not valid.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;

use construct::{
    CredentialError, IdentityBroker, IdentityName, PolicyName, SecretName, SecretStore,
    ServiceCredential,
};

#[derive(Debug, Default)]
struct User {
    policies: BTreeSet<PolicyName>,
    credentials: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct BrokerState {
    users: BTreeMap<IdentityName, User>,
    calls: Vec<String>,
    next_credential: u64,
}

/// Identity broker that keeps users, policy attachments, and credentials in
/// memory and records every call.
#[derive(Debug, Default)]
pub struct InMemoryIdentityBroker {
    state: Mutex<BrokerState>,
    failing: BTreeSet<&'static str>,
}

impl InMemoryIdentityBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-registers an identity, as if provisioned with the stack.
    pub fn with_user(self, user: IdentityName) -> Self {
        self.register_user(user);
        self
    }

    /// Makes every call to `operation` fail with a non-transient error.
    pub fn failing_on(mut self, operation: &'static str) -> Self {
        self.failing.insert(operation);
        self
    }

    /// Registers an identity on a shared broker.
    pub fn register_user(&self, user: IdentityName) {
        self.lock().users.entry(user).or_default();
    }

    /// Returns `true` if `user` currently exists.
    pub fn has_user(&self, user: &IdentityName) -> bool {
        self.lock().users.contains_key(user)
    }

    /// Policies currently attached to `user`.
    pub fn attached_policies(&self, user: &IdentityName) -> BTreeSet<PolicyName> {
        self.lock()
            .users
            .get(user)
            .map(|u| u.policies.clone())
            .unwrap_or_default()
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        // A poisoned lock only means another test thread panicked mid-call.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(
        &self,
        operation: &'static str,
    ) -> Result<std::sync::MutexGuard<'_, BrokerState>, CredentialError> {
        let mut state = self.lock();
        state.calls.push(operation.to_string());
        if self.failing.contains(operation) {
            return Err(CredentialError::Broker {
                operation,
                message: "injected failure".into(),
                transient: false,
            });
        }
        Ok(state)
    }
}

fn no_such_user(operation: &'static str, user: &IdentityName) -> CredentialError {
    CredentialError::Broker {
        operation,
        message: format!("no such user '{user}'"),
        transient: false,
    }
}

#[async_trait]
impl IdentityBroker for InMemoryIdentityBroker {
    async fn create_user(&self, user: &IdentityName) -> Result<(), CredentialError> {
        let mut state = self.begin("create_user")?;
        if state.users.contains_key(user) {
            return Err(CredentialError::Broker {
                operation: "create_user",
                message: format!("user '{user}' already exists"),
                transient: false,
            });
        }
        state.users.insert(user.clone(), User::default());
        Ok(())
    }

    async fn delete_user(&self, user: &IdentityName) -> Result<(), CredentialError> {
        let mut state = self.begin("delete_user")?;
        state
            .users
            .remove(user)
            .map(|_| ())
            .ok_or_else(|| no_such_user("delete_user", user))
    }

    async fn attach_policy(
        &self,
        user: &IdentityName,
        policy: &PolicyName,
    ) -> Result<(), CredentialError> {
        let mut state = self.begin("attach_policy")?;
        let entry = state
            .users
            .get_mut(user)
            .ok_or_else(|| no_such_user("attach_policy", user))?;
        entry.policies.insert(policy.clone());
        Ok(())
    }

    async fn detach_policy(
        &self,
        user: &IdentityName,
        policy: &PolicyName,
    ) -> Result<(), CredentialError> {
        let mut state = self.begin("detach_policy")?;
        let entry = state
            .users
            .get_mut(user)
            .ok_or_else(|| no_such_user("detach_policy", user))?;
        entry.policies.remove(policy);
        Ok(())
    }

    async fn create_service_credential(
        &self,
        user: &IdentityName,
    ) -> Result<ServiceCredential, CredentialError> {
        let mut state = self.begin("create_service_credential")?;
        state.next_credential += 1;
        let n = state.next_credential;
        let entry = state
            .users
            .get_mut(user)
            .ok_or_else(|| no_such_user("create_service_credential", user))?;

        let id = format!("cred-{n}");
        entry.credentials.insert(id.clone());
        Ok(ServiceCredential {
            id,
            username: format!("{user}-at-{n}"),
            password: placeholder_password(n),
        })
    }

    async fn delete_service_credential(
        &self,
        user: &IdentityName,
        credential_id: &str,
    ) -> Result<(), CredentialError> {
        let mut state = self.begin("delete_service_credential")?;
        let entry = state
            .users
            .get_mut(user)
            .ok_or_else(|| no_such_user("delete_service_credential", user))?;
        if entry.credentials.remove(credential_id) {
            Ok(())
        } else {
            Err(CredentialError::Broker {
                operation: "delete_service_credential",
                message: format!("no credential '{credential_id}' for '{user}'"),
                transient: false,
            })
        }
    }
}

/// Placeholder password for the `n`th credential. Local destinations ignore it.
fn placeholder_password(n: u64) -> String {
    format!("local-{:016x}", n.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Secret store backed by a map.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: BTreeMap<String, String>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a secret.
    pub fn with_secret(mut self, name: &str, value: &str) -> Self {
        self.secrets.insert(name.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_secret_value(&self, name: &SecretName) -> Result<String, CredentialError> {
        self.secrets
            .get(name.as_str())
            .cloned()
            .ok_or_else(|| CredentialError::SecretNotFound {
                name: name.to_string(),
            })
    }
}
