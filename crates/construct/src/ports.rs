//! Port traits implemented by infrastructure crates.
//!
//! The domain defines *what* is needed; `executor` and `trigger` define *how*
//! to supply it (local bare repositories, an HTTP identity broker, a file
//! secret store, an HTTP status receiver, or in-memory fakes in tests).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::resources::Resource;
use crate::{
    CredentialError, ForkError, ForkReport, ForkSummary, IdentityName, PolicyName,
    ProvisionError, ReportError, ResolvedAttributes, SecretName,
};

/// Creates plan resources in some backend.
#[async_trait]
pub trait ResourceProvisioner: Send + Sync {
    /// Creates `resource` and returns the attributes it produced.
    ///
    /// `attributes` holds everything produced by resources created earlier in
    /// the same apply, so references can be resolved.
    async fn create(
        &self,
        resource: &Resource,
        attributes: &ResolvedAttributes,
    ) -> Result<BTreeMap<String, String>, ProvisionError>;
}

/// A service-specific credential minted for an identity.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceCredential {
    pub id: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ServiceCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCredential")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Manages identities, their policy attachments, and their credentials.
#[async_trait]
pub trait IdentityBroker: Send + Sync {
    async fn create_user(&self, user: &IdentityName) -> Result<(), CredentialError>;

    async fn delete_user(&self, user: &IdentityName) -> Result<(), CredentialError>;

    async fn attach_policy(
        &self,
        user: &IdentityName,
        policy: &PolicyName,
    ) -> Result<(), CredentialError>;

    async fn detach_policy(
        &self,
        user: &IdentityName,
        policy: &PolicyName,
    ) -> Result<(), CredentialError>;

    async fn create_service_credential(
        &self,
        user: &IdentityName,
    ) -> Result<ServiceCredential, CredentialError>;

    async fn delete_service_credential(
        &self,
        user: &IdentityName,
        credential_id: &str,
    ) -> Result<(), CredentialError>;
}

/// Reads secret values by name.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret_value(&self, name: &SecretName) -> Result<String, CredentialError>;
}

/// Runs the Fork Executor with a resolved environment.
#[async_trait]
pub trait ForkHandler: Send + Sync {
    async fn invoke(&self, environment: BTreeMap<String, String>)
        -> Result<ForkSummary, ForkError>;
}

/// Delivers fork status reports somewhere a caller can observe them.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, report: &ForkReport) -> Result<(), ReportError>;
}
