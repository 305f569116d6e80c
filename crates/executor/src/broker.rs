//! HTTP identity broker client.
//!
//! Talks to a small REST service that owns identities on the executor's
//! behalf:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create user | `POST /identities/{user}` |
//! | delete user | `DELETE /identities/{user}` |
//! | attach policy | `PUT /identities/{user}/policies/{policy}` |
//! | detach policy | `DELETE /identities/{user}/policies/{policy}` |
//! | create credential | `POST /identities/{user}/credentials` → `{id, username, password}` |
//! | delete credential | `DELETE /identities/{user}/credentials/{id}` |
//!
//! Connection failures, timeouts, `429` and `5xx` responses are reported as
//! transient; every other non-success status is not.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, instrument};

use construct::{CredentialError, IdentityBroker, IdentityName, PolicyName, ServiceCredential};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`IdentityBroker`] backed by the broker REST API.
#[derive(Debug, Clone)]
pub struct HttpIdentityBroker {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpIdentityBroker {
    /// Creates a client for the broker at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, CredentialError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CredentialError::Broker {
                operation: "connect",
                message: e.to_string(),
                transient: false,
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Sends `token` as a bearer token on every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, CredentialError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.map_err(|e| CredentialError::Broker {
            operation,
            message: e.to_string(),
            transient: e.is_timeout() || e.is_connect(),
        })?;

        let status = response.status();
        debug!(operation, status = status.as_u16(), "identity broker responded");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(CredentialError::Broker {
            operation,
            message: format!("HTTP {status}: {}", body.trim()),
            transient: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
        })
    }
}

#[async_trait]
impl IdentityBroker for HttpIdentityBroker {
    #[instrument(skip(self), fields(%user))]
    async fn create_user(&self, user: &IdentityName) -> Result<(), CredentialError> {
        let url = self.url(&format!("identities/{user}"));
        self.send("create_user", self.client.post(url)).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(%user))]
    async fn delete_user(&self, user: &IdentityName) -> Result<(), CredentialError> {
        let url = self.url(&format!("identities/{user}"));
        self.send("delete_user", self.client.delete(url)).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(%user, %policy))]
    async fn attach_policy(
        &self,
        user: &IdentityName,
        policy: &PolicyName,
    ) -> Result<(), CredentialError> {
        let url = self.url(&format!("identities/{user}/policies/{policy}"));
        self.send("attach_policy", self.client.put(url)).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(%user, %policy))]
    async fn detach_policy(
        &self,
        user: &IdentityName,
        policy: &PolicyName,
    ) -> Result<(), CredentialError> {
        let url = self.url(&format!("identities/{user}/policies/{policy}"));
        self.send("detach_policy", self.client.delete(url)).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(%user))]
    async fn create_service_credential(
        &self,
        user: &IdentityName,
    ) -> Result<ServiceCredential, CredentialError> {
        let url = self.url(&format!("identities/{user}/credentials"));
        let response = self
            .send("create_service_credential", self.client.post(url))
            .await?;
        response
            .json::<ServiceCredential>()
            .await
            .map_err(|e| CredentialError::Broker {
                operation: "create_service_credential",
                message: format!("invalid response body: {e}"),
                transient: false,
            })
    }

    #[instrument(skip(self), fields(%user))]
    async fn delete_service_credential(
        &self,
        user: &IdentityName,
        credential_id: &str,
    ) -> Result<(), CredentialError> {
        let url = self.url(&format!("identities/{user}/credentials/{credential_id}"));
        self.send("delete_service_credential", self.client.delete(url))
            .await?;
        Ok(())
    }
}
