//! The Fork Executor proper.
//!
//! One [`ForkRunner::run`] call:
//!
//! 1. leases push credentials for the request's [`CredentialSource`];
//! 2. mirror-clones the source into a scratch directory;
//! 3. pushes every branch and tag to the destination, retrying while the
//!    destination still rejects freshly minted credentials;
//! 4. releases the lease, whatever happened before.
//!
//! Steps 1 to 3 share the configured time budget. Release always runs and is
//! not covered by the budget.
//!
//! [`CredentialSource`]: construct::CredentialSource

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use construct::{
    ExecutorTimeout, ForkError, ForkHandler, ForkRequest, ForkRunId, ForkSummary, IdentityBroker,
    PolicyName, SecretStore,
};

use crate::auth::{authenticated_url, PushCredentials};
use crate::git::{self, GitError};
use crate::lease::CredentialLease;

/// Policy attached to the pushing identity for the duration of a run.
pub const DEFAULT_PUSH_POLICY: &str = "RepositoryPowerUser";

/// Push attempts before an authentication rejection is final.
pub const DEFAULT_PUSH_ATTEMPTS: u32 = 25;

/// Pause between authentication-rejected push attempts.
pub const DEFAULT_PUSH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Tuning for [`ForkRunner`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub push_policy: PolicyName,
    pub push_attempts: u32,
    pub push_retry_delay: Duration,
    pub timeout: ExecutorTimeout,
    /// Parent of the per-run scratch directory. `None` uses the system
    /// temporary directory.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            push_policy: PolicyName::new(DEFAULT_PUSH_POLICY)
                .unwrap_or_else(|| unreachable!("default policy name is not empty")),
            push_attempts: DEFAULT_PUSH_ATTEMPTS,
            push_retry_delay: DEFAULT_PUSH_RETRY_DELAY,
            timeout: ExecutorTimeout::DEFAULT,
            scratch_dir: None,
        }
    }
}

/// Mirrors one repository into another with leased credentials.
pub struct ForkRunner {
    config: ExecutorConfig,
    broker: Arc<dyn IdentityBroker>,
    secrets: Arc<dyn SecretStore>,
}

impl ForkRunner {
    pub fn new(
        config: ExecutorConfig,
        broker: Arc<dyn IdentityBroker>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            config,
            broker,
            secrets,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs one fork.
    ///
    /// Credentials are released even when the run fails or times out. A
    /// release failure after a successful push yields [`ForkError::Cleanup`];
    /// after a failed run it is attached to the primary error.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty, credentials = request.credentials.label()))]
    pub async fn run(&self, request: &ForkRequest) -> Result<ForkSummary, ForkError> {
        let run_id = ForkRunId::new_random();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        info!(source = %request.source, "fork started");

        let mut lease = CredentialLease::new(
            self.broker.clone(),
            self.secrets.clone(),
            self.config.push_policy.clone(),
        );

        let work = self.mirror(request, run_id, &mut lease);
        let outcome = match self.config.timeout.as_duration() {
            Some(budget) => tokio::time::timeout(budget, work)
                .await
                .unwrap_or(Err(ForkError::TimedOut { after: budget })),
            None => work.await,
        };

        let failures = lease.release().await;
        match (outcome, failures.is_empty()) {
            (Ok(summary), true) => {
                info!(
                    refs = summary.refs_pushed,
                    attempts = summary.push_attempts,
                    "fork succeeded"
                );
                Ok(summary)
            }
            (Ok(_), false) => {
                warn!(failures = failures.len(), "fork pushed but credential release failed");
                Err(ForkError::Cleanup { failures })
            }
            (Err(e), true) => {
                warn!(error = %e, "fork failed");
                Err(e)
            }
            (Err(e), false) => {
                warn!(error = %e, failures = failures.len(), "fork failed and credential release failed");
                Err(ForkError::WithCleanupFailures {
                    source: Box::new(e),
                    failures,
                })
            }
        }
    }

    async fn mirror(
        &self,
        request: &ForkRequest,
        run_id: ForkRunId,
        lease: &mut CredentialLease,
    ) -> Result<ForkSummary, ForkError> {
        let credentials = lease.acquire(&request.credentials, run_id).await?.clone();

        let scratch = self.scratch_dir()?;
        let mirror = scratch.path().join("mirror.git");

        git::clone_mirror(&request.source, &mirror)
            .await
            .map_err(|e| ForkError::Clone {
                url: request.source.clone(),
                message: e.redacted_message(&[]),
            })?;

        let push_attempts = self
            .push(&mirror, &request.destination, &credentials)
            .await?;

        let refs_pushed = git::count_refs(&mirror).await.map_err(|e| ForkError::Io {
            context: "counting mirrored refs".into(),
            source: std::io::Error::other(e.to_string()),
        })?;

        Ok(ForkSummary {
            run_id,
            source: request.source.clone(),
            destination: request.destination.clone(),
            credentials: request.credentials.label().to_string(),
            refs_pushed,
            push_attempts,
        })
    }

    async fn push(
        &self,
        mirror: &Path,
        destination: &str,
        credentials: &PushCredentials,
    ) -> Result<u32, ForkError> {
        let url = authenticated_url(destination, Some(credentials));
        let (attempts, result) = retry_auth_failures(
            self.config.push_attempts,
            self.config.push_retry_delay,
            || git::push_mirror(mirror, &url),
        )
        .await;

        result.map(|()| attempts).map_err(|e| {
            let secrets = credentials.secrets();
            let secrets: Vec<&str> = secrets.iter().map(String::as_str).collect();
            ForkError::Push {
                message: e.redacted_message(&secrets),
                auth_failure: e.is_auth_failure(),
                attempts,
            }
        })
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir, ForkError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("fork-");
        match &self.config.scratch_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|source| ForkError::Io {
            context: "creating scratch directory".into(),
            source,
        })
    }
}

/// Calls `push` until it succeeds, fails for a reason other than
/// authentication, or `max_attempts` is reached.
///
/// Returns the number of attempts made alongside the last result.
async fn retry_auth_failures<F, Fut>(
    max_attempts: u32,
    delay: Duration,
    mut push: F,
) -> (u32, Result<(), GitError>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), GitError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match push().await {
            Err(e) if e.is_auth_failure() && attempt < max_attempts => {
                warn!(attempt, max_attempts, "destination rejected credentials; retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return (attempt, result),
        }
    }
}

#[async_trait]
impl ForkHandler for ForkRunner {
    async fn invoke(&self, environment: BTreeMap<String, String>) -> Result<ForkSummary, ForkError> {
        let request = ForkRequest::from_env_map(&environment)?;
        self.run(&request).await
    }
}
