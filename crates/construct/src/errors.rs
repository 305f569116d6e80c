//! Error and retry-policy types for the ForkedRepository domain.
//!
//! [`ConstructError`] covers conditions detected while synthesizing or
//! ordering a plan; these are always configuration mistakes and never
//! retryable. The remaining types belong to the runtime side: provisioning a
//! resource ([`ProvisionError`]), obtaining push credentials
//! ([`CredentialError`]), running the fork itself ([`ForkError`]), and
//! reporting its outcome ([`ReportError`]).
//!
//! [`RetryPolicy`] is a cross-cutting concern: any runtime error that
//! participates in retry decisions must be able to produce one.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::LogicalId;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: credentials not yet propagated, transient network
///   failures reaching the source or the broker.
/// - `NonRetryable` errors: malformed requests, missing secrets, cleanup
///   failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Synthesis errors
// ---------------------------------------------------------------------------

/// Errors produced while validating props, synthesizing, or ordering a plan.
#[derive(Debug, Error, PartialEq)]
pub enum ConstructError {
    /// A construct property is missing or has an unusable value.
    #[error("Invalid property '{field}': {reason}")]
    InvalidProperty {
        /// Config-surface name of the offending field (e.g. `"srcRepo"`).
        field: &'static str,
        /// Description of what is wrong with it.
        reason: String,
    },

    /// Two resources in the same plan share a logical id.
    #[error("Duplicate logical id: {id}")]
    DuplicateLogicalId {
        /// The id that appears more than once.
        id: LogicalId,
    },

    /// A resource depends on, or references, a resource not in the plan.
    #[error("Resource '{resource}' depends on unknown resource '{dependency}'")]
    UnknownDependency {
        /// The dependent resource.
        resource: LogicalId,
        /// The missing dependency.
        dependency: LogicalId,
    },

    /// The dependency graph contains a cycle; no creation order exists.
    #[error("Dependency cycle between resources: {involved:?}")]
    DependencyCycle {
        /// Resources that could not be ordered.
        involved: Vec<LogicalId>,
    },

    /// An attribute reference could not be resolved because the referenced
    /// resource has not produced that attribute.
    #[error("Unresolved attribute '{attribute}' of resource '{resource}'")]
    UnresolvedAttribute {
        /// The referenced resource.
        resource: LogicalId,
        /// The referenced attribute name.
        attribute: String,
    },
}

// ---------------------------------------------------------------------------
// Runtime errors
// ---------------------------------------------------------------------------

/// Errors raised by a [`crate::ResourceProvisioner`] backend.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The backend already holds a resource with this name.
    #[error("Resource '{id}' already exists: {detail}")]
    AlreadyExists {
        /// Logical id of the resource being created.
        id: LogicalId,
        /// Backend-specific description (e.g. a path).
        detail: String,
    },

    /// The backend failed to create the resource.
    #[error("Failed to create resource '{id}': {message}")]
    Backend {
        /// Logical id of the resource being created.
        id: LogicalId,
        /// Backend error message.
        message: String,
    },
}

/// Errors raised while leasing or releasing push credentials.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// An identity-broker call failed.
    #[error("Identity broker {operation} failed: {message}")]
    Broker {
        /// Broker operation name (e.g. `"create_user"`).
        operation: &'static str,
        /// Error message from the broker or transport.
        message: String,
        /// Whether the failure looked transient (timeouts, 5xx).
        transient: bool,
    },

    /// The named secret does not exist in the secret store.
    #[error("Secret '{name}' not found")]
    SecretNotFound {
        /// Requested secret name.
        name: String,
    },

    /// The secret exists but does not hold `{"username", "password"}` JSON.
    #[error("Secret '{name}' is malformed: {reason}")]
    MalformedSecret {
        /// Secret name.
        name: String,
        /// Parse failure description.
        reason: String,
    },

    /// The secret store itself could not be read.
    #[error("Secret store error reading '{name}': {message}")]
    Store {
        /// Secret name.
        name: String,
        /// Underlying error message.
        message: String,
    },
}

impl CredentialError {
    /// Retry policy for this credential failure.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Broker {
                transient: true, ..
            } => RetryPolicy::Retryable { after: None },
            _ => RetryPolicy::NonRetryable,
        }
    }
}

/// Errors produced by a single fork run.
#[derive(Debug, Error)]
pub enum ForkError {
    /// The execution environment does not satisfy the invocation contract.
    #[error("Invalid fork request: {reason}")]
    InvalidRequest {
        /// What is wrong with the environment mapping.
        reason: String,
    },

    /// Push credentials could not be obtained.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Cloning the source repository failed.
    #[error("Clone of source repo '{url}' failed: {message}")]
    Clone {
        /// Source URL.
        url: String,
        /// Git error output.
        message: String,
    },

    /// Pushing to the destination repository failed.
    #[error("Push to destination repo failed after {attempts} attempt(s): {message}")]
    Push {
        /// Git error output (credentials are never included).
        message: String,
        /// `true` when the last failure was an authentication rejection.
        auth_failure: bool,
        /// Number of push attempts made.
        attempts: u32,
    },

    /// The run exceeded its configured time budget.
    #[error("Fork timed out after {after:?}")]
    TimedOut {
        /// The budget that was exceeded.
        after: Duration,
    },

    /// Local I/O needed by the run (scratch directory, process spawn) failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The fork itself succeeded but releasing credentials did not.
    #[error("Cleanup failed: {}", failures.join("; "))]
    Cleanup {
        /// One message per failed release step.
        failures: Vec<String>,
    },

    /// The fork failed and releasing credentials also failed.
    #[error("{source} (cleanup also failed: {})", failures.join("; "))]
    WithCleanupFailures {
        /// The primary failure.
        source: Box<ForkError>,
        /// One message per failed release step.
        failures: Vec<String>,
    },
}

impl ForkError {
    /// Retry policy for this fork failure.
    ///
    /// Only conditions that a later attempt can plausibly fix are retryable.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Credential(e) => e.retry_policy(),
            Self::Push {
                auth_failure: true,
                ..
            } => RetryPolicy::Retryable {
                after: Some(Duration::from_secs(5)),
            },
            Self::Clone { .. } | Self::TimedOut { .. } => RetryPolicy::Retryable { after: None },
            Self::WithCleanupFailures { source, .. } => source.retry_policy(),
            Self::InvalidRequest { .. }
            | Self::Push { .. }
            | Self::Io { .. }
            | Self::Cleanup { .. } => RetryPolicy::NonRetryable,
        }
    }

    /// The failure that ended the run, looking through cleanup wrappers.
    pub fn primary(&self) -> &ForkError {
        match self {
            Self::WithCleanupFailures { source, .. } => source.primary(),
            other => other,
        }
    }
}

/// Errors raised while reporting a fork outcome.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The report could not be delivered.
    #[error("Status report transport failed: {message}")]
    Transport {
        /// Transport error message.
        message: String,
    },

    /// The receiver answered with a non-success status.
    #[error("Status report rejected with HTTP {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },
}
