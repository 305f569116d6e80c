//! Outcome of the one fork run a trigger drives.
//!
//! A [`ForkReport`] moves through `pending → running → (succeeded | failed |
//! timed_out)` exactly once. It is what the trigger exports as its
//! `ForkStatus` attribute and what a [`crate::StatusReporter`] delivers.

use serde::{Deserialize, Serialize};

use crate::{ForkError, ForkRunId, LogicalId, Timestamp};

/// Where a fork run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl ForkStatus {
    /// Returns the status as rendered in attributes and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    /// Returns `true` once the run can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

impl std::fmt::Display for ForkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a successful fork run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkSummary {
    pub run_id: ForkRunId,
    pub source: String,
    pub destination: String,
    /// Credential strategy label the run used.
    pub credentials: String,
    /// Number of refs present in the pushed mirror.
    pub refs_pushed: usize,
    pub push_attempts: u32,
}

/// Status of the fork run owned by one trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkReport {
    pub trigger: LogicalId,
    pub status: ForkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ForkSummary>,
}

impl ForkReport {
    /// A report for a trigger that has not fired yet.
    pub fn pending(trigger: LogicalId) -> Self {
        Self {
            trigger,
            status: ForkStatus::Pending,
            reason: None,
            retryable: None,
            started_at: None,
            finished_at: None,
            summary: None,
        }
    }

    /// Marks the run as started now.
    pub fn start(&self) -> Self {
        Self {
            status: ForkStatus::Running,
            started_at: Some(Timestamp::now()),
            ..self.clone()
        }
    }

    /// Records the run's result.
    pub fn finish(&self, result: &Result<ForkSummary, ForkError>) -> Self {
        let mut next = Self {
            finished_at: Some(Timestamp::now()),
            ..self.clone()
        };
        match result {
            Ok(summary) => {
                next.status = ForkStatus::Succeeded;
                next.summary = Some(summary.clone());
            }
            Err(err) => {
                next.status = match err.primary() {
                    ForkError::TimedOut { .. } => ForkStatus::TimedOut,
                    _ => ForkStatus::Failed,
                };
                next.reason = Some(err.to_string());
                next.retryable = Some(err.retry_policy().is_retryable());
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn trigger() -> LogicalId {
        LogicalId::new("MirrorFork").unwrap()
    }

    #[test]
    fn reports_walk_pending_running_terminal() {
        let pending = ForkReport::pending(trigger());
        assert_eq!(pending.status, ForkStatus::Pending);

        let running = pending.start();
        assert_eq!(running.status, ForkStatus::Running);
        assert!(running.started_at.is_some());

        let summary = ForkSummary {
            run_id: ForkRunId::new_random(),
            source: "https://example.com/a.git".into(),
            destination: "/srv/a.git".into(),
            credentials: "service-identity".into(),
            refs_pushed: 3,
            push_attempts: 1,
        };
        let done = running.finish(&Ok(summary));
        assert_eq!(done.status, ForkStatus::Succeeded);
        assert!(done.status.is_terminal());
        assert!(done.reason.is_none());
    }

    #[test]
    fn timeouts_are_distinguished_from_failures() {
        let done = ForkReport::pending(trigger())
            .start()
            .finish(&Err(ForkError::TimedOut {
                after: Duration::from_secs(300),
            }));
        assert_eq!(done.status, ForkStatus::TimedOut);
        assert_eq!(done.retryable, Some(true));
    }

    #[test]
    fn timeouts_with_cleanup_failures_still_report_timed_out() {
        let done = ForkReport::pending(trigger())
            .start()
            .finish(&Err(ForkError::WithCleanupFailures {
                source: Box::new(ForkError::TimedOut {
                    after: Duration::from_secs(300),
                }),
                failures: vec!["release lease: broker unavailable".into()],
            }));
        assert_eq!(done.status, ForkStatus::TimedOut);
        assert!(done.reason.unwrap().contains("cleanup also failed"));
    }

    #[test]
    fn report_serialises_with_snake_case_status() {
        let json = serde_json::to_value(ForkReport::pending(trigger())).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["trigger"], "MirrorFork");
        assert!(json.get("reason").is_none());
    }
}
