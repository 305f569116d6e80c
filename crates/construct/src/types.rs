//! Shared value types for the ForkedRepository domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! values with invariants (a timeout is either a positive duration or
//! explicitly unbounded) and participate in plan synthesis.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StackName;

// ---------------------------------------------------------------------------
// Executor timeout
// ---------------------------------------------------------------------------

/// Time budget for one Fork Executor invocation.
///
/// Written in config as `"<n>s"`, `"<n>m"`, a bare number of seconds, or
/// `"unbounded"`. Defaults to five minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExecutorTimeout {
    /// The run is cancelled once this much time has elapsed.
    Bounded(Duration),
    /// The run may take as long as it needs.
    Unbounded,
}

impl ExecutorTimeout {
    /// The default budget: five minutes.
    pub const DEFAULT: Self = Self::Bounded(Duration::from_secs(5 * 60));

    /// Creates a bounded timeout, returning `None` for a zero duration.
    pub fn bounded(duration: Duration) -> Option<Self> {
        if duration.is_zero() {
            None
        } else {
            Some(Self::Bounded(duration))
        }
    }

    /// Returns the budget, or `None` when unbounded.
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Bounded(d) => Some(d),
            Self::Unbounded => None,
        }
    }

    /// Parses the config representation.
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("unbounded") {
            return Ok(Self::Unbounded);
        }

        let (digits, unit) = match value.char_indices().last() {
            Some((i, 's')) => (&value[..i], 1),
            Some((i, 'm')) => (&value[..i], 60),
            _ => (value, 1),
        };
        let amount: u64 = digits
            .parse()
            .map_err(|_| format!("invalid timeout '{value}': expected e.g. '300s', '5m' or 'unbounded'"))?;

        let secs = amount
            .checked_mul(unit)
            .ok_or_else(|| format!("invalid timeout '{value}': too large"))?;
        Self::bounded(Duration::from_secs(secs))
            .ok_or_else(|| format!("invalid timeout '{value}': must be greater than zero"))
    }
}

impl Default for ExecutorTimeout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<String> for ExecutorTimeout {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ExecutorTimeout> for String {
    fn from(value: ExecutorTimeout) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for ExecutorTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbounded => write!(f, "unbounded"),
            Self::Bounded(d) if d.as_secs() % 60 == 0 => write!(f, "{}m", d.as_secs() / 60),
            Self::Bounded(d) => write!(f, "{}s", d.as_secs()),
        }
    }
}

// ---------------------------------------------------------------------------
// Executor packaging
// ---------------------------------------------------------------------------

/// Options forwarded verbatim to the executor's packaging step.
///
/// The construct never interprets these; they are rendered into the function
/// resource so the packager can pick them up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    /// Build-time arguments (`KEY=value` pairs).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, String>,

    /// Extra flags for the executor's compiler invocation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub go_build_flags: Vec<String>,
}

impl BuildOptions {
    /// Returns `true` if no packaging options were supplied.
    pub fn is_empty(&self) -> bool {
        self.build_args.is_empty() && self.go_build_flags.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Stack
// ---------------------------------------------------------------------------

/// The stack a construct is synthesized into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackContext {
    /// Stack name; prefixes generated resource names.
    pub name: StackName,

    /// Account that owns the stack's resources; rendered into resource scopes.
    #[serde(default = "StackContext::default_account")]
    pub account: String,
}

impl StackContext {
    /// Creates a stack context in the given account.
    pub fn new(name: StackName, account: impl Into<String>) -> Self {
        Self {
            name,
            account: account.into(),
        }
    }

    fn default_account() -> String {
        "local".to_string()
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
