//! Deployment engine and Completion Trigger.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`engine`] | [`Deployment`]: ordered apply, trigger wiring, [`DeploymentReport`] |
//! | [`after_create`] | [`AfterCreate`]: the run-once post-creation task |
//! | [`provisioner`] | [`LocalProvisioner`]: bare repositories and a JSON ledger |
//! | [`reporter`] | Tracing, HTTP, and fan-out [`construct::StatusReporter`]s |

pub mod after_create;
pub mod engine;
pub mod provisioner;
pub mod reporter;

pub use after_create::AfterCreate;
pub use engine::{DeployError, Deployment, DeploymentReport};
pub use provisioner::{LedgerEntry, LocalProvisioner};
pub use reporter::{FanOutReporter, HttpStatusReporter, TracingStatusReporter};
