//! Domain for the `ForkedRepository` construct.
//!
//! This crate contains every domain concept needed to describe a repository
//! that is provisioned pre-populated from an external source: the construct's
//! props, the three credential strategies, the synthesized plan, the
//! execution environment contract of the Fork Executor, and the status of the
//! single fork run. Infrastructure crates implement the traits defined in
//! [`ports`]; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`LogicalId`, `SecretName`, etc.) |
//! | [`types`] | Shared value types (`ExecutorTimeout`, `BuildOptions`, `Timestamp`) |
//! | [`errors`] | Error and retry-policy types |
//! | [`credentials`] | `CredentialStrategy`, grants, action vocabulary |
//! | [`environment`] | Execution environment and attribute references |
//! | [`resources`] | Resource kinds that make up a plan |
//! | [`plan`] | Plan container, ordering, template rendering |
//! | [`construct`] | The `ForkedRepository` construct itself |
//! | [`request`] | Executor-side validation of the environment |
//! | [`status`] | Fork run status and reports |
//! | [`ports`] | Traits implemented by infrastructure crates |

pub mod construct;
pub mod credentials;
pub mod environment;
pub mod errors;
pub mod identifiers;
pub mod plan;
pub mod ports;
pub mod request;
pub mod resources;
pub mod status;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use construct::{ForkedRepository, ForkedRepositoryProps, FORK_ENTRY};
pub use credentials::{
    Action, CredentialBinding, CredentialStrategy, PolicyStatement, ResourceScope,
};
pub use environment::{
    AttributeRef, EnvValue, ExecutionEnvironment, ResolvedAttributes, DEST_REPO, DEST_SECRET,
    SRC_REPO, USER_NAME,
};
pub use errors::{
    ConstructError, CredentialError, ForkError, ProvisionError, ReportError, RetryPolicy,
};
pub use identifiers::{
    ConstructId, ForkRunId, IdentityName, LogicalId, PolicyName, RepositoryName, SecretName,
    StackName,
};
pub use plan::Plan;
pub use ports::{
    ForkHandler, IdentityBroker, ResourceProvisioner, SecretStore, ServiceCredential,
    StatusReporter,
};
pub use request::{CredentialSource, ForkRequest};
pub use resources::{Resource, ResourceKind, ResourceType};
pub use status::{ForkReport, ForkStatus, ForkSummary};
pub use types::{BuildOptions, ExecutorTimeout, StackContext, Timestamp};
