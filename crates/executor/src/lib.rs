//! Fork Executor.
//!
//! Given a resolved execution environment (`SRC_REPO`, `DEST_REPO`, and at
//! most one of `USER_NAME` / `DEST_SECRET`), the executor obtains push
//! credentials, mirrors the source repository, pushes it to the destination,
//! and gives the credentials back.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`runner`] | [`ForkRunner`]: the run itself, timeout, push retry, cleanup |
//! | [`lease`] | [`CredentialLease`]: per-strategy acquisition and ordered release |
//! | [`git`] | `git` subprocess wrappers |
//! | [`auth`] | [`PushCredentials`] and credential-bearing remote URLs |
//! | [`broker`] | [`HttpIdentityBroker`] |
//! | [`secrets`] | [`FileSecretStore`] |
//! | [`memory`] | In-memory broker and secret store |

pub mod auth;
pub mod broker;
pub mod git;
pub mod lease;
pub mod memory;
pub mod runner;
pub mod secrets;

#[cfg(any(test, feature = "test-util"))]
pub mod test_http;

pub use auth::{authenticated_url, PushCredentials};
pub use broker::HttpIdentityBroker;
pub use git::GitError;
pub use lease::CredentialLease;
pub use memory::{InMemoryIdentityBroker, InMemorySecretStore};
pub use runner::{
    ExecutorConfig, ForkRunner, DEFAULT_PUSH_ATTEMPTS, DEFAULT_PUSH_POLICY,
    DEFAULT_PUSH_RETRY_DELAY,
};
pub use secrets::FileSecretStore;
