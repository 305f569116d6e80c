//! Git command wrappers using [`tokio::process::Command`].
//!
//! Every function shells out to the system `git` binary. Terminal prompts are
//! disabled so a missing or rejected credential fails fast instead of
//! blocking on stdin. The child is killed when its future is dropped, so a
//! timed-out run leaves no git process behind. Remote URLs may carry
//! credentials and are therefore never recorded in spans or errors.

use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Refspecs pushed to the destination: every branch and every tag.
pub const MIRROR_REFSPECS: [&str; 2] = ["refs/heads/*:refs/heads/*", "refs/tags/*:refs/tags/*"];

/// Fragments of git's stderr that indicate the remote rejected our credentials.
const AUTH_FAILURE_MARKERS: [&str; 6] = [
    "authentication failed",
    "could not read username",
    "could not read password",
    "returned error: 401",
    "returned error: 403",
    "permission denied",
];

/// A git invocation that could not be spawned or exited unsuccessfully.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to spawn git {command}: {source}")]
    Spawn {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed ({status}): {stderr}")]
    Failed {
        command: &'static str,
        status: String,
        stderr: String,
    },
}

impl GitError {
    /// Returns `true` if the failure was the remote rejecting our credentials.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Failed { stderr, .. } => {
                let stderr = stderr.to_ascii_lowercase();
                AUTH_FAILURE_MARKERS.iter().any(|m| stderr.contains(m))
            }
            Self::Spawn { .. } => false,
        }
    }

    /// The git stderr (or spawn error) with every occurrence of each of
    /// `secrets` replaced.
    pub fn redacted_message(&self, secrets: &[&str]) -> String {
        let message = match self {
            Self::Failed { stderr, .. } => stderr.clone(),
            Self::Spawn { source, .. } => source.to_string(),
        };
        secrets
            .iter()
            .filter(|s| !s.is_empty())
            .fold(message, |message, secret| message.replace(secret, "***"))
    }
}

async fn run(command: &'static str, cmd: &mut Command) -> Result<String, GitError> {
    cmd.env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(command, "spawning git");

    let output = cmd
        .output()
        .await
        .map_err(|source| GitError::Spawn { command, source })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(GitError::Failed {
            command,
            status: output.status.to_string(),
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run `git clone --mirror <url> <dest>`.
#[instrument(skip_all, fields(dest = %dest.display()))]
pub async fn clone_mirror(url: &str, dest: &Path) -> Result<(), GitError> {
    let mut cmd = Command::new("git");
    cmd.arg("clone").arg("--mirror").arg(url).arg(dest);
    run("clone", &mut cmd).await?;
    debug!("git clone --mirror succeeded");
    Ok(())
}

/// Push every branch and tag of `repo` to `remote_url`.
///
/// An up-to-date destination is success.
#[instrument(skip_all, fields(repo = %repo.display()))]
pub async fn push_mirror(repo: &Path, remote_url: &str) -> Result<(), GitError> {
    let mut cmd = Command::new("git");
    cmd.arg("-C")
        .arg(repo)
        .arg("push")
        .arg("--porcelain")
        .arg(remote_url)
        .args(MIRROR_REFSPECS);
    run("push", &mut cmd).await?;
    debug!("git push succeeded");
    Ok(())
}

/// Count the branches and tags in `repo`.
pub async fn count_refs(repo: &Path) -> Result<usize, GitError> {
    let mut cmd = Command::new("git");
    cmd.arg("-C")
        .arg(repo)
        .arg("for-each-ref")
        .arg("--format=%(refname)")
        .arg("refs/heads")
        .arg("refs/tags");
    let stdout = run("for-each-ref", &mut cmd).await?;
    Ok(stdout.lines().filter(|l| !l.trim().is_empty()).count())
}

/// Run `git init --bare <path>`.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn init_bare(path: &Path) -> Result<(), GitError> {
    let mut cmd = Command::new("git");
    cmd.arg("init").arg("--bare").arg(path);
    run("init", &mut cmd).await?;
    Ok(())
}
