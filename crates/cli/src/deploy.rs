//! The `deploy` command: apply a plan locally, run its fork, record the result.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use serde::Serialize;

use construct::resources::attributes;
use construct::{ForkReport, ForkStatus, StatusReporter};
use executor::{ExecutorConfig, FileSecretStore, ForkRunner, InMemoryIdentityBroker};
use trigger::{Deployment, LocalProvisioner};

use crate::config::CliConfig;

/// What `deploy` prints on stdout.
#[derive(Debug, Serialize)]
pub struct DeployOutput {
    pub outputs: BTreeMap<String, String>,
    pub forks: Vec<ForkReport>,
}

/// Applies `config`'s plan under `state_dir` and hands the result to `emit`.
///
/// With `no_wait`, `emit` sees the outputs as soon as every resource exists
/// and a failed fork is not an error. Either way the fork runs to completion
/// and its final status is written back to the ledger before returning.
pub async fn run(
    config: &CliConfig,
    state_dir: &Path,
    reporter: Arc<dyn StatusReporter>,
    no_wait: bool,
    mut emit: impl FnMut(&DeployOutput) -> Result<()>,
) -> Result<DeployOutput> {
    let plan = config.construct()?.synthesize()?;

    // Local identities live for this process only; the provisioner creates
    // them here and the executor rotates their credentials here.
    let broker = Arc::new(InMemoryIdentityBroker::new());
    let provisioner = Arc::new(LocalProvisioner::open(state_dir, broker.clone()).await?);
    let secrets = Arc::new(FileSecretStore::new(state_dir.join("secrets")));
    let runner = ForkRunner::new(
        ExecutorConfig {
            timeout: config.construct.props.timeout,
            ..ExecutorConfig::default()
        },
        broker,
        secrets,
    );

    let deployment = Deployment::new(provisioner.clone(), Arc::new(runner), reporter);
    let report = deployment.apply(&plan).await?;

    if no_wait {
        emit(&DeployOutput {
            outputs: report.outputs()?,
            forks: report.fork_reports(),
        })?;
    }

    let forks = report.wait_for_forks().await;
    for fork in &forks {
        provisioner
            .update_attribute(&fork.trigger, attributes::FORK_STATUS, fork.status.as_str())
            .await?;
    }

    let output = DeployOutput {
        outputs: report.outputs()?,
        forks,
    };
    if no_wait {
        return Ok(output);
    }

    emit(&output)?;
    if let Some(failed) = output.forks.iter().find(|r| r.status != ForkStatus::Succeeded) {
        bail!(
            "fork {} ended {}: {}",
            failed.trigger,
            failed.status,
            failed.reason.as_deref().unwrap_or("no reason recorded")
        );
    }
    Ok(output)
}
