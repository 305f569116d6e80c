//! `forked-repo` CLI.
//!
//! Composition root for the workspace:
//!
//! - `synth` turns a config file into the JSON template of its plan.
//! - `deploy` applies that plan against the local backend and runs the fork
//!   once, after the repository and credential grants exist.
//! - `fork` is the Fork Executor entry point. It reads `SRC_REPO`,
//!   `DEST_REPO`, and optionally `USER_NAME` or `DEST_SECRET` from the
//!   process environment.
//!
//! Every command logs to stderr and prints its result as JSON on stdout.

mod config;
mod deploy;
mod observability;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use construct::{ExecutorTimeout, ForkRequest, IdentityBroker, SecretStore, StatusReporter};
use executor::{
    ExecutorConfig, FileSecretStore, ForkRunner, HttpIdentityBroker, InMemoryIdentityBroker,
    InMemorySecretStore,
};
use trigger::{FanOutReporter, HttpStatusReporter, TracingStatusReporter};

#[derive(Parser)]
#[command(name = "forked-repo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision a repository and fill it with a mirror of another", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the JSON template for a config file
    Synth {
        /// Config file (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Write the template here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply the plan locally and run the fork once
    Deploy {
        /// Config file (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Directory holding repositories, the ledger, and `secrets/`
        #[arg(long, env = "FORKED_REPO_STATE_DIR")]
        state_dir: PathBuf,

        /// PUT every fork status report to this URL
        #[arg(long, env = "FORKED_REPO_STATUS_URL")]
        status_url: Option<String>,

        /// Print outputs as soon as resources exist; a failed fork does not
        /// fail the command
        #[arg(long)]
        no_wait: bool,
    },

    /// Run the Fork Executor against the process environment
    Fork {
        /// Directory of secret files, one per secret name
        #[arg(long, env = "FORKED_REPO_SECRETS_DIR")]
        secrets_dir: Option<PathBuf>,

        /// Identity broker base URL; without it identities are kept in memory
        #[arg(long, env = "FORKED_REPO_BROKER_URL")]
        broker_url: Option<String>,

        /// Bearer token for the identity broker
        #[arg(long, env = "FORKED_REPO_BROKER_TOKEN", hide_env_values = true)]
        broker_token: Option<String>,

        /// Time budget: "<n>s", "<n>m", or "unbounded"
        #[arg(long, env = "FORKED_REPO_TIMEOUT", default_value = "5m")]
        timeout: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let telemetry = observability::init()?;

    let result = match cli.command {
        Commands::Synth { config, output } => synth(&config, output.as_deref()),
        Commands::Deploy {
            config,
            state_dir,
            status_url,
            no_wait,
        } => deploy(&config, &state_dir, status_url, no_wait).await,
        Commands::Fork {
            secrets_dir,
            broker_url,
            broker_token,
            timeout,
        } => fork(secrets_dir, broker_url, broker_token, &timeout).await,
    };

    telemetry.shutdown();
    result
}

fn synth(config_path: &Path, output: Option<&Path>) -> Result<()> {
    let config = config::load_config(config_path)?;
    let plan = config.construct()?.synthesize()?;
    let template = serde_json::to_string_pretty(&plan.to_template()?)?;

    match output {
        Some(path) => {
            std::fs::write(path, template + "\n")
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), resources = plan.resources().len(), "template written");
        }
        None => println!("{template}"),
    }
    Ok(())
}

async fn deploy(
    config_path: &Path,
    state_dir: &Path,
    status_url: Option<String>,
    no_wait: bool,
) -> Result<()> {
    let config = config::load_config(config_path)?;
    let reporter: Arc<dyn StatusReporter> = match status_url {
        Some(url) => Arc::new(FanOutReporter::new(vec![
            Arc::new(TracingStatusReporter) as Arc<dyn StatusReporter>,
            Arc::new(HttpStatusReporter::new(url)?),
        ])),
        None => Arc::new(TracingStatusReporter),
    };

    deploy::run(&config, state_dir, reporter, no_wait, |out| print_json(out)).await?;
    Ok(())
}

async fn fork(
    secrets_dir: Option<PathBuf>,
    broker_url: Option<String>,
    broker_token: Option<String>,
    timeout: &str,
) -> Result<()> {
    let timeout = ExecutorTimeout::parse(timeout).map_err(|e| anyhow!("invalid --timeout: {e}"))?;
    let request = ForkRequest::from_lookup(|key| std::env::var(key).ok())?;

    let broker: Arc<dyn IdentityBroker> = match broker_url {
        Some(url) => {
            let broker = HttpIdentityBroker::new(url)?;
            Arc::new(match broker_token {
                Some(token) => broker.with_token(token),
                None => broker,
            })
        }
        None => {
            warn!("no identity broker configured; identities are kept in memory");
            Arc::new(InMemoryIdentityBroker::new())
        }
    };
    let secrets: Arc<dyn SecretStore> = match secrets_dir {
        Some(dir) => Arc::new(FileSecretStore::new(dir)),
        None => Arc::new(InMemorySecretStore::new()),
    };

    let runner = ForkRunner::new(
        ExecutorConfig {
            timeout,
            ..ExecutorConfig::default()
        },
        broker,
        secrets,
    );
    let summary = runner.run(&request).await?;
    print_json(&summary)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
