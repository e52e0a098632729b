//! propsync: keep repository custom properties in line with the systems of
//! record that own them.
//!
//! # Usage
//!
//! ```text
//! propsync [--source <adapter|all>] [--property <name|all>] [--dry-run] [--verbose]
//!          [--config <path>] [--output-dir <dir>]
//! ```
//!
//! `GITHUB_TOKEN` is required; `GITHUB_ORG` defaults to `your-org`.
//! Exit code 0 means no entity errored and no source failed.

mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;

use propsync_core::{config, EnvSettings, RunConfig, RunFlags, Selector};
use propsync_reconcile::{AdapterRegistry, CompletedRun, GithubClient, Reconciler};

/// Grace period for blocking workers still stuck in HTTP calls after the run.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "propsync",
    version,
    about = "Sync repository custom properties from external systems of record",
    long_about = None,
)]
struct Cli {
    /// Adapter to read desired state from (billing-api, github-teams, ldap, cmdb) or `all`.
    #[arg(long, value_name = "ADAPTER", default_value = "all")]
    source: Selector,

    /// Property to reconcile, or `all`.
    #[arg(long, value_name = "NAME", default_value = "all")]
    property: Selector,

    /// Compute and report changes without writing anything.
    #[arg(long)]
    dry_run: bool,

    /// Debug logging and per-entity details in the summary.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (default: ~/.propsync/config.yaml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory for the sync-results report (overrides `output_dir`).
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let env = EnvSettings::from_env()?;
    if env.org_defaulted {
        tracing::warn!(org = %env.org, "{} is not set; using the default organization", config::ORG_VAR);
    }

    let file = match &cli.config {
        Some(path) => config::load_from(path)?,
        None => config::load()?,
    };
    let mut run_config = RunConfig::resolve(
        &file,
        &env,
        RunFlags {
            source: cli.source,
            property: cli.property,
            dry_run: cli.dry_run,
            verbose: cli.verbose,
        },
    )?;
    if let Some(dir) = cli.output_dir {
        run_config.output_dir = dir;
    }

    let client = Arc::new(GithubClient::new(
        run_config.api_url.as_str(),
        run_config.org.as_str(),
        env.token.as_str(),
        run_config.timeout,
    ));
    let registry = AdapterRegistry::from_config(&file, client.clone(), run_config.timeout)?;

    output::print_header(&run_config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    let verbose = run_config.verbose;
    let completed = runtime.block_on(run(run_config, registry, client));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    let completed = completed?;

    output::print_summary(&completed.result, &completed.report_path, verbose);
    Ok(ExitCode::from(completed.result.exit_code()))
}

/// Run the reconciler with ctrl-c wired to its shutdown channel.
async fn run(
    config: RunConfig,
    registry: AdapterRegistry,
    client: Arc<GithubClient>,
) -> Result<CompletedRun> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let signal_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("received ctrl-c, stopping after in-flight entities are accounted for");
                let _ = shutdown_tx.send(());
            }
            Err(err) => tracing::error!(error = %err, "ctrl-c handler failed"),
        }
    });

    let result = Reconciler::new(config, registry, client)
        .with_shutdown(shutdown_rx)
        .run()
        .await;
    signal_handle.abort();
    result.context("reconciliation run failed")
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
