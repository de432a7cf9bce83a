//! gitsyncd - GitOps sync daemon.
//!
//! Drives a Kubernetes cluster to match the declared state of a Git
//! repository: poll the repo, detect change, install or upgrade each
//! declared application, probe workload health, and auto-revert failures.

#![forbid(unsafe_code)]

mod engine;
mod git;
mod health;
mod release;
mod report;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use engine::{CycleOutcome, Engine};
use git::GitWorkspace;
use gitsync_common::Config;
use health::HealthProber;
use release::ReleaseDriver;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Disposable checkout location unless overridden.
const DEFAULT_WORKSPACE: &str = "/tmp/gitops-repo";

/// How long an in-flight cycle may drain after shutdown is requested.
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    /// Human-readable one-line records.
    Text,
    /// Single-line JSON objects for log aggregators.
    Json,
}

#[derive(Parser)]
#[command(name = "gitsyncd")]
#[command(author, version, about = "GitOps sync daemon - reconciles a cluster against a Git repository")]
struct Cli {
    /// Path to the sync configuration (falls back to $CONFIG_PATH)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local checkout directory for the deploy repository
    #[arg(long, default_value = DEFAULT_WORKSPACE)]
    workspace: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Run exactly one reconciliation cycle and exit
    #[arg(long)]
    once: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }
}

fn config_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(path) = &cli.config {
        return Ok(path.clone());
    }
    if let Ok(env) = std::env::var("CONFIG_PATH") {
        return Ok(PathBuf::from(env));
    }
    anyhow::bail!("no configuration given: pass --config or set CONFIG_PATH");
}

fn spawn_signal_handler(cancel: CancellationToken) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
            _ = sigterm.recv() => info!("terminate received, shutting down"),
        }
        cancel.cancel();
    });
    Ok(())
}

/// Run one tick, giving the cycle a drain deadline once shutdown fires.
/// `None` means the deadline elapsed and the cycle was abandoned.
async fn run_tick(engine: &Engine, cancel: &CancellationToken) -> Option<CycleOutcome> {
    let drain = async {
        cancel.cancelled().await;
        tokio::time::sleep(DRAIN_DEADLINE).await;
    };
    tokio::select! {
        outcome = engine.run_cycle() => {
            report::log_outcome(&outcome);
            Some(outcome)
        }
        _ = drain => {
            warn!("drain deadline elapsed, abandoning in-flight cycle");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let path = config_path(&cli)?;
    let config = Config::load(&path).context("failed to load configuration")?;
    info!(
        config = %path.display(),
        applications = config.applications.len(),
        "configuration loaded"
    );
    if cli.check_config {
        info!("configuration OK");
        return Ok(());
    }

    let interval = config.interval().context("invalid sync interval")?;
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone())?;

    let config = Arc::new(config);
    let workspace = GitWorkspace::new(
        config.git.repository.clone(),
        config.git.branch.clone(),
        cli.workspace.clone(),
        cancel.clone(),
    );
    workspace
        .ensure()
        .await
        .context("failed to prepare git workspace")?;

    let prober = HealthProber::new(config.health_check.clone(), cancel.clone());
    let driver = Arc::new(ReleaseDriver::new(
        cli.workspace.clone(),
        &config.sync,
        prober,
        cancel.clone(),
    ));
    let engine = Engine::new(config.clone(), workspace, driver);

    info!(
        interval = ?interval,
        concurrency = config.sync.concurrency,
        auto_rollback = config.sync.auto_rollback,
        dry_run = config.sync.dry_run,
        "starting reconciliation loop"
    );

    // The first tick completes immediately, so startup reconciles at once.
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = run_tick(&engine, &cancel).await;
                if cli.once {
                    info!("single cycle requested, exiting");
                    if let Some(CycleOutcome::Failed(err)) = outcome {
                        return Err(err).context("reconciliation cycle failed");
                    }
                    break;
                }
                if cancel.is_cancelled() {
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    info!("shutdown complete");
    Ok(())
}
