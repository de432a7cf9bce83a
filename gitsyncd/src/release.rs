//! Per-application release driver: install or upgrade one chart, probe
//! health, roll back on failure.
//!
//! All inputs reaching a command line were validated at config-load time.
//! The driver never throws: every outcome, including a failed rollback,
//! is sealed into the returned [`SyncResult`].

use crate::health::HealthProber;
use chrono::Utc;
use gitsync_common::config::{ApplicationSpec, SyncSettings};
use gitsync_common::error::{ReleaseAction, SyncError};
use gitsync_common::exec::{self, ExecError, ExecOptions};
use gitsync_common::types::{ErrorRecord, SyncAction, SyncResult};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Budget for the release-status probe.
const STATUS_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for install/upgrade; `--wait` blocks until the rollout converges.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(300);

/// Budget for a rollback to the previous revision.
const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(120);

pub struct ReleaseDriver {
    workspace_root: PathBuf,
    auto_rollback: bool,
    dry_run: bool,
    prober: HealthProber,
    helm_bin: String,
    cancel: CancellationToken,
}

impl ReleaseDriver {
    pub fn new(
        workspace_root: PathBuf,
        sync: &SyncSettings,
        prober: HealthProber,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            workspace_root,
            auto_rollback: sync.auto_rollback,
            dry_run: sync.dry_run,
            prober,
            helm_bin: "helm".to_string(),
            cancel,
        }
    }

    /// Point at a different release binary. Test seam.
    #[cfg(test)]
    pub fn with_binary(mut self, bin: impl Into<String>) -> Self {
        self.helm_bin = bin.into();
        self
    }

    /// Reconcile one application. Never fails; the result is sealed on
    /// return and owned by the caller.
    pub async fn sync(&self, app: &ApplicationSpec) -> SyncResult {
        let started = Utc::now();

        if !app.enabled || !app.auto_sync {
            debug!(app = %app.name, enabled = app.enabled, auto_sync = app.auto_sync, "skipping");
            return SyncResult::skipped(&app.name, started);
        }

        let prior = match self.release_exists(app).await {
            Ok(prior) => prior,
            Err(err) => {
                // The status probe itself broke (spawn failure, timeout,
                // cancellation). Prior-release existence is unknown, so the
                // rollback precondition cannot hold.
                return SyncResult::failed(
                    &app.name,
                    SyncAction::None,
                    ErrorRecord::from_error(&err),
                    false,
                    started,
                );
            }
        };

        let action = if prior {
            SyncAction::Upgrade
        } else {
            SyncAction::Install
        };

        match self.apply(app, prior).await {
            Ok(()) => SyncResult::succeeded(&app.name, action, started),
            Err(err) => {
                let mut record = ErrorRecord::from_error(&err);
                let mut rolled_back = false;
                if prior && self.auto_rollback && !self.dry_run && !err.is_cancelled() {
                    match self.rollback(app).await {
                        Ok(()) => rolled_back = true,
                        Err(rollback_err) => {
                            warn!(app = %app.name, error = %rollback_err, "rollback failed");
                            record = record.with_note(format!("rollback also failed: {rollback_err}"));
                        }
                    }
                }
                SyncResult::failed(&app.name, action, record, rolled_back, started)
            }
        }
    }

    /// One status invocation; the release tool reports "no such release"
    /// as a nonzero exit, which is not an error here.
    async fn release_exists(&self, app: &ApplicationSpec) -> Result<bool, SyncError> {
        let args = vec![
            "status".to_string(),
            app.name.clone(),
            "-n".to_string(),
            app.namespace.clone(),
        ];
        match exec::run(
            &self.helm_bin,
            &args,
            &ExecOptions::with_timeout(STATUS_TIMEOUT),
            &self.cancel,
        )
        .await
        {
            Ok(_) => Ok(true),
            Err(ExecError::Exit { .. }) => Ok(false),
            Err(cause) => Err(SyncError::Release {
                action: ReleaseAction::Status,
                release: app.name.clone(),
                cause,
            }),
        }
    }

    /// Install or upgrade, then probe health unless this was a dry run.
    async fn apply(&self, app: &ApplicationSpec, prior: bool) -> Result<(), SyncError> {
        let args = self.release_args(app, prior);
        let action = if prior {
            ReleaseAction::Upgrade
        } else {
            ReleaseAction::Install
        };
        debug!(app = %app.name, %action, dry_run = self.dry_run, "applying chart");
        exec::run(
            &self.helm_bin,
            &args,
            &ExecOptions::with_timeout(RELEASE_TIMEOUT),
            &self.cancel,
        )
        .await
        .map_err(|cause| SyncError::Release {
            action,
            release: app.name.clone(),
            cause,
        })?;

        if self.dry_run {
            // No real rollout happened; probing would block on nothing.
            debug!(app = %app.name, "dry run, skipping health probe");
            return Ok(());
        }
        if self.prober.enabled() {
            self.prober.probe(app).await?;
        }
        Ok(())
    }

    fn release_args(&self, app: &ApplicationSpec, prior: bool) -> Vec<String> {
        let chart = self.workspace_root.join(&app.path);
        let mut args = vec![
            if prior { "upgrade" } else { "install" }.to_string(),
            app.name.clone(),
            chart.display().to_string(),
            "-n".to_string(),
            app.namespace.clone(),
        ];
        for file in &app.value_files {
            args.push("-f".to_string());
            args.push(chart.join(file).display().to_string());
        }
        if !prior {
            args.push("--create-namespace".to_string());
        }
        args.push("--wait".to_string());
        if self.dry_run {
            args.push("--dry-run".to_string());
        }
        args
    }

    /// Revert to the previous revision; the tool's default target.
    async fn rollback(&self, app: &ApplicationSpec) -> Result<(), SyncError> {
        warn!(app = %app.name, "rolling back release");
        let args = vec![
            "rollback".to_string(),
            app.name.clone(),
            "-n".to_string(),
            app.namespace.clone(),
        ];
        exec::run(
            &self.helm_bin,
            &args,
            &ExecOptions::with_timeout(ROLLBACK_TIMEOUT),
            &self.cancel,
        )
        .await
        .map_err(|cause| SyncError::Release {
            action: ReleaseAction::Rollback,
            release: app.name.clone(),
            cause,
        })?;
        Ok(())
    }
}
