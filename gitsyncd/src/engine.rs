//! The reconciliation engine: refresh → detect → schedule → drain → seal.
//!
//! Cycles are strictly serialized; an overlapping tick is dropped, never
//! queued. Per-application sync tasks run concurrently under a semaphore
//! of the configured capacity, and a task can never take the cycle down
//! with it.

use crate::git::GitWorkspace;
use crate::release::ReleaseDriver;
use chrono::Utc;
use gitsync_common::config::Config;
use gitsync_common::error::SyncError;
use gitsync_common::types::{CycleSummary, SyncResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// What one tick of the engine produced.
#[derive(Debug)]
pub enum CycleOutcome {
    /// A cycle was already in progress; this tick was dropped.
    Dropped,
    /// Refresh or HEAD detection failed; nothing was applied and the
    /// last-applied commit is unchanged.
    Failed(SyncError),
    /// The commit did not change; only refresh and comparison ran.
    Unchanged(CycleSummary),
    /// A full reconciliation ran and the commit advanced.
    Completed(CycleSummary),
}

pub struct Engine {
    config: Arc<Config>,
    workspace: GitWorkspace,
    driver: Arc<ReleaseDriver>,
    last_applied: Mutex<Option<String>>,
    cycle_active: AtomicBool,
}

impl Engine {
    pub fn new(config: Arc<Config>, workspace: GitWorkspace, driver: Arc<ReleaseDriver>) -> Self {
        Self {
            config,
            workspace,
            driver,
            last_applied: Mutex::new(None),
            cycle_active: AtomicBool::new(false),
        }
    }

    /// The commit the cluster was last reconciled against.
    pub fn last_applied_commit(&self) -> Option<String> {
        self.last_applied.lock().unwrap().clone()
    }

    /// Run one reconciliation cycle. Non-reentrant: a tick arriving while
    /// a cycle is active is dropped with a warning.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self
            .cycle_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("tick dropped: a reconciliation cycle is already in progress");
            return CycleOutcome::Dropped;
        }
        let outcome = self.cycle().await;
        self.cycle_active.store(false, Ordering::SeqCst);
        outcome
    }

    async fn cycle(&self) -> CycleOutcome {
        let started = Utc::now();

        if let Err(err) = self.workspace.refresh().await {
            return CycleOutcome::Failed(err);
        }

        let commit = match self.workspace.current_commit().await {
            Ok(commit) => commit,
            Err(err) => return CycleOutcome::Failed(err),
        };

        let last = self.last_applied.lock().unwrap().clone();
        if last.as_deref() == Some(commit.as_str()) {
            debug!(%commit, "commit unchanged, nothing to reconcile");
            return CycleOutcome::Unchanged(CycleSummary::skipped_all(
                self.config.applications.len(),
                started,
            ));
        }

        info!(%commit, previous = ?last, apps = self.config.applications.len(), "change detected");
        let results = self.schedule().await;

        // The commit advances even when some applications failed: a broken
        // commit must not hot-loop, and a later fix re-triggers every app.
        *self.last_applied.lock().unwrap() = Some(commit);

        CycleOutcome::Completed(CycleSummary::completed(results, started))
    }

    /// Fan out one sync task per application, at most `concurrency` in
    /// flight, and wait for all of them.
    async fn schedule(&self) -> Vec<SyncResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.sync.concurrency));
        let mut handles = Vec::with_capacity(self.config.applications.len());

        for app in self.config.applications.iter().cloned() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break, // the semaphore is never closed
            };
            let driver = self.driver.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                driver.sync(&app).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(err) => {
                    error!(error = %err, "sync task died; recording a failed result");
                    results.push(SyncResult::unknown_failure(format!(
                        "sync task failed: {err}"
                    )));
                }
            }
        }
        results
    }
}
