//! Per-application results and per-cycle summaries.
//!
//! A [`SyncResult`] is created when its task starts and sealed when the task
//! ends; a [`CycleSummary`] owns its results once the cycle drains. Both are
//! plain data and never mutated after sealing.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// What the release driver did for one application in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Install,
    Upgrade,
    Skip,
    None,
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Upgrade => write!(f, "upgrade"),
            Self::Skip => write!(f, "skip"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Snapshot of an error and its cause chain, detached from the live error
/// so results stay owned and immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub chain: Vec<String>,
}

impl ErrorRecord {
    /// Capture `err` and every `source()` below it.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            chain,
        }
    }

    /// Append a secondary note (e.g. a rollback failure) without displacing
    /// the original error.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.chain.push(note.into());
        self
    }
}

/// Outcome of one application's sync in one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub app: String,
    pub success: bool,
    pub action: SyncAction,
    pub error: Option<ErrorRecord>,
    pub rolled_back: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncResult {
    /// Disabled or autoSync-off application: success, no side effects.
    pub fn skipped(app: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            app: app.to_string(),
            success: true,
            action: SyncAction::Skip,
            error: None,
            rolled_back: false,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn succeeded(app: &str, action: SyncAction, started_at: DateTime<Utc>) -> Self {
        Self {
            app: app.to_string(),
            success: true,
            action,
            error: None,
            rolled_back: false,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        app: &str,
        action: SyncAction,
        error: ErrorRecord,
        rolled_back: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            app: app.to_string(),
            success: false,
            action,
            error: Some(error),
            rolled_back,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// A task that died without producing a result (panic, join failure).
    pub fn unknown_failure(message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            app: "unknown".to_string(),
            success: false,
            action: SyncAction::None,
            error: Some(ErrorRecord {
                message: message.into(),
                chain: Vec::new(),
            }),
            rolled_back: false,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Sealed record of one reconciliation cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub results: Vec<SyncResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// The repository commit was unchanged; nothing was scheduled.
    pub unchanged: bool,
    total_apps: usize,
}

impl CycleSummary {
    /// Seal a full cycle's results.
    pub fn completed(results: Vec<SyncResult>, started_at: DateTime<Utc>) -> Self {
        let total_apps = results.len();
        Self {
            results,
            started_at,
            finished_at: Utc::now(),
            unchanged: false,
            total_apps,
        }
    }

    /// Seal a no-op cycle: the commit did not change, so every application
    /// counts as skipped.
    pub fn skipped_all(total_apps: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            results: Vec::new(),
            started_at,
            finished_at: Utc::now(),
            unchanged: true,
            total_apps,
        }
    }

    pub fn total(&self) -> usize {
        self.total_apps
    }

    pub fn succeeded(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.success && matches!(r.action, SyncAction::Install | SyncAction::Upgrade))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }

    pub fn skipped(&self) -> usize {
        if self.unchanged {
            self.total_apps
        } else {
            self.results
                .iter()
                .filter(|r| r.action == SyncAction::Skip)
                .count()
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_result_is_successful_and_errorless() {
        let result = SyncResult::skipped("app", Utc::now());
        assert!(result.success);
        assert_eq!(result.action, SyncAction::Skip);
        assert!(result.error.is_none());
        assert!(!result.rolled_back);
    }

    #[test]
    fn summary_counters_partition_results() {
        let started = Utc::now();
        let results = vec![
            SyncResult::succeeded("a", SyncAction::Install, started),
            SyncResult::succeeded("b", SyncAction::Upgrade, started),
            SyncResult::skipped("c", started),
            SyncResult::failed(
                "d",
                SyncAction::Upgrade,
                ErrorRecord {
                    message: "boom".into(),
                    chain: vec![],
                },
                true,
                started,
            ),
        ];
        let summary = CycleSummary::completed(results, started);
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.skipped(), 1);
    }

    #[test]
    fn unchanged_summary_skips_everything() {
        let summary = CycleSummary::skipped_all(3, Utc::now());
        assert!(summary.unchanged);
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.succeeded(), 0);
        assert_eq!(summary.failed(), 0);
        assert_eq!(summary.skipped(), 3);
    }

    #[test]
    fn error_record_captures_the_cause_chain() {
        use crate::error::{ReleaseAction, SyncError};
        use crate::exec::ExecError;

        let err = SyncError::Release {
            action: ReleaseAction::Upgrade,
            release: "app".into(),
            cause: ExecError::Exit {
                binary: "helm".into(),
                code: 1,
                signal: None,
                stdout: String::new(),
                stderr: "chart not found".into(),
            },
        };
        let record = ErrorRecord::from_error(&err);
        assert!(record.message.contains("upgrade of release app failed"));
        assert_eq!(record.chain.len(), 1);
        assert!(record.chain[0].contains("exited with code 1"));
        assert!(
            record.chain[0].contains("chart not found"),
            "the tool's stderr must survive into the snapshot: {}",
            record.chain[0]
        );
    }
}
