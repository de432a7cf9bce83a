//! Structured reporting of per-application results and cycle summaries.
//!
//! Exactly one summary line per cycle, one INFO record per successful
//! application, one ERROR record (with the cause chain) per failed one.
//! The output format (human vs. machine) is decided once at startup by
//! the subscriber installed in `main`.

use crate::engine::CycleOutcome;
use gitsync_common::types::{CycleSummary, SyncAction, SyncResult};
use tracing::{error, info};

/// Log everything a finished tick produced.
pub fn log_outcome(outcome: &CycleOutcome) {
    match outcome {
        // The engine already warned when it dropped the tick.
        CycleOutcome::Dropped => {}
        CycleOutcome::Failed(err) => {
            error!(error = %err, cause = ?std::error::Error::source(err), "cycle aborted");
        }
        CycleOutcome::Unchanged(summary) | CycleOutcome::Completed(summary) => {
            for result in &summary.results {
                log_result(result);
            }
            info!("{}", summary_line(summary));
        }
    }
}

fn log_result(result: &SyncResult) {
    if result.success {
        if result.action == SyncAction::Skip {
            info!(app = %result.app, action = %result.action, "application skipped");
        } else {
            info!(
                app = %result.app,
                action = %result.action,
                duration_secs = result.duration_secs(),
                "application synced"
            );
        }
        return;
    }

    let (message, chain) = match &result.error {
        Some(record) => (
            record.message.clone(),
            serde_json::to_string(&record.chain).unwrap_or_default(),
        ),
        None => (String::from("unknown error"), String::new()),
    };
    error!(
        app = %result.app,
        action = %result.action,
        rolled_back = result.rolled_back,
        duration_secs = result.duration_secs(),
        error = %message,
        cause_chain = %chain,
        "application sync failed"
    );
}

/// The one-per-cycle summary line.
fn summary_line(summary: &CycleSummary) -> String {
    format!(
        "Sync completed: {}/{} succeeded, {} failed, {} skipped ({:.1}s)",
        summary.succeeded(),
        summary.total(),
        summary.failed(),
        summary.skipped(),
        summary.duration_secs()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gitsync_common::types::ErrorRecord;

    #[test]
    fn summary_line_has_the_documented_shape() {
        let started = Utc::now();
        let results = vec![
            SyncResult::succeeded("web", SyncAction::Install, started),
            SyncResult::skipped("api", started),
            SyncResult::failed(
                "worker",
                SyncAction::Upgrade,
                ErrorRecord {
                    message: "boom".into(),
                    chain: vec![],
                },
                false,
                started,
            ),
        ];
        let summary = CycleSummary::completed(results, started);
        let line = summary_line(&summary);
        assert!(line.starts_with("Sync completed: 1/3 succeeded, 1 failed, 1 skipped ("));
        assert!(line.ends_with("s)"));
    }

    #[test]
    fn unchanged_summary_reports_everything_skipped() {
        let summary = CycleSummary::skipped_all(4, Utc::now());
        let line = summary_line(&summary);
        assert!(line.starts_with("Sync completed: 0/4 succeeded, 0 failed, 4 skipped ("));
    }
}
