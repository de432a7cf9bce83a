//! Post-release availability probing with bounded exponential backoff.
//!
//! Each attempt delegates the condition bookkeeping to the control plane:
//! a blocking `wait` returns as soon as the `Available` condition is true
//! on the deployments matching the application's label, or fails when its
//! own budget elapses. The prober only spaces the attempts.

use gitsync_common::config::{ApplicationSpec, HealthCheckSettings};
use gitsync_common::error::SyncError;
use gitsync_common::exec::{self, ExecError, ExecOptions};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-attempt wait budget handed to the cluster wait primitive.
const WAIT_BUDGET: Duration = Duration::from_secs(30);

/// Slack on top of the wait budget for process startup and teardown.
const WAIT_SLACK: Duration = Duration::from_secs(5);

pub struct HealthProber {
    settings: HealthCheckSettings,
    kubectl_bin: String,
    cancel: CancellationToken,
}

impl HealthProber {
    pub fn new(settings: HealthCheckSettings, cancel: CancellationToken) -> Self {
        Self {
            settings,
            kubectl_bin: "kubectl".to_string(),
            cancel,
        }
    }

    /// Point at a different wait binary. Test seam.
    #[cfg(test)]
    pub fn with_binary(mut self, bin: impl Into<String>) -> Self {
        self.kubectl_bin = bin.into();
        self
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Wait for the application's deployments to become available, retrying
    /// with exponential backoff until the attempt budget runs out.
    pub async fn probe(&self, app: &ApplicationSpec) -> Result<(), SyncError> {
        let args = vec![
            "wait".to_string(),
            "--for=condition=Available".to_string(),
            "deployment".to_string(),
            "-l".to_string(),
            format!("app={}", app.name),
            "-n".to_string(),
            app.namespace.clone(),
            format!("--timeout={}s", WAIT_BUDGET.as_secs()),
        ];
        let opts = ExecOptions::with_timeout(WAIT_BUDGET + WAIT_SLACK);

        let retries = self.settings.retries;
        let mut last: Option<ExecError> = None;
        for attempt in 1..=retries {
            match exec::run(&self.kubectl_bin, &args, &opts, &self.cancel).await {
                Ok(_) => {
                    debug!(app = %app.name, attempt, "workloads available");
                    return Ok(());
                }
                Err(ExecError::Cancelled { .. }) => return Err(SyncError::Cancelled),
                Err(err) => {
                    warn!(
                        app = %app.name,
                        attempt,
                        retries,
                        error = %err,
                        "availability wait failed"
                    );
                    last = Some(err);
                    let delay = backoff_delay(&self.settings, attempt);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                    }
                }
            }
        }

        Err(SyncError::Health {
            app: app.name.clone(),
            attempts: retries,
            cause: last.map(Box::new),
        })
    }
}

/// Sleep after failed attempt `k` (1-indexed):
/// `min(initialDelay × backoffFactor^(k−1), maxDelay)`.
fn backoff_delay(settings: &HealthCheckSettings, attempt: u32) -> Duration {
    let factor = settings
        .backoff_factor
        .powi(attempt.saturating_sub(1) as i32);
    let ms = (settings.initial_delay as f64 * factor).min(settings.max_delay as f64);
    Duration::from_millis(ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn settings(retries: u32) -> HealthCheckSettings {
        HealthCheckSettings {
            enabled: true,
            retries,
            initial_delay: 10,
            backoff_factor: 2.0,
            max_delay: 40,
        }
    }

    fn app() -> ApplicationSpec {
        ApplicationSpec {
            name: "intervalai".to_string(),
            namespace: "default".to_string(),
            path: "helm-charts/intervalai".to_string(),
            value_files: vec![],
            enabled: true,
            auto_sync: true,
        }
    }

    #[test]
    fn backoff_schedule_with_defaults_is_5_10_20_seconds() {
        let defaults = HealthCheckSettings::default();
        assert_eq!(backoff_delay(&defaults, 1), Duration::from_millis(5_000));
        assert_eq!(backoff_delay(&defaults, 2), Duration::from_millis(10_000));
        assert_eq!(backoff_delay(&defaults, 3), Duration::from_millis(20_000));
    }

    #[test]
    fn backoff_is_capped_at_max_delay() {
        let defaults = HealthCheckSettings::default();
        assert_eq!(backoff_delay(&defaults, 10), Duration::from_millis(60_000));
    }

    #[test]
    fn backoff_factor_one_keeps_the_delay_constant() {
        let settings = HealthCheckSettings {
            backoff_factor: 1.0,
            ..HealthCheckSettings::default()
        };
        assert_eq!(backoff_delay(&settings, 1), backoff_delay(&settings, 5));
    }

    #[tokio::test]
    async fn probe_exhausts_the_attempt_budget() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("calls.log");
        let stub = write_stub(
            dir.path(),
            "kubectl",
            &format!("echo \"$@\" >> {}\nexit 1", log.display()),
        );

        let prober = HealthProber::new(settings(3), CancellationToken::new())
            .with_binary(stub.to_str().unwrap());
        let err = prober.probe(&app()).await.unwrap_err();

        match err {
            SyncError::Health { app, attempts, cause } => {
                assert_eq!(app, "intervalai");
                assert_eq!(attempts, 3);
                assert!(cause.is_some());
            }
            other => panic!("expected Health, got {other:?}"),
        }

        let calls = std::fs::read_to_string(&log).unwrap();
        assert_eq!(calls.lines().count(), 3, "one wait invocation per attempt");
        let first = calls.lines().next().unwrap();
        assert!(first.contains("--for=condition=Available"));
        assert!(first.contains("-l app=intervalai"));
        assert!(first.contains("-n default"));
        assert!(first.contains("--timeout=30s"));
    }

    #[tokio::test]
    async fn probe_succeeds_once_the_condition_holds() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("second-attempt");
        let stub = write_stub(
            dir.path(),
            "kubectl",
            &format!(
                "if [ -f {marker} ]; then exit 0; fi\ntouch {marker}\nexit 1",
                marker = marker.display()
            ),
        );

        let prober = HealthProber::new(settings(3), CancellationToken::new())
            .with_binary(stub.to_str().unwrap());
        prober.probe(&app()).await.unwrap();
    }

    #[tokio::test]
    async fn probe_stops_on_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let prober = HealthProber::new(settings(3), cancel);
        let err = prober.probe(&app()).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }
}
