//! Declarative sync configuration: YAML model, defaults, and total
//! validation at load time.
//!
//! The loaded [`Config`] is immutable for the life of the process;
//! changing it means restarting the daemon. Every field that can ever
//! appear on a command line is validated here, so downstream code never
//! re-checks.

use crate::error::SyncError;
use crate::validate::{parse_duration, validate, InputKind, ValidationError};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONCURRENCY: usize = 3;
const DEFAULT_HEALTH_RETRIES: u32 = 3;
const DEFAULT_INITIAL_DELAY_MS: u64 = 5_000;
const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_health_retries() -> u32 {
    DEFAULT_HEALTH_RETRIES
}

fn default_initial_delay() -> u64 {
    DEFAULT_INITIAL_DELAY_MS
}

fn default_backoff_factor() -> f64 {
    DEFAULT_BACKOFF_FACTOR
}

fn default_max_delay() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

fn default_true() -> bool {
    true
}

/// One declared unit of deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ApplicationSpec {
    /// Release name, also used as the `app=<name>` workload selector.
    pub name: String,
    /// Target namespace.
    pub namespace: String,
    /// Chart directory, relative to the repository root.
    pub path: String,
    /// Value files, relative to the chart directory, applied in order.
    #[serde(default)]
    pub value_files: Vec<String>,
    /// Participates in reconciliation at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Reconciled automatically on change.
    #[serde(default = "default_true")]
    pub auto_sync: bool,
}

/// Reconciliation loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncSettings {
    /// Poll interval, `<N>{s|m|h}`.
    pub interval: String,
    /// Max concurrent per-application sync tasks.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Roll a failed release back to its previous revision.
    #[serde(default)]
    pub auto_rollback: bool,
    /// Pass `--dry-run` to every install/upgrade.
    #[serde(default)]
    pub dry_run: bool,
}

/// Source repository settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GitSettings {
    /// Clone URL.
    pub repository: String,
    /// Branch to pin the workspace to.
    pub branch: String,
}

/// Post-release availability probing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HealthCheckSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Attempts before giving up.
    #[serde(default = "default_health_retries")]
    pub retries: u32,
    /// First inter-attempt sleep, milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay: u64,
    /// Multiplier applied per attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Sleep ceiling, milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay: u64,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            retries: DEFAULT_HEALTH_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY_MS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay: DEFAULT_MAX_DELAY_MS,
        }
    }
}

/// The whole declarative configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    pub sync: SyncSettings,
    pub git: GitSettings,
    #[serde(default)]
    pub health_check: HealthCheckSettings,
    #[serde(default)]
    pub applications: Vec<ApplicationSpec>,
}

impl Config {
    /// Parse and validate a config document.
    pub fn from_yaml(raw: &str, path: &Path) -> Result<Self, SyncError> {
        let config: Config = serde_yaml::from_str(raw).map_err(|e| SyncError::Config {
            path: path.to_path_buf(),
            field: "document".to_string(),
            cause: Box::new(SyncError::Internal(e.to_string())),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// Load and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let raw = std::fs::read_to_string(path).map_err(|e| SyncError::Config {
            path: path.to_path_buf(),
            field: "document".to_string(),
            cause: Box::new(SyncError::Internal(format!("read failed: {e}"))),
        })?;
        Self::from_yaml(&raw, path)
    }

    /// The parsed poll interval. Always succeeds after validation.
    pub fn interval(&self) -> Result<Duration, SyncError> {
        parse_duration(&self.sync.interval, "sync.interval").map_err(SyncError::from)
    }

    fn validate(&self, path: &Path) -> Result<(), SyncError> {
        let fail = |field: &str, cause: SyncError| SyncError::Config {
            path: path.to_path_buf(),
            field: field.to_string(),
            cause: Box::new(cause),
        };
        let violation = |field: &str, value: String, rule: &str| {
            SyncError::Validation(ValidationError {
                field: field.to_string(),
                value,
                rule: rule.to_string(),
            })
        };

        parse_duration(&self.sync.interval, "sync.interval")
            .map_err(|e| fail("sync.interval", e.into()))?;
        if self.sync.concurrency < 1 {
            return Err(fail(
                "sync.concurrency",
                violation(
                    "sync.concurrency",
                    self.sync.concurrency.to_string(),
                    "must be at least 1",
                ),
            ));
        }

        if self.git.repository.trim().is_empty() {
            return Err(fail(
                "git.repository",
                violation("git.repository", self.git.repository.clone(), "must not be empty"),
            ));
        }
        validate(&self.git.branch, InputKind::Branch, "git.branch")
            .map_err(|e| fail("git.branch", e.into()))?;

        let hc = &self.health_check;
        if hc.retries < 1 {
            return Err(fail(
                "healthCheck.retries",
                violation("healthCheck.retries", hc.retries.to_string(), "must be at least 1"),
            ));
        }
        if hc.backoff_factor < 1.0 {
            return Err(fail(
                "healthCheck.backoffFactor",
                violation(
                    "healthCheck.backoffFactor",
                    hc.backoff_factor.to_string(),
                    "must be at least 1.0",
                ),
            ));
        }
        if hc.max_delay < hc.initial_delay {
            return Err(fail(
                "healthCheck.maxDelay",
                violation(
                    "healthCheck.maxDelay",
                    hc.max_delay.to_string(),
                    "must be >= initialDelay",
                ),
            ));
        }

        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        for (i, app) in self.applications.iter().enumerate() {
            let field_name = format!("applications[{i}].name");
            validate(&app.name, InputKind::K8sName, &field_name)
                .map_err(|e| fail(&field_name, e.into()))?;

            let field_ns = format!("applications[{i}].namespace");
            validate(&app.namespace, InputKind::K8sName, &field_ns)
                .map_err(|e| fail(&field_ns, e.into()))?;

            let field_path = format!("applications[{i}].path");
            validate(&app.path, InputKind::RelPath, &field_path)
                .map_err(|e| fail(&field_path, e.into()))?;

            for (j, file) in app.value_files.iter().enumerate() {
                let field_vf = format!("applications[{i}].valueFiles[{j}]");
                validate(file, InputKind::RelPath, &field_vf)
                    .map_err(|e| fail(&field_vf, e.into()))?;
            }

            if !seen.insert((app.namespace.as_str(), app.name.as_str())) {
                return Err(fail(
                    &field_name,
                    violation(
                        &field_name,
                        format!("{}/{}", app.namespace, app.name),
                        "duplicate (namespace, name) pair",
                    ),
                ));
            }
        }

        Ok(())
    }
}
