//! The closed error taxonomy for the sync service.
//!
//! Every failure the daemon can produce is one variant of [`SyncError`];
//! structural detail (offending field, release action, attempt count) lives
//! in variant fields, and causes chain through `#[source]`.

use crate::exec::ExecError;
use crate::validate::ValidationError;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Which release-tool operation a [`SyncError::Release`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseAction {
    Install,
    Upgrade,
    Status,
    Rollback,
}

impl std::fmt::Display for ReleaseAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Upgrade => write!(f, "upgrade"),
            Self::Status => write!(f, "status"),
            Self::Rollback => write!(f, "rollback"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// The configuration file could not be loaded or failed validation.
    /// Fatal at startup.
    #[error("config error in {} at `{field}`", path.display())]
    Config {
        path: PathBuf,
        field: String,
        #[source]
        cause: Box<SyncError>,
    },

    /// A declared value broke its input rules.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A git operation against the workspace failed. Aborts the cycle.
    #[error("git {operation} failed")]
    Git {
        operation: &'static str,
        #[source]
        cause: ExecError,
    },

    /// A release-tool operation failed. Per-application.
    #[error("{action} of release {release} failed")]
    Release {
        action: ReleaseAction,
        release: String,
        #[source]
        cause: ExecError,
    },

    /// Workloads never became available within the retry budget.
    #[error("health check for {app} failed after {attempts} attempts")]
    Health {
        app: String,
        attempts: u32,
        #[source]
        cause: Option<Box<ExecError>>,
    },

    /// A raw subprocess failure outside any higher-level operation.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Shutdown interrupted the operation.
    #[error("cancelled by shutdown")]
    Cancelled,

    /// Plumbing failures (I/O, YAML parsing) with no richer shape.
    #[error("{0}")]
    Internal(String),
}

impl SyncError {
    /// True when this failure was caused by shutdown cancellation,
    /// however deep the nesting. Cancelled work never triggers rollback.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Exec(cause) => matches!(cause, ExecError::Cancelled { .. }),
            Self::Git { cause, .. } | Self::Release { cause, .. } => {
                matches!(cause, ExecError::Cancelled { .. })
            }
            Self::Health { cause, .. } => cause
                .as_deref()
                .is_some_and(|c| matches!(c, ExecError::Cancelled { .. })),
            Self::Config { cause, .. } => cause.is_cancelled(),
            Self::Validation(_) | Self::Internal(_) => false,
        }
    }
}
