//! Shared library for the gitsync daemon.
//!
//! Everything that both the daemon and its tests need lives here: the
//! declarative configuration model, input validation, the error taxonomy,
//! the subprocess runner, and the per-cycle result types.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod exec;
pub mod types;
pub mod validate;

pub use config::{ApplicationSpec, Config, GitSettings, HealthCheckSettings, SyncSettings};
pub use error::{ReleaseAction, SyncError};
pub use exec::{ExecError, ExecOptions, ExecOutput};
pub use types::{CycleSummary, ErrorRecord, SyncAction, SyncResult};
pub use validate::{parse_duration, validate, InputKind, ValidationError};
