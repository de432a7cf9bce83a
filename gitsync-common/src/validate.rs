//! Input validation for values that end up on external command lines.
//!
//! Every field of the declarative config that the daemon will ever pass to
//! `git`, `helm`, or `kubectl` must be accepted here at config-load time.
//! The release driver and health prober assume validated input and never
//! re-check.

use regex::Regex;
use std::path::{Component, Path};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Kubernetes DNS labels cap at 253 characters for resource names.
const K8S_NAME_MAX_LEN: usize = 253;

/// Git refname length cap we enforce on configured branches.
const BRANCH_MAX_LEN: usize = 255;

static K8S_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("constant regex pattern is valid")
});

static BRANCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9/_.\-]+$").expect("constant regex pattern is valid")
});

static DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+[smh]$").expect("constant regex pattern is valid"));

/// What shape a configured value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Kubernetes DNS-label name (release names, namespaces).
    K8sName,
    /// Git branch name.
    Branch,
    /// Path relative to the repository root, no traversal.
    RelPath,
    /// Duration string of the form `<N>{s|m|h}`.
    Duration,
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::K8sName => write!(f, "k8s name"),
            Self::Branch => write!(f, "branch"),
            Self::RelPath => write!(f, "relative path"),
            Self::Duration => write!(f, "duration"),
        }
    }
}

/// A configured value violated its kind's rules.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {field}: {value:?} ({rule})")]
pub struct ValidationError {
    /// Config field the value came from.
    pub field: String,
    /// The offending value, verbatim.
    pub value: String,
    /// Which rule it broke.
    pub rule: String,
}

impl ValidationError {
    fn new(field: &str, value: &str, rule: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
            rule: rule.into(),
        }
    }
}

/// Validate `value` against `kind`, attributing failures to `field`.
pub fn validate(value: &str, kind: InputKind, field: &str) -> Result<(), ValidationError> {
    match kind {
        InputKind::K8sName => validate_k8s_name(value, field),
        InputKind::Branch => validate_branch(value, field),
        InputKind::RelPath => validate_rel_path(value, field),
        InputKind::Duration => parse_duration(value, field).map(|_| ()),
    }
}

/// Lowercase alphanumerics and dashes, must start and end alphanumeric.
pub fn validate_k8s_name(value: &str, field: &str) -> Result<(), ValidationError> {
    if value.len() > K8S_NAME_MAX_LEN {
        return Err(ValidationError::new(
            field,
            value,
            format!("longer than {K8S_NAME_MAX_LEN} characters"),
        ));
    }
    if !K8S_NAME.is_match(value) {
        return Err(ValidationError::new(
            field,
            value,
            "must match ^[a-z0-9]([-a-z0-9]*[a-z0-9])?$",
        ));
    }
    Ok(())
}

/// Branch names: restricted charset, bounded length, no `..`.
pub fn validate_branch(value: &str, field: &str) -> Result<(), ValidationError> {
    if value.len() > BRANCH_MAX_LEN {
        return Err(ValidationError::new(
            field,
            value,
            format!("longer than {BRANCH_MAX_LEN} characters"),
        ));
    }
    if !BRANCH.is_match(value) {
        return Err(ValidationError::new(
            field,
            value,
            "must match ^[A-Za-z0-9/_.\\-]+$",
        ));
    }
    if value.contains("..") {
        return Err(ValidationError::new(field, value, "must not contain `..`"));
    }
    Ok(())
}

/// Relative paths: not absolute, no `..` segment anywhere.
pub fn validate_rel_path(value: &str, field: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new(field, value, "must not be empty"));
    }
    let path = Path::new(value);
    if path.is_absolute() || value.starts_with('/') {
        return Err(ValidationError::new(field, value, "must not be absolute"));
    }
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(ValidationError::new(
                    field,
                    value,
                    "must not contain a `..` segment",
                ));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ValidationError::new(field, value, "must not be absolute"));
            }
            Component::Normal(_) | Component::CurDir => {}
        }
    }
    Ok(())
}

/// Parse a `<N>{s|m|h}` duration string. Zero durations are rejected.
pub fn parse_duration(value: &str, field: &str) -> Result<Duration, ValidationError> {
    if !DURATION.is_match(value) {
        return Err(ValidationError::new(
            field,
            value,
            "must match ^[0-9]+[smh]$",
        ));
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let n: u64 = digits
        .parse()
        .map_err(|_| ValidationError::new(field, value, "number out of range"))?;
    if n == 0 {
        return Err(ValidationError::new(field, value, "must be at least 1"));
    }
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        _ => unreachable!("regex admits only s, m, h"),
    };
    Ok(Duration::from_secs(secs))
}
