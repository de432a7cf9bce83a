//! Subprocess runner for external tools.
//!
//! Processes are spawned from a program name plus an argument vector; there
//! is no shell anywhere in this module. Each call carries its own timeout,
//! and cancellation behaves exactly like a timeout: SIGTERM first, a grace
//! interval, then SIGKILL.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cap on captured bytes per stream. Output past the cap is drained and
/// discarded so the child never blocks on a full pipe.
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// Default per-call timeout when the caller does not set one.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a terminated child gets to exit before SIGKILL.
const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Per-call options for [`run`].
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Working directory for the child.
    pub cwd: Option<PathBuf>,
    /// Wall-clock budget for the whole call.
    pub timeout: Duration,
    /// Capture stdout/stderr into bounded buffers; otherwise the child
    /// inherits the parent's stdio.
    pub capture: bool,
    /// Grace interval between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            timeout: DEFAULT_TIMEOUT,
            capture: true,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

impl ExecOptions {
    /// Capture-mode options with the given timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Set the working directory.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

/// Captured output of a successfully exited subprocess.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Cap on stderr text folded into an error's display message.
const STDERR_SNIPPET_LEN: usize = 256;

/// Why a subprocess call failed.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The binary could not be spawned at all.
    #[error("failed to spawn {binary}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// The child exited nonzero (or was killed by a signal). The message
    /// carries the captured stderr; diagnostics must survive the trip
    /// through an error-chain snapshot.
    #[error("{binary} exited with code {code}{}", exit_detail(.signal, .stderr))]
    Exit {
        binary: String,
        code: i32,
        signal: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The per-call timeout elapsed before the child exited.
    #[error("{binary} timed out after {timeout:?}{}", stderr_detail(.partial_stderr))]
    Timeout {
        binary: String,
        timeout: Duration,
        partial_stdout: String,
        partial_stderr: String,
    },

    /// The cancellation token fired before the child exited.
    #[error("{binary} was cancelled")]
    Cancelled { binary: String },
}

/// Signal and stderr suffix for exit errors.
fn exit_detail(signal: &Option<i32>, stderr: &str) -> String {
    let mut detail = String::new();
    if let Some(sig) = signal {
        detail.push_str(&format!(" (signal {sig})"));
    }
    detail.push_str(&stderr_detail(stderr));
    detail
}

/// Single-line, truncated stderr suffix; empty when nothing was captured.
fn stderr_detail(stderr: &str) -> String {
    let flat = stderr.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.is_empty() {
        return String::new();
    }
    if flat.chars().count() > STDERR_SNIPPET_LEN {
        let truncated: String = flat.chars().take(STDERR_SNIPPET_LEN).collect();
        format!(": {truncated}...")
    } else {
        format!(": {flat}")
    }
}

enum WaitOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run `binary` with `args`, never through a shell.
///
/// Values originating from configuration must have passed
/// [`crate::validate`] before they reach this function.
pub async fn run(
    binary: &str,
    args: &[String],
    opts: &ExecOptions,
    cancel: &CancellationToken,
) -> Result<ExecOutput, ExecError> {
    if cancel.is_cancelled() {
        return Err(ExecError::Cancelled {
            binary: binary.to_string(),
        });
    }

    let mut cmd = Command::new(binary);
    cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
    if let Some(dir) = &opts.cwd {
        cmd.current_dir(dir);
    }
    if opts.capture {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    }

    debug!(binary, ?args, timeout = ?opts.timeout, "spawning subprocess");

    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        binary: binary.to_string(),
        source,
    })?;

    let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_capped(s)));
    let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_capped(s)));

    let outcome = tokio::select! {
        status = child.wait() => WaitOutcome::Exited(status),
        _ = tokio::time::sleep(opts.timeout) => WaitOutcome::TimedOut,
        _ = cancel.cancelled() => WaitOutcome::Cancelled,
    };

    match outcome {
        WaitOutcome::Exited(Ok(status)) => {
            let stdout = collect(stdout_task).await;
            let stderr = collect(stderr_task).await;
            if status.success() {
                Ok(ExecOutput {
                    stdout,
                    stderr,
                    exit_code: 0,
                })
            } else {
                Err(ExecError::Exit {
                    binary: binary.to_string(),
                    code: status.code().unwrap_or(-1),
                    signal: status.signal(),
                    stdout,
                    stderr,
                })
            }
        }
        WaitOutcome::Exited(Err(source)) => Err(ExecError::Spawn {
            binary: binary.to_string(),
            source,
        }),
        WaitOutcome::TimedOut => {
            terminate(&mut child, opts.kill_grace).await;
            Err(ExecError::Timeout {
                binary: binary.to_string(),
                timeout: opts.timeout,
                partial_stdout: collect(stdout_task).await,
                partial_stderr: collect(stderr_task).await,
            })
        }
        WaitOutcome::Cancelled => {
            terminate(&mut child, opts.kill_grace).await;
            // Drain the readers so the pipes close cleanly.
            let _ = collect(stdout_task).await;
            let _ = collect(stderr_task).await;
            Err(ExecError::Cancelled {
                binary: binary.to_string(),
            })
        }
    }
}

/// SIGTERM, wait out the grace interval, then SIGKILL.
async fn terminate(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        let delivered = std::process::Command::new("kill")
            .arg("-TERM")
            .arg(pid.to_string())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if delivered && tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.kill().await;
}

/// Read a stream to EOF, keeping at most [`MAX_CAPTURE_BYTES`].
async fn read_capped<R>(mut stream: R) -> Vec<u8>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if buf.len() < MAX_CAPTURE_BYTES {
                    let take = n.min(MAX_CAPTURE_BYTES - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                }
            }
        }
    }
    buf
}

async fn collect(task: Option<JoinHandle<Vec<u8>>>) -> String {
    match task {
        Some(handle) => match handle.await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => String::new(),
        },
        None => String::new(),
    }
}
