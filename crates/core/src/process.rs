//! Shared subprocess management.
//!
//! [`run_command`] spawns a prepared [`tokio::process::Command`], captures
//! stdout/stderr, and bounds the run by both a timeout and a
//! [`CancellationToken`]. Every remote call (ssh, scp) and every local
//! engine invocation goes through here.
//!
//! On Unix the child leads its own process group, and a timeout or
//! cancellation kills the whole group, so processes started by a `bash -c`
//! wrapper (the engine itself) die with it.

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Maximum stdout or stderr size captured per stream (10 MiB).
///
/// Output exceeding this limit is truncated.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stdout and stderr, formatted for a trace line.
    pub fn summary(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => "(no output)".to_string(),
            (false, true) => stdout.to_string(),
            (true, false) => format!("stderr: {stderr}"),
            (false, false) => format!("{stdout}\nstderr: {stderr}"),
        }
    }
}

/// Reasons a process produced no [`CommandOutput`].
///
/// A non-zero exit is not an error at this level; callers decide what an
/// exit code means.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("process timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("process cancelled after {elapsed_ms}ms")]
    Cancelled { elapsed_ms: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Spawn `cmd`, capture its output, and enforce `timeout` and `cancel`.
///
/// The child's process group is killed when the timeout fires or the token
/// is cancelled. Stdin is closed immediately.
pub async fn run_command(
    cmd: &mut Command,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CommandOutput, CommandError> {
    if cancel.is_cancelled() {
        return Err(CommandError::Cancelled { elapsed_ms: 0 });
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(CommandError::Spawn)?;

    // Read the pipes in their own tasks so `child.wait()` can borrow `child`.
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let stdout_task = tokio::spawn(async move { read_stream(stdout_handle).await });
    let stderr_task = tokio::spawn(async move { read_stream(stderr_handle).await });

    let waited = tokio::select! {
        result = tokio::time::timeout(timeout, child.wait()) => Some(result),
        () = cancel.cancelled() => None,
    };
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match waited {
        Some(Ok(Ok(status))) => {
            let stdout_bytes = stdout_task.await.unwrap_or_default();
            let stderr_bytes = stderr_task.await.unwrap_or_default();
            Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
                exit_code: status.code().unwrap_or(-1),
                duration_ms: elapsed_ms,
            })
        }
        Some(Ok(Err(e))) => Err(CommandError::Io(e)),
        Some(Err(_elapsed)) => {
            kill_process_group(&mut child).await;
            Err(CommandError::Timeout { elapsed_ms })
        }
        None => {
            kill_process_group(&mut child).await;
            Err(CommandError::Cancelled { elapsed_ms })
        }
    }
}

/// SIGKILL the child's process group, then reap the child.
async fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|id| libc::pid_t::try_from(id).ok()) {
        // SAFETY: kill(2) only sends a signal; the group was created by
        // `process_group(0)` at spawn, so its id equals the child's pid.
        let ret = unsafe { libc::kill(-pid, libc::SIGKILL) };
        if ret != 0 {
            tracing::debug!(pid, "Process group already gone");
        }
    }
    let _ = child.start_kill();
    let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
