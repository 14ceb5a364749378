//! Command and file-transfer channels to the compute host.
//!
//! [`RemoteHost`] has three primitives (run a shell command, push files into
//! a directory, pull one file back), each bounded by a timeout and a
//! [`CancellationToken`]. [`SshHost`] shells out to `ssh`/`scp`;
//! [`LocalHost`] runs everything on this machine.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use pivot_core::process::{run_command, CommandError, CommandOutput};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, SshSettings};

#[async_trait::async_trait]
pub trait RemoteHost: Send + Sync {
    /// Human-readable target, e.g. `ubuntu@10.0.0.5`.
    fn describe(&self) -> String;

    /// Run `command` through the host's shell.
    async fn exec(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError>;

    /// Copy `files` into the existing directory `remote_dir`.
    async fn push_files(
        &self,
        files: &[PathBuf],
        remote_dir: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError>;

    /// Copy `remote_path` to `local_path`.
    async fn pull_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError>;
}

/// Single-quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

// ---------------------------------------------------------------------------
// SSH
// ---------------------------------------------------------------------------

/// A remote machine reached with a pre-provisioned private key.
#[derive(Debug, Clone)]
pub struct SshHost {
    host: String,
    user: String,
    key_path: PathBuf,
    connect_timeout: Duration,
}

impl SshHost {
    /// Fails if the key file does not exist.
    pub fn new(settings: &SshSettings, connect_timeout: Duration) -> Result<Self, ConfigError> {
        if !settings.key_path.is_file() {
            return Err(ConfigError::KeyNotFound(settings.key_path.clone()));
        }
        Ok(Self {
            host: settings.host.clone(),
            user: settings.user.clone(),
            key_path: settings.key_path.clone(),
            connect_timeout,
        })
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// `ssh` arguments for running `command` remotely.
    ///
    /// `-tt` forces a remote pty, so killing the local `ssh` hangs up the
    /// remote session and takes the engine down with it.
    fn exec_args(&self, command: &str) -> Vec<String> {
        let mut args = vec!["-tt".to_string()];
        args.extend(self.options());
        args.push(self.destination());
        args.push(command.to_string());
        args
    }

    /// Options shared by `ssh` and `scp`.
    fn options(&self) -> Vec<String> {
        vec![
            "-i".into(),
            self.key_path.to_string_lossy().into_owned(),
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ]
    }
}

#[async_trait::async_trait]
impl RemoteHost for SshHost {
    fn describe(&self) -> String {
        self.destination()
    }

    async fn exec(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.exec_args(command));
        run_command(&mut cmd, timeout, cancel)
            .await
            .map(strip_carriage_returns)
    }

    async fn push_files(
        &self,
        files: &[PathBuf],
        remote_dir: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new("scp");
        cmd.args(self.options())
            .args(files)
            .arg(format!("{}:{remote_dir}/", self.destination()));
        run_command(&mut cmd, timeout, cancel).await
    }

    async fn pull_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new("scp");
        cmd.args(self.options())
            .arg(format!("{}:{remote_path}", self.destination()))
            .arg(local_path);
        run_command(&mut cmd, timeout, cancel).await
    }
}

/// A pty turns `\n` into `\r\n`; listings and markers expect plain lines.
fn strip_carriage_returns(mut output: CommandOutput) -> CommandOutput {
    output.stdout = output.stdout.replace("\r\n", "\n");
    output.stderr = output.stderr.replace("\r\n", "\n");
    output
}

// ---------------------------------------------------------------------------
// Local
// ---------------------------------------------------------------------------

/// The engine runs beside the service; "remote" paths are local paths.
#[derive(Debug, Clone, Default)]
pub struct LocalHost;

impl LocalHost {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl RemoteHost for LocalHost {
    fn describe(&self) -> String {
        "localhost".into()
    }

    async fn exec(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        run_command(&mut cmd, timeout, cancel).await
    }

    async fn push_files(
        &self,
        files: &[PathBuf],
        remote_dir: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        let dir = PathBuf::from(remote_dir);
        bounded(
            async {
                for file in files {
                    let name = file.file_name().ok_or_else(|| {
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidInput,
                            format!("{} has no file name", file.display()),
                        )
                    })?;
                    tokio::fs::copy(file, dir.join(name)).await?;
                }
                Ok(format!("copied {} file(s) to {remote_dir}", files.len()))
            },
            timeout,
            cancel,
        )
        .await
    }

    async fn pull_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        bounded(
            async {
                let bytes = tokio::fs::copy(remote_path, local_path).await?;
                Ok(format!("copied {bytes} bytes from {remote_path}"))
            },
            timeout,
            cancel,
        )
        .await
    }
}

/// Run a filesystem operation under the same bounds as a subprocess.
async fn bounded<F>(
    op: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CommandOutput, CommandError>
where
    F: Future<Output = std::io::Result<String>>,
{
    if cancel.is_cancelled() {
        return Err(CommandError::Cancelled { elapsed_ms: 0 });
    }
    let start = Instant::now();
    let result = tokio::select! {
        result = tokio::time::timeout(timeout, op) => Some(result),
        () = cancel.cancelled() => None,
    };
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match result {
        Some(Ok(Ok(stdout))) => Ok(CommandOutput {
            stdout,
            stderr: String::new(),
            exit_code: 0,
            duration_ms: elapsed_ms,
        }),
        Some(Ok(Err(e))) => Err(CommandError::Io(e)),
        Some(Err(_)) => Err(CommandError::Timeout { elapsed_ms }),
        None => Err(CommandError::Cancelled { elapsed_ms }),
    }
}
