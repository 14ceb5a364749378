//! Remote transport operations.
//!
//! Each operation is one fatal step of the job: it records what it did in
//! the trace and maps every failure onto a [`JobFailure`]. Nothing here
//! retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pivot_core::failure::JobFailure;
use pivot_core::naming;
use pivot_core::process::{CommandError, CommandOutput};
use pivot_core::resolver::{self, RemoteFile};
use pivot_core::trace::DebugTrace;
use tokio_util::sync::CancellationToken;

use crate::config::Timeouts;
use crate::remote::{shell_quote, RemoteHost};

pub struct RemoteTransport {
    host: Arc<dyn RemoteHost>,
    timeouts: Timeouts,
}

/// Turn a command result into a job failure built by `failure`.
pub(crate) fn check(
    result: Result<CommandOutput, CommandError>,
    what: &str,
    failure: fn(String) -> JobFailure,
) -> Result<CommandOutput, JobFailure> {
    match result {
        Ok(output) if output.success() => Ok(output),
        Ok(output) => Err(failure(format!(
            "{what} failed with exit code {}: {}",
            output.exit_code,
            output.summary()
        ))),
        Err(CommandError::Cancelled { .. }) => {
            Err(JobFailure::cancelled(format!("{what} cancelled")))
        }
        Err(e) => Err(failure(format!("{what} failed: {e}"))),
    }
}

impl RemoteTransport {
    pub fn new(host: Arc<dyn RemoteHost>, timeouts: Timeouts) -> Self {
        Self { host, timeouts }
    }

    /// Check that the host accepts commands at all.
    ///
    /// Exactly one trace line is written, success or not.
    pub async fn probe(
        &self,
        trace: &DebugTrace,
        cancel: &CancellationToken,
    ) -> Result<(), JobFailure> {
        let target = self.host.describe();
        let result = self
            .host
            .exec("echo ok", self.timeouts.probe, cancel)
            .await;
        match check(
            result,
            &format!("Connection test to {target}"),
            JobFailure::unreachable,
        ) {
            Ok(output) => {
                trace.record(format!(
                    "Connection test to {target} succeeded: {}",
                    output.stdout.trim()
                ));
                Ok(())
            }
            Err(failure) => {
                trace.record(failure.message.clone());
                Err(failure)
            }
        }
    }

    pub async fn create_remote_dir(
        &self,
        remote_dir: &str,
        trace: &DebugTrace,
        cancel: &CancellationToken,
    ) -> Result<(), JobFailure> {
        let result = self
            .host
            .exec(
                &format!("mkdir -p {}", shell_quote(remote_dir)),
                self.timeouts.command,
                cancel,
            )
            .await;
        check(result, "Creating remote directory", JobFailure::transfer)?;
        trace.record(format!("Created remote directory {remote_dir}"));
        Ok(())
    }

    /// Push the staged files and verify they arrived.
    ///
    /// Returns how many input files the remote directory now holds.
    pub async fn upload(
        &self,
        files: &[PathBuf],
        remote_dir: &str,
        input_extension: &str,
        trace: &DebugTrace,
        cancel: &CancellationToken,
    ) -> Result<usize, JobFailure> {
        trace.record(format!(
            "Uploading {} file(s) to {}:{remote_dir}",
            files.len(),
            self.host.describe()
        ));
        let result = self
            .host
            .push_files(files, remote_dir, self.timeouts.transfer, cancel)
            .await;
        let output = check(result, "Upload", JobFailure::transfer)?;
        trace.record(format!("Upload finished in {}ms", output.duration_ms));

        let listing = self.list_remote(remote_dir, trace, cancel).await?;
        let uploaded = listing
            .iter()
            .filter(|f| naming::has_extension(&f.name, input_extension))
            .count();
        if uploaded == 0 {
            return Err(JobFailure::transfer(format!(
                "Upload verification failed: no .{input_extension} files in {remote_dir}"
            )));
        }
        if uploaded != files.len() {
            trace.warn(format!(
                "Upload verification: expected {} file(s), found {uploaded}",
                files.len()
            ));
        } else {
            trace.record(format!("Verified {uploaded} file(s) on remote host"));
        }
        Ok(uploaded)
    }

    /// Regular files directly inside `remote_dir`, sorted by name.
    pub async fn list_remote(
        &self,
        remote_dir: &str,
        trace: &DebugTrace,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteFile>, JobFailure> {
        let command = format!(
            r"find {} -maxdepth 1 -type f -printf '%s\t%f\n'",
            shell_quote(remote_dir)
        );
        let result = self
            .host
            .exec(&command, self.timeouts.command, cancel)
            .await;
        let output = check(result, "Listing remote directory", JobFailure::transfer)?;
        let files = resolver::parse_listing(&output.stdout);
        trace.record(format!(
            "Remote directory holds {} file(s): {}",
            files.len(),
            files
                .iter()
                .map(|f| format!("{} ({} bytes)", f.name, f.size))
                .collect::<Vec<_>>()
                .join(", ")
        ));
        Ok(files)
    }

    /// Pull `{remote_dir}/{file_name}` into `local_dir`.
    pub async fn download(
        &self,
        remote_dir: &str,
        file_name: &str,
        local_dir: &Path,
        trace: &DebugTrace,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, JobFailure> {
        let remote_path = format!("{remote_dir}/{file_name}");
        let local_path = local_dir.join(file_name);
        trace.record(format!("Downloading {remote_path}"));

        let result = self
            .host
            .pull_file(&remote_path, &local_path, self.timeouts.transfer, cancel)
            .await;
        check(result, "Download", JobFailure::transfer)?;

        match tokio::fs::metadata(&local_path).await {
            Ok(meta) if meta.is_file() => {
                trace.record(format!(
                    "Downloaded {} ({} bytes)",
                    local_path.display(),
                    meta.len()
                ));
                Ok(local_path)
            }
            _ => Err(JobFailure::transfer(format!(
                "Download reported success but {} does not exist",
                local_path.display()
            ))),
        }
    }

    /// Best-effort removal of the job's remote directory.
    pub async fn remove_remote_dir(
        &self,
        remote_dir: &str,
        trace: &DebugTrace,
        cancel: &CancellationToken,
    ) -> Result<(), JobFailure> {
        let result = self
            .host
            .exec(
                &format!("rm -rf {}", shell_quote(remote_dir)),
                self.timeouts.command,
                cancel,
            )
            .await;
        check(result, "Removing remote directory", JobFailure::transfer)?;
        trace.record(format!("Removed remote directory {remote_dir}"));
        Ok(())
    }
}
