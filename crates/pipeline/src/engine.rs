//! Stitching engine driver.
//!
//! The engine is invoked twice in the job's remote directory: once to build
//! a project file from the uploaded images, once to render it. A render that
//! prints one of the configured failure markers is a semantic failure
//! (`InsufficientOverlap`) no matter what the exit code says.

use std::sync::Arc;
use std::time::Duration;

use pivot_core::failure::JobFailure;
use pivot_core::naming;
use pivot_core::process::{CommandError, CommandOutput};
use pivot_core::trace::DebugTrace;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::remote::{shell_quote, RemoteHost};
use crate::transport::check;

/// How a stitch run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StitchVerdict {
    Stitched,
    /// The engine reported that the images do not overlap enough.
    InsufficientOverlap { marker: String },
    Crashed { exit_code: i32 },
}

/// Classify a finished stitch run. Markers are checked before the exit code.
pub fn classify_stitch(output: &CommandOutput, markers: &[String]) -> StitchVerdict {
    if let Some(marker) = markers.iter().find(|m| output.stdout.contains(m.as_str())) {
        return StitchVerdict::InsufficientOverlap {
            marker: marker.clone(),
        };
    }
    if output.success() {
        StitchVerdict::Stitched
    } else {
        StitchVerdict::Crashed {
            exit_code: output.exit_code,
        }
    }
}

pub struct StitchEngine {
    host: Arc<dyn RemoteHost>,
    engine_path: String,
    input_extension: String,
    failure_markers: Vec<String>,
    timeout: Duration,
    check_timeout: Duration,
}

impl StitchEngine {
    pub fn new(host: Arc<dyn RemoteHost>, config: &PipelineConfig) -> Self {
        Self {
            host,
            engine_path: config.engine_path.clone(),
            input_extension: config.input_extension.clone(),
            failure_markers: config.failure_markers.clone(),
            timeout: config.timeouts.engine,
            check_timeout: config.timeouts.command,
        }
    }

    /// The engine path is left unquoted so a leading `~` expands remotely.
    pub fn create_project_command(&self, remote_dir: &str, project_name: &str) -> String {
        let dir = shell_quote(remote_dir);
        format!(
            "cd {dir} && {engine} -createproject {dir}/*.{ext} -output {dir}/{project}",
            engine = self.engine_path,
            ext = self.input_extension,
            project = naming::project_file_name(project_name),
        )
    }

    pub fn project_check_command(&self, remote_dir: &str, project_name: &str) -> String {
        format!(
            "test -f {}/{}",
            shell_quote(remote_dir),
            naming::project_file_name(project_name)
        )
    }

    pub fn stitch_command(&self, remote_dir: &str, project_name: &str) -> String {
        let dir = shell_quote(remote_dir);
        format!(
            "cd {dir} && {engine} -stitchnogui {dir}/{project}",
            engine = self.engine_path,
            project = naming::project_file_name(project_name),
        )
    }

    /// Phase one: build `{project}.pts` from the uploaded images.
    ///
    /// A clean exit is not enough; the project file must exist afterwards.
    pub async fn create_project(
        &self,
        remote_dir: &str,
        project_name: &str,
        trace: &DebugTrace,
        cancel: &CancellationToken,
    ) -> Result<(), JobFailure> {
        let command = self.create_project_command(remote_dir, project_name);
        trace.record(format!("Creating stitching project: {command}"));

        let result = self.host.exec(&command, self.timeout, cancel).await;
        if let Ok(output) = &result {
            trace.record(format!("Project creation output: {}", output.summary()));
        }
        check(result, "Project creation", JobFailure::engine)?;

        let result = self
            .host
            .exec(
                &self.project_check_command(remote_dir, project_name),
                self.check_timeout,
                cancel,
            )
            .await;
        let what = format!("Check for {}", naming::project_file_name(project_name));
        check(result, &what, JobFailure::engine)?;
        trace.record(format!(
            "Created project {}",
            naming::project_file_name(project_name)
        ));
        Ok(())
    }

    /// Phase two: render the project.
    pub async fn stitch(
        &self,
        remote_dir: &str,
        project_name: &str,
        trace: &DebugTrace,
        cancel: &CancellationToken,
    ) -> Result<(), JobFailure> {
        let command = self.stitch_command(remote_dir, project_name);
        trace.record(format!("Stitching panorama: {command}"));

        let output = match self.host.exec(&command, self.timeout, cancel).await {
            Ok(output) => output,
            Err(CommandError::Cancelled { .. }) => {
                return Err(JobFailure::cancelled("Stitching cancelled"));
            }
            Err(e) => return Err(JobFailure::engine(format!("Stitching failed: {e}"))),
        };
        trace.record(format!(
            "Stitching output ({}ms): {}",
            output.duration_ms,
            output.summary()
        ));

        match classify_stitch(&output, &self.failure_markers) {
            StitchVerdict::Stitched => {
                trace.record("Stitching finished");
                Ok(())
            }
            StitchVerdict::InsufficientOverlap { marker } => {
                trace.record(format!("Engine reported: {marker}"));
                Err(JobFailure::insufficient_overlap())
            }
            StitchVerdict::Crashed { exit_code } => Err(JobFailure::engine(format!(
                "Stitching failed with exit code {exit_code}: {}",
                output.summary()
            ))),
        }
    }
}
