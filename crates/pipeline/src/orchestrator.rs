//! Job orchestrator.
//!
//! Drives one job through
//! `Created → Staged → Connected → Uploaded → ProjectCreated → Stitched →
//! OutputResolved → Retrieved → Complete`, stopping at the first failure.
//! The durable record is written on creation, after every transition and
//! once more after cleanup. Cleanup runs after every terminal state with a
//! fresh token, so a cancelled job still releases its directories.

use std::path::PathBuf;
use std::sync::Arc;

use pivot_core::failure::JobFailure;
use pivot_core::job::{Job, JobRequest, JobState};
use pivot_core::resolver::{self, MatchReason, OutputQuery};
use pivot_core::store::{JobRecord, JobStore};
use pivot_core::trace::TraceEntry;
use pivot_core::types::JobId;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::engine::StitchEngine;
use crate::remote::RemoteHost;
use crate::source::{stage_sources, SourceFetcher};
use crate::transport::RemoteTransport;
use crate::workspace::WorkspaceManager;

/// Final view of a job, handed back to the caller.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub state: JobState,
    pub project_name: String,
    pub result_ref: Option<String>,
    pub result_path: Option<PathBuf>,
    /// Preview of the result; absent when it could not be rendered.
    pub thumbnail_ref: Option<String>,
    pub failure: Option<JobFailure>,
    pub trace: Vec<TraceEntry>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.state == JobState::Complete
    }
}

/// A panorama moved into the results directory.
struct Published {
    result_ref: String,
    path: PathBuf,
    thumbnail_ref: Option<String>,
}

/// Which directories a job has created so far.
#[derive(Debug, Default)]
struct Footprint {
    local: bool,
    remote: bool,
}

pub struct JobOrchestrator {
    workspace: WorkspaceManager,
    transport: RemoteTransport,
    engine: StitchEngine,
    store: Arc<dyn JobStore>,
    remote_root: String,
    input_extension: String,
    output_extension: String,
    result_url_prefix: String,
    keep_workspaces: bool,
}

impl JobOrchestrator {
    pub fn new(
        config: &PipelineConfig,
        host: Arc<dyn RemoteHost>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            workspace: WorkspaceManager::new(&config.staging_root, &config.results_root),
            transport: RemoteTransport::new(Arc::clone(&host), config.timeouts),
            engine: StitchEngine::new(host, config),
            store,
            remote_root: config.remote_root.clone(),
            input_extension: config.input_extension.clone(),
            output_extension: config.output_extension.clone(),
            result_url_prefix: config.result_url_prefix.trim_end_matches('/').to_string(),
            keep_workspaces: config.keep_workspaces,
        }
    }

    pub fn workspace(&self) -> &WorkspaceManager {
        &self.workspace
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// A new job in the `Created` state. Nothing is written yet.
    pub fn create_job(&self, request: JobRequest) -> Job {
        Job::new(request, self.workspace.staging_root(), &self.remote_root)
    }

    /// Create and run a job to completion.
    pub async fn run(
        &self,
        request: JobRequest,
        fetcher: &dyn SourceFetcher,
        cancel: CancellationToken,
    ) -> JobOutcome {
        self.run_job(self.create_job(request), fetcher, cancel).await
    }

    /// Run an already created job to a terminal state.
    pub async fn run_job(
        &self,
        mut job: Job,
        fetcher: &dyn SourceFetcher,
        cancel: CancellationToken,
    ) -> JobOutcome {
        job.trace().record("Received panorama stitching request");
        job.trace().record(format!(
            "Generated job ID {} for panorama '{}' (project {})",
            job.id(),
            job.human_name(),
            job.project_name()
        ));
        tracing::info!(
            job_id = %job.id(),
            sources = job.source_refs().len(),
            "Stitch job started",
        );
        self.persist(&job).await;

        let mut footprint = Footprint::default();
        let mut published = None;
        let result = self
            .execute(&mut job, fetcher, &cancel, &mut footprint)
            .await
            .and_then(|result| {
                published = Some(result.path);
                if let Some(thumbnail_ref) = result.thumbnail_ref {
                    job.attach_thumbnail(thumbnail_ref)
                        .map_err(|e| JobFailure::internal(e.to_string()))?;
                }
                job.complete(result.result_ref)
                    .map_err(|e| JobFailure::internal(e.to_string()))
            });

        match result {
            Ok(()) => {
                job.trace().record(format!(
                    "Job complete: {}",
                    job.result_ref().unwrap_or_default()
                ));
                tracing::info!(job_id = %job.id(), result_ref = ?job.result_ref(), "Stitch job complete");
            }
            Err(failure) => {
                job.trace().record(format!(
                    "Job failed ({}): {}",
                    failure.kind, failure.message
                ));
                tracing::warn!(
                    job_id = %job.id(),
                    kind = %failure.kind,
                    error = %failure.message,
                    "Stitch job failed",
                );
                published = None;
                if let Err(e) = job.fail(failure) {
                    tracing::error!(job_id = %job.id(), error = %e, "Could not mark job failed");
                }
            }
        }

        self.cleanup(&job, &footprint).await;
        self.persist(&job).await;

        JobOutcome {
            job_id: job.id(),
            state: job.state(),
            project_name: job.project_name().to_string(),
            result_ref: job.result_ref().map(str::to_string),
            result_path: published,
            thumbnail_ref: job.thumbnail_ref().map(str::to_string),
            failure: job.failure().cloned(),
            trace: job.trace().snapshot(),
        }
    }

    async fn execute(
        &self,
        job: &mut Job,
        fetcher: &dyn SourceFetcher,
        cancel: &CancellationToken,
        footprint: &mut Footprint,
    ) -> Result<Published, JobFailure> {
        if job.source_refs().is_empty() {
            return Err(JobFailure::invalid_input(
                "No source images were provided for stitching",
            ));
        }

        self.workspace.ensure_local_dir(job).await?;
        footprint.local = true;
        let staged = stage_sources(
            fetcher,
            job.source_refs(),
            job.local_dir(),
            &self.input_extension,
            job.trace(),
            cancel,
        )
        .await?;
        self.transition(job, JobState::Staged).await?;

        self.transport.probe(job.trace(), cancel).await?;
        self.transition(job, JobState::Connected).await?;

        let remote_dir = self.workspace.remote_dir_path(job).to_string();
        footprint.remote = true;
        self.transport
            .create_remote_dir(&remote_dir, job.trace(), cancel)
            .await?;
        let files: Vec<PathBuf> = staged.into_iter().map(|s| s.path).collect();
        self.transport
            .upload(
                &files,
                &remote_dir,
                &self.input_extension,
                job.trace(),
                cancel,
            )
            .await?;
        self.transition(job, JobState::Uploaded).await?;

        self.engine
            .create_project(&remote_dir, job.project_name(), job.trace(), cancel)
            .await?;
        self.transition(job, JobState::ProjectCreated).await?;

        self.engine
            .stitch(&remote_dir, job.project_name(), job.trace(), cancel)
            .await?;
        self.transition(job, JobState::Stitched).await?;

        let listing = self
            .transport
            .list_remote(&remote_dir, job.trace(), cancel)
            .await?;
        let job_id = job.id().to_string();
        let resolution = resolver::resolve_output(
            &listing,
            OutputQuery {
                job_id: &job_id,
                project_name: job.project_name(),
                extension: &self.output_extension,
            },
        )?;
        job.trace().record(format!(
            "Resolved output {} ({} bytes, {})",
            resolution.file.name,
            resolution.file.size,
            match resolution.reason {
                MatchReason::NameMatch => "name match",
                MatchReason::Largest => "largest candidate",
            }
        ));
        self.transition(job, JobState::OutputResolved).await?;

        let retrieved = self
            .transport
            .download(
                &remote_dir,
                &resolution.file.name,
                job.local_dir(),
                job.trace(),
                cancel,
            )
            .await?;
        self.transition(job, JobState::Retrieved).await?;

        let published = self
            .workspace
            .publish_result(job, &retrieved, &self.output_extension)
            .await?;
        let result_ref = self
            .public_ref(job, &published)
            .ok_or_else(|| JobFailure::internal("Published result has no file name"))?;

        let thumbnail_ref = match self.workspace.write_thumbnail(job, &published).await {
            Ok(path) => self.public_ref(job, &path),
            Err(e) => {
                job.trace().warn(format!("Thumbnail skipped: {e}"));
                None
            }
        };

        Ok(Published {
            result_ref,
            path: published,
            thumbnail_ref,
        })
    }

    /// URL path under which a file in the job's results directory is served.
    fn public_ref(&self, job: &Job, path: &std::path::Path) -> Option<String> {
        let file_name = path.file_name()?.to_string_lossy();
        Some(format!("{}/{}/{file_name}", self.result_url_prefix, job.id()))
    }

    async fn transition(&self, job: &mut Job, next: JobState) -> Result<(), JobFailure> {
        if let Err(e) = job.advance(next) {
            return Err(JobFailure::internal(e.to_string()));
        }
        tracing::debug!(job_id = %job.id(), state = %next, "Job state changed");
        self.persist(job).await;
        Ok(())
    }

    /// Store failures are logged and never fail the job.
    async fn persist(&self, job: &Job) {
        if let Err(e) = self.store.save(&JobRecord::from_job(job)).await {
            tracing::warn!(job_id = %job.id(), error = %e, "Failed to persist job record");
        }
    }

    async fn cleanup(&self, job: &Job, footprint: &Footprint) {
        if self.keep_workspaces {
            job.trace().record("Keeping job workspaces for inspection");
            return;
        }
        if footprint.local {
            self.workspace.cleanup_local(job).await;
        }
        if footprint.remote {
            // The job's own token may already be cancelled.
            let cancel = CancellationToken::new();
            if let Err(failure) = self
                .transport
                .remove_remote_dir(job.remote_dir(), job.trace(), &cancel)
                .await
            {
                job.trace().warn(failure.message);
            }
        }
    }
}
