//! Tracking for in-flight stitch jobs.
//!
//! Every job runs on its own task spawned through [`JobRegistry`], so the
//! server can wait for them at shutdown. Background jobs also keep their
//! cancellation token here, keyed by job id, until they finish.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pivot_core::job::Job;
use pivot_core::types::JobId;
use pivot_pipeline::orchestrator::{JobOrchestrator, JobOutcome};
use pivot_pipeline::source::SourceFetcher;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Default)]
pub struct JobRegistry {
    running: Mutex<HashMap<JobId, CancellationToken>>,
    tracker: TaskTracker,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `future` as a tracked task.
    pub fn track<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(future)
    }

    /// Run `job` in the background; it can be cancelled through [`cancel`](Self::cancel).
    pub fn spawn(
        self: &Arc<Self>,
        orchestrator: Arc<JobOrchestrator>,
        fetcher: Arc<dyn SourceFetcher>,
        job: Job,
        cancel: CancellationToken,
    ) -> JoinHandle<JobOutcome> {
        let job_id = job.id();
        self.lock().insert(job_id, cancel.clone());

        let registry = Arc::clone(self);
        self.tracker.spawn(async move {
            let outcome = orchestrator.run_job(job, fetcher.as_ref(), cancel).await;
            registry.lock().remove(&job_id);
            tracing::info!(
                job_id = %job_id,
                state = %outcome.state,
                "Background stitch job finished",
            );
            outcome
        })
    }

    /// Cancel a running background job. Returns `false` if it is not running.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.lock().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn running_count(&self) -> usize {
        self.lock().len()
    }

    /// Stop accepting work and wait up to `timeout` for tracked tasks.
    ///
    /// Returns `true` if every task finished in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.close();
        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}
