use std::sync::Arc;

use pivot_pipeline::orchestrator::JobOrchestrator;
use pivot_pipeline::source::SourceFetcher;
use tokio_util::sync::CancellationToken;

use crate::background::JobRegistry;
use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database pool, when jobs are persisted in Postgres.
    pub pool: Option<pivot_db::DbPool>,
    pub config: Arc<ServerConfig>,
    pub orchestrator: Arc<JobOrchestrator>,
    /// Resolves `sourceRefs` for JSON requests; `None` means upload-only.
    pub catalog: Option<Arc<dyn SourceFetcher>>,
    pub jobs: Arc<JobRegistry>,
    /// Parent of every job's cancellation token; cancelled at shutdown.
    pub shutdown: CancellationToken,
}
