//! Durable job records.
//!
//! A [`JobRecord`] is the persisted projection of a [`Job`]: it is written
//! when the job is created, after every transition, and once more when the
//! job terminates, so clients can poll and a restarted service can tell
//! which jobs were cut off mid-flight.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::failure::FailureKind;
use crate::job::{Job, JobState};
use crate::trace::TraceEntry;
use crate::types::{JobId, Timestamp};

/// Message stored on jobs found unfinished at startup.
pub const INTERRUPTED_MESSAGE: &str = "Job interrupted by service restart";

/// Maximum page size for job listing.
pub const MAX_LIST_LIMIT: i64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub human_name: String,
    pub project_name: String,
    pub source_count: i32,
    pub state: JobState,
    pub failure_kind: Option<FailureKind>,
    pub error: Option<String>,
    pub detail: Option<String>,
    pub result_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_ref: Option<String>,
    pub trace: Vec<TraceEntry>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl JobRecord {
    /// Snapshot the current state of `job`.
    pub fn from_job(job: &Job) -> Self {
        let failure = job.failure();
        Self {
            id: job.id(),
            human_name: job.human_name().to_string(),
            project_name: job.project_name().to_string(),
            source_count: i32::try_from(job.source_refs().len()).unwrap_or(i32::MAX),
            state: job.state(),
            failure_kind: failure.map(|f| f.kind),
            error: failure.map(|f| f.message.clone()),
            detail: failure.and_then(|f| f.detail.clone()),
            result_ref: job.result_ref().map(str::to_string),
            thumbnail_ref: job.thumbnail_ref().map(str::to_string),
            trace: job.trace().snapshot(),
            created_at: job.created_at(),
            updated_at: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job store backend error: {0}")]
    Backend(String),

    #[error("Corrupt job record: {0}")]
    Corrupt(String),
}

/// Persistence seam for job records.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace the record with `record.id`.
    async fn save(&self, record: &JobRecord) -> Result<(), StoreError>;

    async fn find(&self, id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Most recently created records first, at most `limit` (capped).
    async fn list_recent(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError>;

    /// Mark every non-terminal record as failed. Returns how many changed.
    async fn fail_interrupted(&self) -> Result<u64, StoreError>;
}

/// Process-local store used when no database is configured.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn find(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT) as usize;
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        records.truncate(limit);
        Ok(records)
    }

    async fn fail_interrupted(&self) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let mut changed = 0;
        for record in records.values_mut().filter(|r| !r.state.is_terminal()) {
            record.state = JobState::Failed;
            record.failure_kind = Some(FailureKind::Cancelled);
            record.error = Some(INTERRUPTED_MESSAGE.to_string());
            record.updated_at = chrono::Utc::now();
            changed += 1;
        }
        Ok(changed)
    }
}
