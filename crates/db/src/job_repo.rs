//! Repository for the `stitch_jobs` table.
//!
//! States and failure kinds are stored as their string codes
//! (`JobState::as_str`, `FailureKind::code`); the trace is a JSONB array.

use pivot_core::failure::FailureKind;
use pivot_core::job::JobState;
use pivot_core::store::{JobRecord, JobStore, StoreError, INTERRUPTED_MESSAGE, MAX_LIST_LIMIT};
use pivot_core::trace::TraceEntry;
use pivot_core::types::{JobId, Timestamp};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

/// Column list for `stitch_jobs` queries.
const COLUMNS: &str = "\
    id, human_name, project_name, source_count, state, \
    failure_kind, error, detail, result_ref, thumbnail_ref, trace, \
    created_at, updated_at";

/// A raw row from `stitch_jobs`.
#[derive(Debug, FromRow)]
struct JobRow {
    id: JobId,
    human_name: String,
    project_name: String,
    source_count: i32,
    state: String,
    failure_kind: Option<String>,
    error: Option<String>,
    detail: Option<String>,
    result_ref: Option<String>,
    thumbnail_ref: Option<String>,
    trace: Json<Vec<TraceEntry>>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let state = row
            .state
            .parse::<JobState>()
            .map_err(|e| StoreError::Corrupt(format!("job {}: {e}", row.id)))?;
        let failure_kind = row
            .failure_kind
            .as_deref()
            .map(str::parse::<FailureKind>)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("job {}: {e}", row.id)))?;

        Ok(JobRecord {
            id: row.id,
            human_name: row.human_name,
            project_name: row.project_name,
            source_count: row.source_count,
            state,
            failure_kind,
            error: row.error,
            detail: row.detail,
            result_ref: row.result_ref,
            thumbnail_ref: row.thumbnail_ref,
            trace: row.trace.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    tracing::error!(error = %err, "Job store query failed");
    StoreError::Backend(err.to_string())
}

/// [`JobStore`] backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl JobStore for PgJobStore {
    async fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO stitch_jobs \
                (id, human_name, project_name, source_count, state, failure_kind, \
                 error, detail, result_ref, thumbnail_ref, trace, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) DO UPDATE SET \
                state = EXCLUDED.state, \
                failure_kind = EXCLUDED.failure_kind, \
                error = EXCLUDED.error, \
                detail = EXCLUDED.detail, \
                result_ref = EXCLUDED.result_ref, \
                thumbnail_ref = EXCLUDED.thumbnail_ref, \
                trace = EXCLUDED.trace, \
                updated_at = EXCLUDED.updated_at",
        )
        .bind(record.id)
        .bind(&record.human_name)
        .bind(&record.project_name)
        .bind(record.source_count)
        .bind(record.state.as_str())
        .bind(record.failure_kind.map(FailureKind::code))
        .bind(&record.error)
        .bind(&record.detail)
        .bind(&record.result_ref)
        .bind(&record.thumbnail_ref)
        .bind(Json(&record.trace))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn find(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM stitch_jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(JobRecord::try_from)
            .transpose()
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM stitch_jobs ORDER BY created_at DESC, id ASC LIMIT $1"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(limit.clamp(1, MAX_LIST_LIMIT))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?
            .into_iter()
            .map(JobRecord::try_from)
            .collect()
    }

    async fn fail_interrupted(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE stitch_jobs \
             SET state = $1, failure_kind = $2, error = $3, updated_at = NOW() \
             WHERE state NOT IN ($4, $1)",
        )
        .bind(JobState::Failed.as_str())
        .bind(FailureKind::Cancelled.code())
        .bind(INTERRUPTED_MESSAGE)
        .bind(JobState::Complete.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }
}
