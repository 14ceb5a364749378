//! Handlers for background stitch jobs.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use pivot_core::error::CoreError;
use pivot_core::job::JobState;
use pivot_core::store::JobRecord;
use pivot_core::types::JobId;
use serde::Deserialize;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::handlers::stitch::{require_catalog, StitchBody};
use crate::response::{DataResponse, JobAck};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

pub(crate) fn parse_job_id(raw: &str) -> AppResult<JobId> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid job id '{raw}'")))
}

// ---------------------------------------------------------------------------
// POST /api/v1/jobs
// ---------------------------------------------------------------------------

/// Accept a stitch request and run it in the background.
///
/// The initial record is saved before responding, so a poll right after the
/// 202 always finds the job.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<StitchBody>,
) -> AppResult<impl IntoResponse> {
    body.validate()?;
    let fetcher = require_catalog(&state)?;

    let job = state.orchestrator.create_job(body.into());
    state
        .orchestrator
        .store()
        .save(&JobRecord::from_job(&job))
        .await?;

    let job_id = job.id();
    state.jobs.spawn(
        Arc::clone(&state.orchestrator),
        fetcher,
        job,
        state.shutdown.child_token(),
    );
    tracing::info!(job_id = %job_id, "Background stitch job submitted");

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: JobAck {
                job_id,
                state: JobState::Created,
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// GET /api/v1/jobs
// ---------------------------------------------------------------------------

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> AppResult<impl IntoResponse> {
    let jobs = state
        .orchestrator
        .store()
        .list_recent(params.limit.unwrap_or(20))
        .await?;
    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// GET /api/v1/jobs/{id}
// ---------------------------------------------------------------------------

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job_id = parse_job_id(&id)?;
    let record = state
        .orchestrator
        .store()
        .find(job_id)
        .await?
        .ok_or(CoreError::NotFound(job_id))?;
    Ok(Json(DataResponse { data: record }))
}

// ---------------------------------------------------------------------------
// POST /api/v1/jobs/{id}/cancel
// ---------------------------------------------------------------------------

/// Request cancellation of a running background job.
///
/// Cancellation is asynchronous: the job stops at its next checkpoint, runs
/// cleanup and ends in `failed` with kind `cancelled`.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job_id = parse_job_id(&id)?;
    let record = state.orchestrator.store().find(job_id).await?;

    if state.jobs.cancel(job_id) {
        tracing::info!(job_id = %job_id, "Cancellation requested");
        let current = record.map(|r| r.state).unwrap_or(JobState::Created);
        return Ok((
            StatusCode::ACCEPTED,
            Json(DataResponse {
                data: JobAck {
                    job_id,
                    state: current,
                },
            }),
        ));
    }

    match record {
        Some(record) => Err(CoreError::Conflict(format!(
            "Job {job_id} is not running (state: {})",
            record.state
        ))
        .into()),
        None => Err(CoreError::NotFound(job_id).into()),
    }
}
