//! Handlers for synchronous stitching.
//!
//! Both endpoints run the job to completion inside the request and answer
//! with the result reference or the typed failure, trace included.

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::Json;
use pivot_core::job::JobRequest;
use pivot_pipeline::catalog::{UploadedFiles, UploadedImage};
use pivot_pipeline::orchestrator::JobOutcome;
use pivot_pipeline::source::SourceFetcher;
use serde::Deserialize;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::response::StitchResponse;
use crate::state::AppState;

/// Longest accepted panorama name.
const MAX_NAME_LEN: u64 = 200;

// ---------------------------------------------------------------------------
// Request DTOs
// ---------------------------------------------------------------------------

/// JSON body shared by `/stitch` and `/jobs`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StitchBody {
    #[serde(default)]
    #[validate(length(max = 200))]
    pub panorama_name: Option<String>,
    /// Empty lists are accepted here and rejected by the pipeline, so the
    /// caller still gets a job id and trace.
    #[serde(default)]
    #[validate(length(max = 500))]
    pub source_refs: Vec<String>,
}

impl From<StitchBody> for JobRequest {
    fn from(body: StitchBody) -> Self {
        JobRequest {
            panorama_name: body.panorama_name,
            source_refs: body.source_refs,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The configured catalog, or 400 when the service only accepts uploads.
pub(crate) fn require_catalog(state: &AppState) -> AppResult<Arc<dyn SourceFetcher>> {
    state.catalog.clone().ok_or_else(|| {
        AppError::BadRequest(
            "No asset catalog is configured; upload images to /api/v1/stitch/upload".into(),
        )
    })
}

fn outcome_response(outcome: JobOutcome) -> AppResult<Json<StitchResponse>> {
    match (outcome.result_ref, outcome.failure) {
        (Some(result_ref), _) => Ok(Json(StitchResponse {
            result_ref,
            thumbnail_ref: outcome.thumbnail_ref,
            job_id: outcome.job_id,
            message: "Panorama stitched successfully".into(),
            trace: outcome.trace,
        })),
        (None, Some(failure)) => Err(AppError::Job {
            job_id: outcome.job_id,
            failure,
            trace: outcome.trace,
        }),
        (None, None) => Err(AppError::InternalError(format!(
            "Job {} ended without a result or a failure",
            outcome.job_id
        ))),
    }
}

/// Run a job on a tracked task and wait for it.
///
/// If the request is dropped first (client gone, request timeout), the drop
/// guard cancels the job so it stops and cleans up on its own.
async fn run_to_completion(
    state: &AppState,
    request: JobRequest,
    fetcher: Arc<dyn SourceFetcher>,
) -> AppResult<Json<StitchResponse>> {
    let cancel = state.shutdown.child_token();
    let guard = cancel.clone().drop_guard();

    let orchestrator = Arc::clone(&state.orchestrator);
    let handle = state
        .jobs
        .track(async move { orchestrator.run(request, fetcher.as_ref(), cancel).await });
    let outcome = handle
        .await
        .map_err(|e| AppError::InternalError(format!("Stitch task failed: {e}")))?;

    guard.disarm();
    outcome_response(outcome)
}

// ---------------------------------------------------------------------------
// POST /api/v1/stitch
// ---------------------------------------------------------------------------

/// Stitch catalog images named by `sourceRefs`.
pub async fn stitch(
    State(state): State<AppState>,
    Json(body): Json<StitchBody>,
) -> AppResult<Json<StitchResponse>> {
    body.validate()?;
    let fetcher = require_catalog(&state)?;
    run_to_completion(&state, body.into(), fetcher).await
}

// ---------------------------------------------------------------------------
// POST /api/v1/stitch/upload
// ---------------------------------------------------------------------------

/// Stitch images sent as multipart `files` fields.
///
/// Any file whose content type is not `image/*` rejects the whole request.
pub async fn stitch_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<StitchResponse>> {
    let mut uploads = Vec::new();
    let mut panorama_name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "files" | "files[]" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().unwrap_or("").to_string();
                if !content_type.starts_with("image/") {
                    return Err(AppError::BadRequest(format!(
                        "File '{file_name}' is not an image (content type '{content_type}')"
                    )));
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                uploads.push(UploadedImage {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "panoramaName" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                panorama_name = Some(text);
            }
            _ => {} // ignore unknown fields
        }
    }

    if panorama_name
        .as_ref()
        .is_some_and(|n| n.chars().count() as u64 > MAX_NAME_LEN)
    {
        return Err(AppError::BadRequest(format!(
            "panoramaName must be at most {MAX_NAME_LEN} characters"
        )));
    }

    tracing::info!(files = uploads.len(), "Received multipart stitch request");
    let files = UploadedFiles::new(uploads);
    let request = JobRequest {
        panorama_name,
        source_refs: files.refs().to_vec(),
    };
    run_to_completion(&state, request, Arc::new(files)).await
}
