use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pivot_core::error::CoreError;
use pivot_core::failure::JobFailure;
use pivot_core::store::StoreError;
use pivot_core::trace::TraceEntry;
use pivot_core::types::JobId;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce consistent JSON error responses
/// of the form `{ "error": ..., "code": ... }`. Job failures additionally
/// carry `detail`, `jobId` and the job's trace.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `pivot_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The job store could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stitching job ran and failed.
    #[error("{failure}")]
    Job {
        job_id: JobId,
        failure: JobFailure,
        trace: Vec<TraceEntry>,
    },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Core(CoreError::Validation(errors.to_string()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound(id) => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("Job {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    internal()
                }
            },

            AppError::Store(err) => {
                tracing::error!(error = %err, "Job store error");
                internal()
            }

            // --- Job failures keep their own envelope ---
            AppError::Job {
                job_id,
                failure,
                trace,
            } => {
                let status = StatusCode::from_u16(failure.kind.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let mut body = json!({
                    "error": failure.message,
                    "code": failure.kind.code(),
                    "jobId": job_id,
                    "trace": trace,
                });
                if let Some(detail) = &failure.detail {
                    body["detail"] = json!(detail);
                }
                return (status, axum::Json(body)).into_response();
            }

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
