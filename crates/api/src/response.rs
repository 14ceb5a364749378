//! Shared response types for API handlers.
//!
//! Resource endpoints use the `{ "data": ... }` envelope ([`DataResponse`]).
//! Stitch endpoints return [`StitchResponse`] directly so the caller sees the
//! result reference and the trace at the top level.

use pivot_core::job::JobState;
use pivot_core::trace::TraceEntry;
use pivot_core::types::JobId;
use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Body of a successful stitch.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StitchResponse {
    pub result_ref: String,
    /// 800px JPEG preview, served from the same directory as the result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_ref: Option<String>,
    pub job_id: JobId,
    pub message: String,
    pub trace: Vec<TraceEntry>,
}

/// Acknowledgement for a background job submission or cancellation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAck {
    pub job_id: JobId,
    pub state: JobState,
}
