use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::Response;
use pivot_pipeline::workspace::is_safe_file_name;
use tokio_util::io::ReaderStream;

use crate::error::{AppError, AppResult};
use crate::handlers::jobs::parse_job_id;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET /api/v1/panoramas/{job_id}/{file_name}
// ---------------------------------------------------------------------------

/// Stream a published panorama.
pub async fn get_panorama(
    State(state): State<AppState>,
    Path((job_id, file_name)): Path<(String, String)>,
) -> AppResult<Response> {
    let job_id = parse_job_id(&job_id)?;
    if !is_safe_file_name(&file_name) {
        return Err(AppError::BadRequest(format!(
            "Invalid file name '{file_name}'"
        )));
    }

    let path = state
        .orchestrator
        .workspace()
        .published_file(job_id, &file_name)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Panorama {job_id}/{file_name}")))?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to open panorama: {e}")))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to stat panorama: {e}")))?
        .len();

    Response::builder()
        .header(header::CONTENT_TYPE, content_type_for(&file_name))
        .header(header::CONTENT_LENGTH, size)
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::InternalError(e.to_string()))
}

fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "tif" | "tiff" => "image/tiff",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
