pub mod health;
pub mod jobs;
pub mod panoramas;
pub mod stitch;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /stitch                                          synchronous stitch (POST, JSON)
/// /stitch/upload                                   synchronous stitch (POST, multipart)
///
/// /jobs                                            list, submit background job
/// /jobs/{id}                                       job record with trace
/// /jobs/{id}/cancel                                cancel running job (POST)
///
/// /panoramas/{job_id}/{file_name}                  download published panorama
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/stitch", stitch::router())
        .nest("/jobs", jobs::router())
        .nest("/panoramas", panoramas::router())
}
