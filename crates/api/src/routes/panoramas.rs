use axum::routing::get;
use axum::Router;

use crate::handlers::panoramas;
use crate::state::AppState;

/// Routes mounted at `/panoramas`.
pub fn router() -> Router<AppState> {
    Router::new().route("/{job_id}/{file_name}", get(panoramas::get_panorama))
}
