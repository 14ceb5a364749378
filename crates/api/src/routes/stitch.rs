use axum::routing::post;
use axum::Router;

use crate::handlers::stitch;
use crate::state::AppState;

/// Routes mounted at `/stitch`.
///
/// ```text
/// POST   /                -> stitch
/// POST   /upload          -> stitch_upload
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(stitch::stitch))
        .route("/upload", post(stitch::stitch_upload))
}
