//! Route definitions for the `/generations` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::generations;
use crate::state::AppState;

/// Routes mounted at `/generations`.
///
/// ```text
/// GET    /               -> list
/// POST   /               -> create
/// GET    /{id}           -> get
/// POST   /{id}/poll      -> poll
/// POST   /{id}/failure   -> report_failure
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(generations::list).post(generations::create))
        .route("/{id}", get(generations::get))
        .route("/{id}/poll", post(generations::poll))
        .route("/{id}/failure", post(generations::report_failure))
}
