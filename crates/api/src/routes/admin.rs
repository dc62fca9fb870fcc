//! Operator routes. Every handler requires an admin user or an internal caller.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{credits, transfers};
use crate::state::AppState;

/// Routes mounted at `/admin`.
///
/// ```text
/// GET    /transfers/pending   -> transfers::pending   (?start=&end=&job_type=)
/// POST   /transfers/run       -> transfers::run       (?start=&end=&job_type=)
/// POST   /credits/grant       -> credits::grant
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/transfers/pending", get(transfers::pending))
        .route("/transfers/run", post(transfers::run))
        .route("/credits/grant", post(credits::grant))
}
