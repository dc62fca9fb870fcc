pub mod admin;
pub mod credits;
pub mod generations;
pub mod health;

use axum::routing::post;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /generations                         create, history (user)
/// /generations/{id}                    status with read-repair (owner or admin)
/// /generations/{id}/poll               on-demand provider query (owner)
/// /generations/{id}/failure            safe failure report (owner or internal)
///
/// /generation/webhook?token=           provider callback (per-job token)
///
/// /credits/balance                     own balance (user)
///
/// /admin/transfers/pending             migration queue (admin or internal)
/// /admin/transfers/run                 trigger a sweep (admin or internal)
/// /admin/credits/grant                 top up a balance (admin or internal)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/generations", generations::router())
        .route("/generation/webhook", post(handlers::webhook::receive))
        .nest("/credits", credits::router())
        .nest("/admin", admin::router())
}
