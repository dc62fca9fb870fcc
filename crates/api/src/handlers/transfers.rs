//! Operator endpoints for the durable migration queue.

use atelier_pipeline::PendingMigrations;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::error::AppResult;
use crate::middleware::internal::AdminOrInternal;
use crate::query::TransferFilterParams;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SweepStarted {
    pub started: bool,
}

/// GET /api/v1/admin/transfers/pending
///
/// Candidates in the order the next sweep will take them, plus the jobs
/// whose sources already expired.
pub async fn pending(
    State(state): State<AppState>,
    _caller: AdminOrInternal,
    Query(params): Query<TransferFilterParams>,
) -> AppResult<Json<DataResponse<PendingMigrations>>> {
    let filter = params.into_filter()?;
    let queue = state.migration.pending(&filter).await?;
    Ok(Json(DataResponse { data: queue }))
}

/// POST /api/v1/admin/transfers/run
///
/// Start a sweep in the background. Returns 409 while one is running.
pub async fn run(
    State(state): State<AppState>,
    _caller: AdminOrInternal,
    Query(params): Query<TransferFilterParams>,
) -> AppResult<(StatusCode, Json<DataResponse<SweepStarted>>)> {
    let filter = params.into_filter()?;
    state.migration.trigger(filter)?;
    tracing::info!(?filter, "Migration sweep triggered");
    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SweepStarted { started: true },
        }),
    ))
}
