//! Credit balance reads and operator top-ups.

use atelier_core::error::CoreError;
use atelier_core::types::DbId;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::internal::AdminOrInternal;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub owner_id: DbId,
    pub balance: i32,
}

/// Body of `POST /admin/credits/grant`.
#[derive(Debug, Deserialize)]
pub struct GrantCredits {
    pub owner_id: DbId,
    pub amount: i32,
    pub description: Option<String>,
}

/// GET /api/v1/credits/balance
pub async fn balance(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<DataResponse<BalanceResponse>>> {
    let balance = state.services.ledger.balance(user.user_id).await?;
    Ok(Json(DataResponse {
        data: BalanceResponse {
            owner_id: user.user_id,
            balance,
        },
    }))
}

/// POST /api/v1/admin/credits/grant
pub async fn grant(
    State(state): State<AppState>,
    _caller: AdminOrInternal,
    Json(body): Json<GrantCredits>,
) -> AppResult<Json<DataResponse<BalanceResponse>>> {
    if body.amount <= 0 {
        return Err(AppError::Core(CoreError::Validation(
            "amount must be positive".into(),
        )));
    }

    let balance = state
        .services
        .ledger
        .grant(body.owner_id, body.amount, body.description.as_deref())
        .await?;
    tracing::info!(owner_id = %body.owner_id, amount = body.amount, balance, "Credits granted");

    Ok(Json(DataResponse {
        data: BalanceResponse {
            owner_id: body.owner_id,
            balance,
        },
    }))
}
