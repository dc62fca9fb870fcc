//! Handlers for the `/generations` resource.
//!
//! Creation, status with read-repair, history, on-demand polling and the
//! safe failure report used by clients whose own polling gave up.

use atelier_core::error::CoreError;
use atelier_core::task_state::ErrorCode;
use atelier_core::types::DbId;
use atelier_pipeline::kinds::{AvatarRequest, CostOverride, ImageRequest, VideoRequest};
use atelier_pipeline::queries::JobPage;
use atelier_pipeline::{CreatedJob, JobStatusView, PipelineError};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::internal::{Caller, InternalHeader};
use crate::query::PaginationParams;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Avatar fields as they arrive over HTTP. The internal authority comes
/// from the request headers, never from the body.
#[derive(Debug, Deserialize)]
pub struct AvatarPayload {
    pub subject_ref: String,
    pub prompt: String,
    pub model_id: String,
    #[serde(default)]
    pub reference_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "job_type", rename_all = "snake_case")]
pub enum GenerationPayload {
    Image(ImageRequest),
    Video(VideoRequest),
    Avatar(AvatarPayload),
}

/// Body of `POST /generations`.
#[derive(Debug, Deserialize)]
pub struct CreateGeneration {
    #[serde(flatten)]
    pub payload: GenerationPayload,
    /// Explicit cost; only honoured for internal callers.
    pub credits_override: Option<i32>,
}

/// Body of `POST /generations/{id}/failure`.
#[derive(Debug, Deserialize)]
pub struct FailureReport {
    pub reason: Option<String>,
    pub error_type: String,
}

/// What a signal did to a job, as returned to the caller.
#[derive(Debug, Serialize)]
pub struct SignalAck {
    pub job_id: DbId,
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

fn failure_code(error_type: &str) -> Option<ErrorCode> {
    match error_type {
        "polling_error" => Some(ErrorCode::PollingError),
        "polling_timeout" => Some(ErrorCode::PollingTimeout),
        "network_error" => Some(ErrorCode::NetworkError),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/generations
///
/// Validate, price and submit a job. Responds once the provider accepted
/// the task; results arrive through the webhook or the poller.
pub async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    InternalHeader(authority): InternalHeader,
    Json(body): Json<CreateGeneration>,
) -> AppResult<(StatusCode, Json<DataResponse<CreatedJob>>)> {
    let cost_override = match (body.credits_override, authority) {
        (None, _) => None,
        (Some(credits), Some(authority)) => Some(CostOverride { credits, authority }),
        (Some(_), None) => {
            return Err(AppError::Core(CoreError::Forbidden(
                "credits_override requires internal authority".into(),
            )))
        }
    };

    let created = match body.payload {
        GenerationPayload::Image(request) => {
            state.images.create(user.user_id, request, cost_override).await?
        }
        GenerationPayload::Video(request) => {
            state.videos.create(user.user_id, request, cost_override).await?
        }
        GenerationPayload::Avatar(payload) => {
            let authority = authority.ok_or_else(|| {
                AppError::Core(CoreError::Forbidden(
                    "Avatar jobs are created by the system only".into(),
                ))
            })?;
            let request = AvatarRequest {
                authority,
                subject_ref: payload.subject_ref,
                prompt: payload.prompt,
                model_id: payload.model_id,
                reference_urls: payload.reference_urls,
            };
            state.avatars.create(user.user_id, request, cost_override).await?
        }
    };

    Ok((StatusCode::CREATED, Json(DataResponse { data: created })))
}

/// GET /api/v1/generations
///
/// Newest-first history of the caller's own jobs.
pub async fn list(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<DataResponse<JobPage>>> {
    let page = state
        .queries
        .history(user.user_id, params.limit, params.offset)
        .await?;
    Ok(Json(DataResponse { data: page }))
}

/// GET /api/v1/generations/{id}
pub async fn get(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<JobStatusView>>> {
    let view = state.queries.status(user.viewer(), id).await?;
    Ok(Json(DataResponse { data: view }))
}

/// POST /api/v1/generations/{id}/poll
///
/// Query the provider once and return the refreshed status.
pub async fn poll(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<JobStatusView>>> {
    let job = state.queries.load(user.owner(), id).await?;
    let outcome = state.poller.poll_job(job).await?;
    tracing::debug!(job_id = %id, outcome = ?outcome, "On-demand poll");

    let view = state.queries.status(user.owner(), id).await?;
    Ok(Json(DataResponse { data: view }))
}

/// POST /api/v1/generations/{id}/failure
///
/// Fail a job whose polling gave up. Settled jobs are left untouched.
pub async fn report_failure(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<DbId>,
    Json(body): Json<FailureReport>,
) -> AppResult<Json<DataResponse<SignalAck>>> {
    let code = failure_code(&body.error_type).ok_or_else(|| {
        AppError::BadRequest(format!(
            "error_type must be one of polling_error, polling_timeout, network_error; got '{}'",
            body.error_type
        ))
    })?;

    let job = match caller {
        Caller::Internal(_) => state
            .services
            .store
            .find(id)
            .await?
            .ok_or(PipelineError::NotFound(id))?,
        Caller::User(user) => state.queries.load(user.owner(), id).await?,
    };

    let reason = body.reason.filter(|r| !r.trim().is_empty());
    let outcome = state.reconciler.report_failure(job, code, reason).await?;

    Ok(Json(DataResponse {
        data: SignalAck {
            job_id: id,
            result: outcome.label(),
            reason: outcome.ignore_reason().map(|r| r.as_str()),
        },
    }))
}
