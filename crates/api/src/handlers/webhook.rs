//! Provider callback endpoint.
//!
//! The callback URL carries a per-job token (`?token=`). The token is the
//! only credential; it is checked against the stored digest in constant
//! time before any state changes.

use atelier_core::error::CoreError;
use atelier_core::status::JobStatus;
use atelier_core::task_state::{CompletionSignal, SignalSource, TaskState};
use atelier_core::types::DbId;
use atelier_core::webhook_token;
use atelier_pipeline::config::GENERATING_PROGRESS;
use atelier_providers::callback::parse_callback;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::handlers::generations::SignalAck;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    pub token: Option<String>,
}

type WebhookResponse = (StatusCode, Json<DataResponse<SignalAck>>);

fn ack(
    status: StatusCode,
    job_id: DbId,
    result: &'static str,
    reason: Option<&'static str>,
) -> WebhookResponse {
    (
        status,
        Json(DataResponse {
            data: SignalAck {
                job_id,
                result,
                reason,
            },
        }),
    )
}

/// Acceptance not recorded yet; the provider retries or the poller resolves it.
fn deferred(job_id: DbId) -> WebhookResponse {
    tracing::info!(%job_id, "Webhook for job not yet accepted; deferred");
    ack(StatusCode::ACCEPTED, job_id, "deferred", Some("not_yet_accepted"))
}

/// POST /api/v1/generation/webhook?token=
pub async fn receive(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    Json(body): Json<Value>,
) -> AppResult<WebhookResponse> {
    let payload = parse_callback(&body).map_err(|e| AppError::BadRequest(e.to_string()))?;
    if payload.state == TaskState::Success && payload.result_urls.is_empty() {
        return Err(AppError::BadRequest(
            "Success callback carries no result URLs".into(),
        ));
    }

    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Core(CoreError::Unauthorized("Missing webhook token".into())))?;

    tracing::info!(
        remote_task_id = %payload.remote_task_id,
        state = payload.state.as_str(),
        urls = payload.result_urls.len(),
        "Webhook received",
    );

    let store = &state.services.store;
    let job = match store.find_by_remote_task_id(&payload.remote_task_id).await? {
        Some(job) => job,
        None => {
            // The provider may call back before acceptance is committed.
            return match store
                .find_by_webhook_token_hash(&webhook_token::hash(&token))
                .await?
            {
                Some(job) if job.status == JobStatus::Pending => Ok(deferred(job.id)),
                _ => {
                    tracing::warn!(remote_task_id = %payload.remote_task_id, "Webhook for unknown task");
                    Err(AppError::NotFound(format!(
                        "No generation job for task {}",
                        payload.remote_task_id
                    )))
                }
            };
        }
    };

    if !webhook_token::verify(&token, &job.webhook_token_hash) {
        tracing::warn!(job_id = %job.id, "Webhook token mismatch");
        return Err(AppError::Core(CoreError::Unauthorized(
            "Invalid webhook token".into(),
        )));
    }

    if job.status == JobStatus::Pending {
        return Ok(deferred(job.id));
    }

    let job_id = job.id;
    let Some(signal) = CompletionSignal::from_task_state(
        payload.state,
        payload.result_urls,
        payload.fail_reason,
    ) else {
        if payload.state == TaskState::Generating {
            store.raise_progress(job_id, GENERATING_PROGRESS).await?;
        }
        return Ok(ack(StatusCode::OK, job_id, "in_progress", None));
    };

    let outcome = state
        .reconciler
        .apply(job, &signal, SignalSource::Webhook)
        .await?;

    Ok(ack(
        StatusCode::OK,
        job_id,
        outcome.label(),
        outcome.ignore_reason().map(|r| r.as_str()),
    ))
}
