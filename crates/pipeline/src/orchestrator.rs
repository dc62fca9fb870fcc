//! Job creation: validate, price, check balance, persist, call the
//! provider, then charge and move to `Processing` as one atomic step.

use std::sync::Arc;

use atelier_core::catalog;
use atelier_core::job::NewJob;
use atelier_core::redact::{truncate, LOG_TEXT_LIMIT};
use atelier_core::status::JobStatus;
use atelier_core::types::{new_id, DbId};
use atelier_core::webhook_token;
use serde::Serialize;

use crate::config::ACCEPTED_PROGRESS;
use crate::error::PipelineError;
use crate::kinds::{CostOverride, JobKind};
use crate::services::Services;
use crate::store::AcceptOutcome;

/// What the caller gets back once the provider accepted the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedJob {
    pub id: DbId,
    pub status: JobStatus,
    pub remote_task_id: String,
    pub model_id: String,
    pub credits_cost: i32,
    pub estimated_seconds: i32,
}

/// Creation pipeline for one job kind.
pub struct Orchestrator<K: JobKind> {
    kind: K,
    services: Arc<Services>,
}

impl<K: JobKind> Orchestrator<K> {
    pub fn new(kind: K, services: Arc<Services>) -> Self {
        Self { kind, services }
    }

    /// Create a job and submit it to its provider.
    ///
    /// Returns once the provider has accepted the task; generation itself
    /// completes out of band through the webhook or the poller.
    pub async fn create(
        &self,
        owner_id: DbId,
        request: K::Request,
        cost_override: Option<CostOverride>,
    ) -> Result<CreatedJob, PipelineError> {
        let services = &self.services;

        // 1. Validate, including model selection and capability checks.
        self.kind.validate(&request)?;
        let resolved = services
            .registry
            .resolve(
                self.kind.model_id(&request),
                self.kind.reference_urls(&request).len(),
                self.kind.output_count(&request),
            )
            .map_err(PipelineError::from_selection)?;
        match catalog::find_model(resolved.model_id) {
            Some(spec) if spec.kind == K::ASSET_KIND => {}
            _ => {
                return Err(PipelineError::Validation(format!(
                    "Model '{}' cannot produce {} jobs",
                    resolved.model_id,
                    K::JOB_TYPE
                )))
            }
        }

        // 2. Resolve cost.
        let cost = self
            .kind
            .resolve_cost(&request, resolved.model_id, cost_override)?;

        // 3. Balance check; free jobs skip it.
        if cost.credits > 0 {
            let available = services.ledger.balance(owner_id).await?;
            if available < cost.credits {
                return Err(PipelineError::InsufficientCredits {
                    required: cost.credits,
                    available,
                });
            }
        }

        // 4. Persist in Pending.
        let token = webhook_token::generate();
        let job_id = new_id();
        let metadata = self
            .kind
            .extract_audit_fields(&request, resolved.model_id, cost.source);
        services
            .store
            .insert_pending(&NewJob {
                id: job_id,
                owner_id,
                job_type: K::JOB_TYPE,
                model_id: resolved.model_id.to_string(),
                webhook_token_hash: webhook_token::hash(&token),
                credits_cost: cost.credits,
                metadata,
            })
            .await?;

        // 5. Call the provider. Nothing has been charged yet.
        let params = self.kind.build_provider_params(&request, resolved.model_id);
        let callback_url = webhook_token::callback_url(&services.config.callback_url, &token);
        let created = match resolved.adapter.create_task(&params, &callback_url).await {
            Ok(created) => created,
            Err(source) => {
                let reason = truncate(&source.to_string(), LOG_TEXT_LIMIT);
                tracing::warn!(
                    job_id = %job_id,
                    model = resolved.model_id,
                    adapter = resolved.adapter.name(),
                    error = %reason,
                    "Provider rejected task",
                );
                if let Err(e) = services.store.mark_provider_failed(job_id, &reason).await {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to record provider failure");
                }
                return Err(PipelineError::ProviderCall { job_id, source });
            }
        };
        let remote_task_id = created.remote_task_id;

        // 6. Charge and move to Processing atomically.
        let outcome = services
            .store
            .accept_task(job_id, owner_id, &remote_task_id, cost.credits, ACCEPTED_PROGRESS)
            .await;
        let message = match outcome {
            Ok(AcceptOutcome::Accepted) => None,
            Ok(AcceptOutcome::InsufficientCredits) => {
                Some("balance no longer covers the charge".to_string())
            }
            Ok(AcceptOutcome::NotPending) => Some("job left Pending before acceptance".to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(message) = message {
            tracing::error!(
                job_id = %job_id,
                owner_id = %owner_id,
                remote_task_id = %remote_task_id,
                credits = cost.credits,
                error = %message,
                "Post-acceptance bookkeeping failed; provider may be working unbilled",
            );
            if let Err(e) = services
                .store
                .mark_bookkeeping_failed(job_id, &remote_task_id, &message)
                .await
            {
                tracing::error!(job_id = %job_id, error = %e, "Failed to record bookkeeping failure");
            }
            return Err(PipelineError::PostAcceptanceBookkeeping {
                job_id,
                remote_task_id,
                message,
            });
        }

        tracing::info!(
            job_id = %job_id,
            owner_id = %owner_id,
            job_type = %K::JOB_TYPE,
            model = resolved.model_id,
            remote_task_id = %remote_task_id,
            credits = cost.credits,
            "Generation job accepted",
        );

        // 7. Report.
        Ok(CreatedJob {
            id: job_id,
            status: JobStatus::Processing,
            remote_task_id,
            model_id: resolved.model_id.to_string(),
            credits_cost: cost.credits,
            estimated_seconds: self.kind.estimated_seconds(&request, resolved.model_id),
        })
    }
}
