//! Completion reconciliation.
//!
//! The webhook handler, the background poller, on-demand polls and
//! explicit failure reports all funnel through [`Reconciler::apply`].
//! Planning is pure (`atelier_core::reconcile::plan`); this module loads
//! the job, applies the plan with a conditional write and re-plans if a
//! concurrent writer moved the job first.

use std::sync::Arc;

use atelier_core::job::GenerationJob;
use atelier_core::reconcile::{self, IgnoreReason, JobView, ReconcilePlan};
use atelier_core::redact::{truncate, LOG_TEXT_LIMIT};
use atelier_core::status::JobStatus;
use atelier_core::task_state::{CompletionSignal, ErrorCode, SignalSource};
use atelier_core::types::DbId;
use chrono::Utc;

use crate::error::StoreError;
use crate::services::Services;
use crate::store::{CompletionWrite, FailureWrite};

/// Attempts at applying a plan before giving way to the concurrent writer.
const MAX_APPLY_ATTEMPTS: u32 = 3;

/// What a signal did to its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No job carries this remote task id.
    JobNotFound,
    Ignored(IgnoreReason),
    Completed {
        job_id: DbId,
        new_assets: usize,
        recovered: bool,
    },
    Failed {
        job_id: DbId,
        code: ErrorCode,
        refunded: bool,
    },
    /// Concurrent writers kept moving the job; the latest one wins.
    Superseded,
}

impl ReconcileOutcome {
    /// Short label for acknowledgements and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::JobNotFound => "job_not_found",
            Self::Ignored(_) => "ignored",
            Self::Completed { recovered: true, .. } => "recovered",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Superseded => "superseded",
        }
    }

    /// Why the signal was ignored, if it was.
    pub fn ignore_reason(&self) -> Option<IgnoreReason> {
        match self {
            Self::Ignored(reason) => Some(*reason),
            _ => None,
        }
    }
}

pub struct Reconciler {
    services: Arc<Services>,
}

impl Reconciler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Reconcile a signal addressed by remote task id.
    pub async fn reconcile(
        &self,
        remote_task_id: &str,
        signal: &CompletionSignal,
        source: SignalSource,
    ) -> Result<ReconcileOutcome, StoreError> {
        let Some(job) = self
            .services
            .store
            .find_by_remote_task_id(remote_task_id)
            .await?
        else {
            tracing::warn!(remote_task_id, source = ?source, "Signal for unknown remote task");
            return Ok(ReconcileOutcome::JobNotFound);
        };
        self.apply(job, signal, source).await
    }

    /// Reconcile a signal against an already loaded job.
    pub async fn apply(
        &self,
        mut job: GenerationJob,
        signal: &CompletionSignal,
        source: SignalSource,
    ) -> Result<ReconcileOutcome, StoreError> {
        let store = &self.services.store;
        let callback_received = source == SignalSource::Webhook;

        for attempt in 1..=MAX_APPLY_ATTEMPTS {
            let existing: Vec<String> = store
                .list_assets(job.id)
                .await?
                .into_iter()
                .map(|a| a.source_url)
                .collect();
            let view = JobView {
                status: job.status,
                credits_deducted: job.credits_deducted,
                kind: job.asset_kind(),
                existing_urls: &existing,
            };

            let (applied, outcome) = match reconcile::plan(view, signal) {
                ReconcilePlan::Ignore(reason) => {
                    tracing::info!(
                        job_id = %job.id,
                        status = %job.status,
                        source = ?source,
                        reason = reason.as_str(),
                        "Signal ignored",
                    );
                    return Ok(ReconcileOutcome::Ignored(reason));
                }
                ReconcilePlan::Complete {
                    new_assets,
                    restore_credits,
                    recovered,
                } => {
                    let count = new_assets.len();
                    let write = CompletionWrite {
                        expected: job.status,
                        new_assets,
                        restore_credits,
                        recovered,
                        callback_received,
                        ephemeral_url_expires_at: Utc::now()
                            + self.services.config.ephemeral_url_ttl,
                    };
                    let applied = store.apply_completion(job.id, &write).await?;
                    (
                        applied,
                        ReconcileOutcome::Completed {
                            job_id: job.id,
                            new_assets: count,
                            recovered,
                        },
                    )
                }
                ReconcilePlan::Fail {
                    code,
                    reason,
                    refund_credits,
                } => {
                    let write = FailureWrite {
                        expected: job.status,
                        code,
                        reason,
                        refund_credits,
                        callback_received,
                    };
                    let applied = store.apply_failure(job.id, &write).await?;
                    (
                        applied,
                        ReconcileOutcome::Failed {
                            job_id: job.id,
                            code,
                            refunded: refund_credits,
                        },
                    )
                }
            };

            if applied {
                log_transition(&job, &outcome, source, signal);
                return Ok(outcome);
            }

            tracing::debug!(job_id = %job.id, attempt, "Job moved concurrently; re-planning");
            job = match store.find(job.id).await? {
                Some(fresh) => fresh,
                None => return Ok(ReconcileOutcome::JobNotFound),
            };
        }

        tracing::warn!(job_id = %job.id, source = ?source, "Gave up reconciling a contended job");
        Ok(ReconcileOutcome::Superseded)
    }

    /// Safe failure path for polling timeouts and polling errors.
    ///
    /// A job already `Completed` or `Failed` is left untouched.
    pub async fn report_failure(
        &self,
        job: GenerationJob,
        code: ErrorCode,
        reason: Option<String>,
    ) -> Result<ReconcileOutcome, StoreError> {
        if job.status.is_terminal() {
            tracing::debug!(job_id = %job.id, status = %job.status, "Failure report for settled job skipped");
            let reason = if job.status == JobStatus::Completed {
                IgnoreReason::AlreadyCompleted
            } else {
                IgnoreReason::DuplicateFailure
            };
            return Ok(ReconcileOutcome::Ignored(reason));
        }
        self.apply(job, &CompletionSignal::Failure { code, reason }, SignalSource::Report)
            .await
    }
}

fn log_transition(
    job: &GenerationJob,
    outcome: &ReconcileOutcome,
    source: SignalSource,
    signal: &CompletionSignal,
) {
    match outcome {
        ReconcileOutcome::Completed {
            new_assets,
            recovered: true,
            ..
        } => tracing::warn!(
            job_id = %job.id,
            source = ?source,
            new_assets,
            previous_error = job.error_code.as_deref().unwrap_or_default(),
            "Failed job recovered by late success; credits restored",
        ),
        ReconcileOutcome::Completed { new_assets, .. } => tracing::info!(
            job_id = %job.id,
            source = ?source,
            new_assets,
            "Generation job completed",
        ),
        ReconcileOutcome::Failed { code, refunded, .. } => {
            let reason = match signal {
                CompletionSignal::Failure { reason, .. } => reason.as_deref().unwrap_or_default(),
                CompletionSignal::Success { .. } => "",
            };
            tracing::info!(
                job_id = %job.id,
                source = ?source,
                code = code.as_str(),
                refunded,
                reason = %truncate(reason, LOG_TEXT_LIMIT),
                "Generation job failed",
            );
        }
        _ => {}
    }
}
