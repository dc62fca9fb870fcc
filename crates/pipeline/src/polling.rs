//! Fallback polling of provider tasks.
//!
//! The webhook is the primary completion path. The poller periodically
//! queries every `Processing` job's provider, feeds terminal states into
//! the reconciler, and converts prolonged silence or repeated query
//! errors into the safe failure path (which a late webhook can still
//! override). Jobs that never left `Pending` (the process died or lost
//! its database between the provider call and the acceptance write) are
//! failed once they outlive the same ceiling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use atelier_core::job::GenerationJob;
use atelier_core::redact::{truncate, LOG_TEXT_LIMIT};
use atelier_core::status::JobStatus;
use atelier_core::task_state::{CompletionSignal, ErrorCode, SignalSource, TaskState};
use atelier_core::types::DbId;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::GENERATING_PROGRESS;
use crate::error::StoreError;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::services::Services;

/// Result of polling one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The job is not awaiting a provider signal.
    Skipped,
    /// The provider reported a terminal state.
    Reconciled(ReconcileOutcome),
    InProgress { state: TaskState },
    /// The query failed; the job stays `Processing` for now.
    QueryFailed { consecutive: u32 },
    /// No terminal state before the polling ceiling.
    TimedOut(ReconcileOutcome),
    /// Too many consecutive query errors.
    GaveUp(ReconcileOutcome),
}

/// Counts from one polling tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub examined: usize,
    pub reconciled: usize,
    pub in_progress: usize,
    pub failed: usize,
    pub errors: usize,
    /// `Pending` jobs failed for never being accepted.
    pub stale_pending: usize,
}

pub struct PollingWorker {
    services: Arc<Services>,
    reconciler: Arc<Reconciler>,
    /// Consecutive query errors per job.
    errors: Mutex<HashMap<DbId, u32>>,
}

impl PollingWorker {
    pub fn new(services: Arc<Services>, reconciler: Arc<Reconciler>) -> Self {
        Self {
            services,
            reconciler,
            errors: Mutex::new(HashMap::new()),
        }
    }

    /// Run the polling loop until `cancel` is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let config = &self.services.config.polling;
        let mut ticker = tokio::time::interval(config.interval);
        tracing::info!(
            interval_secs = config.interval.as_secs(),
            timeout_secs = config.timeout.as_secs(),
            concurrency = config.concurrency,
            "Generation poller started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Generation poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(summary) if summary.examined > 0 || summary.stale_pending > 0 => {
                            tracing::debug!(?summary, "Polling tick finished");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Polling tick failed"),
                    }
                }
            }
        }
    }

    /// Fail stale `Pending` jobs, then poll every `Processing` job once.
    pub async fn tick(&self) -> Result<PollSummary, StoreError> {
        let config = &self.services.config.polling;
        let stale_pending = self.expire_stale_pending().await?;
        let jobs = self
            .services
            .store
            .list_processing(config.batch_limit)
            .await?;
        let live: Vec<DbId> = jobs.iter().map(|j| j.id).collect();

        let results: Vec<(DbId, Result<PollOutcome, StoreError>)> = stream::iter(jobs)
            .map(|job| async move {
                let id = job.id;
                (id, self.poll_job(job).await)
            })
            .buffer_unordered(config.concurrency.max(1))
            .collect()
            .await;

        let mut summary = PollSummary {
            examined: results.len(),
            stale_pending,
            ..Default::default()
        };
        for (job_id, result) in results {
            match result {
                Ok(PollOutcome::Reconciled(_)) => summary.reconciled += 1,
                Ok(PollOutcome::InProgress { .. }) => summary.in_progress += 1,
                Ok(PollOutcome::TimedOut(_) | PollOutcome::GaveUp(_)) => summary.failed += 1,
                Ok(PollOutcome::QueryFailed { .. }) => summary.errors += 1,
                Ok(PollOutcome::Skipped) => {}
                Err(e) => {
                    summary.errors += 1;
                    tracing::error!(job_id = %job_id, error = %e, "Polling job failed");
                }
            }
        }

        // Forget counters of jobs that left Processing.
        self.lock_errors().retain(|id, _| live.contains(id));
        Ok(summary)
    }

    /// Query one job's provider and act on the answer.
    pub async fn poll_job(&self, job: GenerationJob) -> Result<PollOutcome, StoreError> {
        if job.status != JobStatus::Processing {
            return Ok(PollOutcome::Skipped);
        }
        let Some(remote_task_id) = job.remote_task_id.clone() else {
            return Ok(PollOutcome::Skipped);
        };
        let Some(adapter) = self.services.registry.adapter_for(&job.model_id) else {
            let reason = format!("No provider adapter for model '{}'", job.model_id);
            tracing::error!(job_id = %job.id, model = %job.model_id, "No adapter for polling");
            let outcome = self
                .reconciler
                .report_failure(job, ErrorCode::PollingError, Some(reason))
                .await?;
            return Ok(PollOutcome::GaveUp(outcome));
        };

        match adapter.query_task(&job.model_id, &remote_task_id).await {
            Ok(snapshot) => {
                self.clear_errors(job.id);
                let state = snapshot.state;
                if let Some(signal) = CompletionSignal::from_task_state(
                    state,
                    snapshot.result_urls,
                    snapshot.fail_reason,
                ) {
                    let outcome = self
                        .reconciler
                        .apply(job, &signal, SignalSource::Poll)
                        .await?;
                    return Ok(PollOutcome::Reconciled(outcome));
                }

                if state == TaskState::Generating {
                    self.services
                        .store
                        .raise_progress(job.id, GENERATING_PROGRESS)
                        .await?;
                }
                if self.timed_out(&job) {
                    return self.time_out(job).await;
                }
                Ok(PollOutcome::InProgress { state })
            }
            Err(e) => {
                let consecutive = self.record_error(job.id);
                let reason = truncate(&e.to_string(), LOG_TEXT_LIMIT);
                tracing::warn!(
                    job_id = %job.id,
                    remote_task_id = %remote_task_id,
                    consecutive,
                    error = %reason,
                    "Provider query failed",
                );

                if consecutive >= self.services.config.polling.max_consecutive_errors {
                    self.clear_errors(job.id);
                    let code = if e.is_network() {
                        ErrorCode::NetworkError
                    } else {
                        ErrorCode::PollingError
                    };
                    let outcome = self
                        .reconciler
                        .report_failure(job, code, Some(reason))
                        .await?;
                    return Ok(PollOutcome::GaveUp(outcome));
                }
                if self.timed_out(&job) {
                    return self.time_out(job).await;
                }
                Ok(PollOutcome::QueryFailed { consecutive })
            }
        }
    }

    /// Fail `Pending` jobs created longer ago than the polling timeout.
    /// Nothing was charged for them, so there is nothing to refund.
    async fn expire_stale_pending(&self) -> Result<usize, StoreError> {
        let config = &self.services.config.polling;
        let Ok(timeout) = chrono::Duration::from_std(config.timeout) else {
            return Ok(0);
        };
        let stale = self
            .services
            .store
            .list_stale_pending(Utc::now() - timeout, config.batch_limit)
            .await?;

        let reason = format!(
            "Provider acceptance was not recorded within {} seconds",
            config.timeout.as_secs()
        );
        let mut expired = 0;
        for job in stale {
            if self.services.store.expire_pending(job.id, &reason).await? {
                tracing::warn!(
                    job_id = %job.id,
                    created_at = %job.created_at,
                    "Job never left Pending; marked failed",
                );
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn time_out(&self, job: GenerationJob) -> Result<PollOutcome, StoreError> {
        let timeout = self.services.config.polling.timeout;
        self.clear_errors(job.id);
        tracing::warn!(job_id = %job.id, timeout_secs = timeout.as_secs(), "Generation timed out");
        let outcome = self
            .reconciler
            .report_failure(
                job,
                ErrorCode::PollingTimeout,
                Some(format!("No result after {} seconds", timeout.as_secs())),
            )
            .await?;
        Ok(PollOutcome::TimedOut(outcome))
    }

    fn timed_out(&self, job: &GenerationJob) -> bool {
        let timeout = self.services.config.polling.timeout;
        job.accepted_at
            .and_then(|at| (Utc::now() - at).to_std().ok())
            .is_some_and(|elapsed| elapsed >= timeout)
    }

    fn record_error(&self, job_id: DbId) -> u32 {
        let mut errors = self.lock_errors();
        let count = errors.entry(job_id).or_default();
        *count += 1;
        *count
    }

    fn clear_errors(&self, job_id: DbId) {
        self.lock_errors().remove(&job_id);
    }

    fn lock_errors(&self) -> MutexGuard<'_, HashMap<DbId, u32>> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
