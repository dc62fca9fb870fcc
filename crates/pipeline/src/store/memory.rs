//! In-process [`JobStore`] and [`CreditLedger`].
//!
//! Every trait method runs inside one critical section, which gives the
//! same all-or-nothing behaviour the Postgres backend gets from
//! transactions. Used by the test suites and for local runs without a
//! database.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use atelier_core::job::{GenerationJob, NewJob, ResultAsset};
use atelier_core::status::{FileTransferStatus, JobStatus};
use atelier_core::task_state::ErrorCode;
use atelier_core::transfer::{self, CandidateFilter};
use atelier_core::types::{new_id, DbId, Timestamp};
use chrono::Utc;

use super::{AcceptOutcome, CompletionWrite, CreditLedger, FailureWrite, JobStore};
use crate::error::StoreError;

/// Kind of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Generation,
    Grant,
}

/// One ledger movement, mirroring a `credit_transactions` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub owner_id: DbId,
    pub job_id: Option<DbId>,
    pub kind: EntryKind,
    /// Signed: debits are negative.
    pub amount: i32,
    pub voided: bool,
}

#[derive(Default)]
struct State {
    jobs: HashMap<DbId, GenerationJob>,
    assets: Vec<ResultAsset>,
    balances: HashMap<DbId, i32>,
    ledger: Vec<LedgerEntry>,
    fail_next_accept: bool,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next [`JobStore::accept_task`] fail as if the database
    /// were unreachable.
    pub fn inject_accept_failure(&self) {
        self.lock().fail_next_accept = true;
    }

    /// Ledger entries recorded for a job, in insertion order.
    pub fn ledger_entries(&self, job_id: DbId) -> Vec<LedgerEntry> {
        self.lock()
            .ledger
            .iter()
            .filter(|e| e.job_id == Some(job_id))
            .cloned()
            .collect()
    }

    /// Edit a stored job directly, bypassing the state machine.
    pub fn update_job(&self, id: DbId, edit: impl FnOnce(&mut GenerationJob)) -> bool {
        match self.lock().jobs.get_mut(&id) {
            Some(job) => {
                edit(job);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    fn job_in(&mut self, id: DbId, expected: JobStatus) -> Option<&mut GenerationJob> {
        self.jobs.get_mut(&id).filter(|job| job.status == expected)
    }

    fn fail_pending(&mut self, id: DbId, code: ErrorCode, reason: &str) -> bool {
        let Some(job) = self.job_in(id, JobStatus::Pending) else {
            return false;
        };
        job.status = JobStatus::Failed;
        job.error_code = Some(code.as_str().into());
        job.error_reason = Some(reason.to_string());
        job.progress = 0;
        job.updated_at = Utc::now();
        true
    }

    /// A completed job a migration sweep may claim right now.
    fn claimable_job(&mut self, id: DbId, stale_before: Timestamp) -> Option<&mut GenerationJob> {
        self.job_in(id, JobStatus::Completed).filter(|job| {
            transfer::is_claimable(job.file_transfer_status, job.transfer_claimed_at, stale_before)
        })
    }

    fn assets_of(&self, job_id: DbId) -> Vec<ResultAsset> {
        let mut out: Vec<ResultAsset> = self
            .assets
            .iter()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect();
        out.sort_by_key(|a| a.index);
        out
    }

    /// Void the job's live debit and credit it back.
    fn refund(&mut self, job_id: DbId) -> i32 {
        let mut refunded = 0;
        for entry in &mut self.ledger {
            if entry.job_id == Some(job_id) && entry.kind == EntryKind::Generation && !entry.voided {
                entry.voided = true;
                *self.balances.entry(entry.owner_id).or_default() -= entry.amount;
                refunded -= entry.amount;
            }
        }
        refunded
    }

    /// Un-void a refunded debit and take the credits again.
    fn restore(&mut self, job_id: DbId) -> i32 {
        let mut restored = 0;
        for entry in &mut self.ledger {
            if entry.job_id == Some(job_id) && entry.kind == EntryKind::Generation && entry.voided {
                entry.voided = false;
                *self.balances.entry(entry.owner_id).or_default() += entry.amount;
                restored -= entry.amount;
            }
        }
        restored
    }
}

fn sorted_newest_first(mut jobs: Vec<GenerationJob>) -> Vec<GenerationJob> {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    jobs
}

#[async_trait]
impl JobStore for MemoryBackend {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_pending(&self, input: &NewJob) -> Result<GenerationJob, StoreError> {
        let now = Utc::now();
        let job = GenerationJob {
            id: input.id,
            owner_id: input.owner_id,
            job_type: input.job_type,
            model_id: input.model_id.clone(),
            status: JobStatus::Pending,
            remote_task_id: None,
            webhook_token_hash: input.webhook_token_hash.clone(),
            callback_received: false,
            credits_cost: input.credits_cost,
            credits_deducted: false,
            progress: 0,
            error_code: None,
            error_reason: None,
            file_transfer_status: FileTransferStatus::NotApplicable,
            transfer_retry_count: 0,
            transfer_claimed_at: None,
            ephemeral_url_expires_at: None,
            metadata: input.metadata.clone(),
            accepted_at: None,
            completed_at: None,
            recovered_at: None,
            created_at: now,
            updated_at: now,
        };
        let mut state = self.lock();
        if state.jobs.contains_key(&input.id) {
            return Err(StoreError::Unavailable(format!("duplicate job id {}", input.id)));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn mark_provider_failed(&self, id: DbId, reason: &str) -> Result<bool, StoreError> {
        Ok(self.lock().fail_pending(id, ErrorCode::ApiCallFailed, reason))
    }

    async fn expire_pending(&self, id: DbId, reason: &str) -> Result<bool, StoreError> {
        Ok(self.lock().fail_pending(id, ErrorCode::SubmissionTimeout, reason))
    }

    async fn accept_task(
        &self,
        id: DbId,
        owner_id: DbId,
        remote_task_id: &str,
        charge: i32,
        progress: i16,
    ) -> Result<AcceptOutcome, StoreError> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_accept) {
            return Err(StoreError::Unavailable("connection reset during accept".into()));
        }
        if state.job_in(id, JobStatus::Pending).is_none() {
            return Ok(AcceptOutcome::NotPending);
        }

        let deducted = charge > 0;
        if deducted {
            let balance = state.balances.entry(owner_id).or_default();
            if *balance < charge {
                return Ok(AcceptOutcome::InsufficientCredits);
            }
            *balance -= charge;
            state.ledger.push(LedgerEntry {
                owner_id,
                job_id: Some(id),
                kind: EntryKind::Generation,
                amount: -charge,
                voided: false,
            });
        }

        let now = Utc::now();
        if let Some(job) = state.job_in(id, JobStatus::Pending) {
            job.status = JobStatus::Processing;
            job.remote_task_id = Some(remote_task_id.to_string());
            job.progress = progress;
            job.credits_deducted = deducted;
            job.accepted_at = Some(now);
            job.updated_at = now;
        }
        Ok(AcceptOutcome::Accepted)
    }

    async fn mark_bookkeeping_failed(
        &self,
        id: DbId,
        remote_task_id: &str,
        reason: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let Some(job) = state.job_in(id, JobStatus::Pending) else {
            return Ok(false);
        };
        job.status = JobStatus::Failed;
        job.remote_task_id = Some(remote_task_id.to_string());
        job.error_code = Some(ErrorCode::CreditsDeductionFailed.as_str().into());
        job.error_reason = Some(reason.to_string());
        job.progress = 0;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn apply_completion(&self, id: DbId, write: &CompletionWrite) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let now = Utc::now();
        let Some(job) = state.job_in(id, write.expected) else {
            return Ok(false);
        };
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.completed_at = Some(now);
        job.callback_received |= write.callback_received;
        job.file_transfer_status = FileTransferStatus::Pending;
        job.ephemeral_url_expires_at = Some(write.ephemeral_url_expires_at);
        if write.recovered {
            job.recovered_at = Some(now);
        }
        job.updated_at = now;

        for asset in &write.new_assets {
            let exists = state
                .assets
                .iter()
                .any(|a| a.job_id == id && a.source_url == asset.url);
            if !exists {
                state.assets.push(ResultAsset {
                    id: new_id(),
                    job_id: id,
                    index: asset.index,
                    url: asset.url.clone(),
                    source_url: asset.url.clone(),
                    kind: asset.kind,
                    thumbnail_url: None,
                    migrated_at: None,
                    created_at: now,
                });
            }
        }
        if write.restore_credits {
            state.restore(id);
        }
        Ok(true)
    }

    async fn apply_failure(&self, id: DbId, write: &FailureWrite) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let Some(job) = state.job_in(id, write.expected) else {
            return Ok(false);
        };
        job.status = JobStatus::Failed;
        job.error_code = Some(write.code.as_str().to_string());
        job.error_reason = write.reason.clone();
        job.progress = 0;
        job.callback_received |= write.callback_received;
        job.updated_at = Utc::now();

        if write.refund_credits {
            state.refund(id);
        }
        Ok(true)
    }

    async fn raise_progress(&self, id: DbId, progress: i16) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.job_in(id, JobStatus::Processing) {
            Some(job) if job.progress < progress => {
                job.progress = progress;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find(&self, id: DbId) -> Result<Option<GenerationJob>, StoreError> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn find_by_remote_task_id(
        &self,
        remote_task_id: &str,
    ) -> Result<Option<GenerationJob>, StoreError> {
        Ok(self
            .lock()
            .jobs
            .values()
            .find(|j| j.remote_task_id.as_deref() == Some(remote_task_id))
            .cloned())
    }

    async fn find_by_webhook_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<GenerationJob>, StoreError> {
        Ok(self
            .lock()
            .jobs
            .values()
            .find(|j| j.webhook_token_hash == token_hash)
            .cloned())
    }

    async fn list_assets(&self, job_id: DbId) -> Result<Vec<ResultAsset>, StoreError> {
        Ok(self.lock().assets_of(job_id))
    }

    async fn list_assets_for(&self, job_ids: &[DbId]) -> Result<Vec<ResultAsset>, StoreError> {
        let state = self.lock();
        Ok(job_ids.iter().flat_map(|id| state.assets_of(*id)).collect())
    }

    async fn list_processing(&self, limit: i64) -> Result<Vec<GenerationJob>, StoreError> {
        let mut jobs: Vec<GenerationJob> = self
            .lock()
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Processing && j.remote_task_id.is_some())
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.accepted_at);
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn list_stale_pending(
        &self,
        created_before: Timestamp,
        limit: i64,
    ) -> Result<Vec<GenerationJob>, StoreError> {
        let mut jobs: Vec<GenerationJob> = self
            .lock()
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.created_at < created_before)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn list_by_owner(
        &self,
        owner_id: DbId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<GenerationJob>, StoreError> {
        let limit = limit.unwrap_or(20).clamp(1, 100) as usize;
        let offset = offset.unwrap_or(0).max(0) as usize;
        let owned: Vec<GenerationJob> = self
            .lock()
            .jobs
            .values()
            .filter(|j| j.owner_id == owner_id)
            .cloned()
            .collect();
        Ok(sorted_newest_first(owned)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn count_by_owner(&self, owner_id: DbId) -> Result<i64, StoreError> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|j| j.owner_id == owner_id)
            .count() as i64)
    }

    async fn list_transfer_candidates(
        &self,
        filter: &CandidateFilter,
        max_retries: i32,
        stale_before: Timestamp,
    ) -> Result<Vec<GenerationJob>, StoreError> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Completed
                    && transfer::is_claimable(
                        j.file_transfer_status,
                        j.transfer_claimed_at,
                        stale_before,
                    )
                    && j.transfer_retry_count < max_retries
                    && filter.matches(j.job_type, j.created_at)
            })
            .cloned()
            .collect())
    }

    async fn claim_transfer(&self, id: DbId, stale_before: Timestamp) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let Some(job) = state.claimable_job(id, stale_before) else {
            return Ok(false);
        };
        if job.file_transfer_status == FileTransferStatus::Transferring {
            job.transfer_retry_count += 1;
        }
        let now = Utc::now();
        job.file_transfer_status = FileTransferStatus::Transferring;
        job.transfer_claimed_at = Some(now);
        job.updated_at = now;
        Ok(true)
    }

    async fn abandon_transfer(
        &self,
        id: DbId,
        max_retries: i32,
        stale_before: Timestamp,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.claimable_job(id, stale_before) {
            Some(job) if job.transfer_retry_count < max_retries => {
                job.file_transfer_status = FileTransferStatus::Failed;
                job.transfer_retry_count = max_retries;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_transfer_outcome(
        &self,
        id: DbId,
        all_migrated: bool,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if all_migrated {
            job.file_transfer_status = FileTransferStatus::Completed;
            job.transfer_retry_count = 0;
        } else {
            job.file_transfer_status = FileTransferStatus::Failed;
            job.transfer_retry_count += 1;
        }
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_asset_migrated(
        &self,
        asset_id: DbId,
        durable_url: &str,
        thumbnail_url: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state
            .assets
            .iter_mut()
            .find(|a| a.id == asset_id && a.migrated_at.is_none())
        {
            Some(asset) => {
                asset.url = durable_url.to_string();
                asset.thumbnail_url = thumbnail_url.map(str::to_string);
                asset.migrated_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl CreditLedger for MemoryBackend {
    async fn balance(&self, owner_id: DbId) -> Result<i32, StoreError> {
        Ok(self.lock().balances.get(&owner_id).copied().unwrap_or(0))
    }

    async fn grant(
        &self,
        owner_id: DbId,
        amount: i32,
        _description: Option<&str>,
    ) -> Result<i32, StoreError> {
        let mut state = self.lock();
        let balance = state.balances.entry(owner_id).or_default();
        *balance += amount;
        let balance = *balance;
        state.ledger.push(LedgerEntry {
            owner_id,
            job_id: None,
            kind: EntryKind::Grant,
            amount,
            voided: false,
        });
        Ok(balance)
    }
}
