//! Persistence and ledger seams.
//!
//! The orchestrator, reconciler and schedulers only talk to these traits.
//! Each write that must be atomic with a ledger movement is a single
//! method, so every backend can honour the guarantee its own way: one
//! database transaction for [`PgStore`], one critical section for
//! [`MemoryBackend`].

use async_trait::async_trait;
use atelier_core::job::{GenerationJob, NewAsset, NewJob, ResultAsset};
use atelier_core::status::JobStatus;
use atelier_core::task_state::ErrorCode;
use atelier_core::transfer::CandidateFilter;
use atelier_core::types::{DbId, Timestamp};

use crate::error::StoreError;

pub mod memory;
pub mod pg;

pub use memory::MemoryBackend;
pub use pg::PgStore;

/// Result of moving a `Pending` job to `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Status updated and, for a positive charge, credits debited.
    Accepted,
    /// The balance no longer covers the charge; nothing was written.
    InsufficientCredits,
    /// The job had already left `Pending`; nothing was written.
    NotPending,
}

/// A `Completed` transition with its asset inserts and optional restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionWrite {
    /// Status the job must still be in for the write to apply.
    pub expected: JobStatus,
    pub new_assets: Vec<NewAsset>,
    pub restore_credits: bool,
    pub recovered: bool,
    pub callback_received: bool,
    pub ephemeral_url_expires_at: Timestamp,
}

/// A `Failed` transition with its optional refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureWrite {
    pub expected: JobStatus,
    pub code: ErrorCode,
    pub reason: Option<String>,
    pub refund_credits: bool,
    pub callback_received: bool,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    // -- creation ----------------------------------------------------------

    async fn insert_pending(&self, job: &NewJob) -> Result<GenerationJob, StoreError>;

    /// `Pending` → `Failed` with `API_CALL_FAILED`.
    async fn mark_provider_failed(&self, id: DbId, reason: &str) -> Result<bool, StoreError>;

    /// `Pending` → `Failed` with `SUBMISSION_TIMEOUT`. No ledger movement:
    /// nothing is charged before acceptance.
    async fn expire_pending(&self, id: DbId, reason: &str) -> Result<bool, StoreError>;

    /// `Pending` → `Processing`, debiting `charge` credits from `owner_id`
    /// in the same atomic unit when `charge > 0`.
    async fn accept_task(
        &self,
        id: DbId,
        owner_id: DbId,
        remote_task_id: &str,
        charge: i32,
        progress: i16,
    ) -> Result<AcceptOutcome, StoreError>;

    /// `Pending` → `Failed` with `CREDITS_DEDUCTION_FAILED`, keeping the
    /// remote task id for operators.
    async fn mark_bookkeeping_failed(
        &self,
        id: DbId,
        remote_task_id: &str,
        reason: &str,
    ) -> Result<bool, StoreError>;

    // -- reconciliation ----------------------------------------------------

    /// Apply a completion if the job is still in `write.expected`.
    /// Returns false when another writer got there first.
    async fn apply_completion(&self, id: DbId, write: &CompletionWrite) -> Result<bool, StoreError>;

    /// Apply a failure if the job is still in `write.expected`.
    async fn apply_failure(&self, id: DbId, write: &FailureWrite) -> Result<bool, StoreError>;

    async fn raise_progress(&self, id: DbId, progress: i16) -> Result<bool, StoreError>;

    // -- lookups -----------------------------------------------------------

    async fn find(&self, id: DbId) -> Result<Option<GenerationJob>, StoreError>;

    async fn find_by_remote_task_id(
        &self,
        remote_task_id: &str,
    ) -> Result<Option<GenerationJob>, StoreError>;

    async fn find_by_webhook_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<GenerationJob>, StoreError>;

    /// Assets of one job in index order.
    async fn list_assets(&self, job_id: DbId) -> Result<Vec<ResultAsset>, StoreError>;

    /// Assets of several jobs, grouped by job then index.
    async fn list_assets_for(&self, job_ids: &[DbId]) -> Result<Vec<ResultAsset>, StoreError>;

    /// `Processing` jobs with a remote task, oldest acceptance first.
    async fn list_processing(&self, limit: i64) -> Result<Vec<GenerationJob>, StoreError>;

    /// `Pending` jobs created before `created_before`, oldest first.
    async fn list_stale_pending(
        &self,
        created_before: Timestamp,
        limit: i64,
    ) -> Result<Vec<GenerationJob>, StoreError>;

    async fn list_by_owner(
        &self,
        owner_id: DbId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<GenerationJob>, StoreError>;

    async fn count_by_owner(&self, owner_id: DbId) -> Result<i64, StoreError>;

    // -- durable migration -------------------------------------------------

    /// Completed jobs under the retry cap whose transfer is `Pending`,
    /// `Failed`, or `Transferring` with a claim taken before
    /// `stale_before`.
    async fn list_transfer_candidates(
        &self,
        filter: &CandidateFilter,
        max_retries: i32,
        stale_before: Timestamp,
    ) -> Result<Vec<GenerationJob>, StoreError>;

    /// Move a completed job to `Transferring` and stamp the claim, if
    /// [`transfer::is_claimable`] allows it. Taking over an abandoned
    /// claim counts as one failed attempt.
    ///
    /// [`transfer::is_claimable`]: atelier_core::transfer::is_claimable
    async fn claim_transfer(&self, id: DbId, stale_before: Timestamp) -> Result<bool, StoreError>;

    /// Give up on a claimable job whose sources expired: mark it `Failed`
    /// with the retry count at `max_retries` so no sweep selects it again.
    async fn abandon_transfer(
        &self,
        id: DbId,
        max_retries: i32,
        stale_before: Timestamp,
    ) -> Result<bool, StoreError>;

    async fn record_transfer_outcome(&self, id: DbId, all_migrated: bool)
        -> Result<bool, StoreError>;

    async fn mark_asset_migrated(
        &self,
        asset_id: DbId,
        durable_url: &str,
        thumbnail_url: Option<&str>,
    ) -> Result<bool, StoreError>;
}

/// Balance reads and top-ups. Debits, refunds and restores are composed
/// into the [`JobStore`] transitions above.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn balance(&self, owner_id: DbId) -> Result<i32, StoreError>;

    /// Add credits and return the new balance.
    async fn grant(
        &self,
        owner_id: DbId,
        amount: i32,
        description: Option<&str>,
    ) -> Result<i32, StoreError>;
}
