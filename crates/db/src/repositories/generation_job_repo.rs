//! Repository for the `generation_jobs` table.
//!
//! Every state transition is a conditional `UPDATE ... WHERE status_id = $n`
//! and reports whether it applied, so concurrent webhook, polling and
//! migration workers can detect that another writer got there first.

use atelier_core::job::NewJob;
use atelier_core::status::{FileTransferStatus, JobStatus, StatusId};
use atelier_core::task_state::ErrorCode;
use atelier_core::transfer::CandidateFilter;
use atelier_core::types::{DbId, Timestamp};
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::generation_job::GenerationJobRow;

/// Column list for `generation_jobs` queries.
const COLUMNS: &str = "\
    id, owner_id, job_type, model_id, status_id, remote_task_id, \
    webhook_token_hash, callback_received, credits_cost, credits_deducted, \
    progress, error_code, error_reason, file_transfer_status_id, \
    transfer_retry_count, transfer_claimed_at, ephemeral_url_expires_at, metadata, \
    accepted_at, completed_at, recovered_at, created_at, updated_at";

/// Transfer states a sweep may claim, with the parameter layout every
/// migration query shares: `$3` the always-claimable status ids, `$4` the
/// `Transferring` id, `$5` the stale-claim cutoff.
const CLAIMABLE: &str = "\
    (file_transfer_status_id = ANY($3) \
     OR (file_transfer_status_id = $4 \
         AND (transfer_claimed_at IS NULL OR transfer_claimed_at < $5)))";

/// Transfer statuses that can always be claimed.
static CLAIMABLE_STATUSES: [StatusId; 2] = [
    FileTransferStatus::Pending.id(),
    FileTransferStatus::Failed.id(),
];

/// Maximum page size for history listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for history listing.
const DEFAULT_LIMIT: i64 = 20;

/// Provides persistence for generation jobs.
pub struct GenerationJobRepo;

impl GenerationJobRepo {
    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Insert a new job in `Pending`.
    pub async fn insert_pending(
        pool: &PgPool,
        input: &NewJob,
    ) -> Result<GenerationJobRow, sqlx::Error> {
        let metadata = serde_json::to_value(&input.metadata)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        let query = format!(
            "INSERT INTO generation_jobs \
                 (id, owner_id, job_type, model_id, status_id, webhook_token_hash, \
                  credits_cost, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationJobRow>(&query)
            .bind(input.id)
            .bind(input.owner_id)
            .bind(input.job_type.as_str())
            .bind(&input.model_id)
            .bind(JobStatus::Pending.id())
            .bind(&input.webhook_token_hash)
            .bind(input.credits_cost)
            .bind(metadata)
            .fetch_one(pool)
            .await
    }

    /// Record that the provider rejected `createTask`. Only applies to a
    /// job still in `Pending`.
    pub async fn mark_provider_failed(
        pool: &PgPool,
        id: DbId,
        reason: &str,
    ) -> Result<bool, sqlx::Error> {
        Self::fail_pending(pool, id, ErrorCode::ApiCallFailed, reason).await
    }

    /// Fail a job that never left `Pending` within the polling ceiling.
    pub async fn expire_pending(pool: &PgPool, id: DbId, reason: &str) -> Result<bool, sqlx::Error> {
        Self::fail_pending(pool, id, ErrorCode::SubmissionTimeout, reason).await
    }

    async fn fail_pending(
        pool: &PgPool,
        id: DbId,
        code: ErrorCode,
        reason: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs \
             SET status_id = $2, error_code = $3, error_reason = $4, progress = 0 \
             WHERE id = $1 AND status_id = $5",
        )
        .bind(id)
        .bind(JobStatus::Failed.id())
        .bind(code.as_str())
        .bind(reason)
        .bind(JobStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a `Pending` job to `Processing` inside the caller's transaction.
    ///
    /// `deducted` must only be true when the same transaction also holds
    /// the ledger debit for this job.
    pub async fn accept(
        tx: &mut Transaction<'_, Postgres>,
        id: DbId,
        remote_task_id: &str,
        progress: i16,
        deducted: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs \
             SET status_id = $2, remote_task_id = $3, progress = $4, \
                 credits_deducted = $5, accepted_at = NOW() \
             WHERE id = $1 AND status_id = $6",
        )
        .bind(id)
        .bind(JobStatus::Processing.id())
        .bind(remote_task_id)
        .bind(progress)
        .bind(deducted)
        .bind(JobStatus::Pending.id())
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a post-acceptance bookkeeping failure.
    ///
    /// The remote task id is kept for operators; `credits_deducted` stays
    /// false because the debit transaction rolled back.
    pub async fn mark_bookkeeping_failed(
        pool: &PgPool,
        id: DbId,
        remote_task_id: &str,
        reason: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs \
             SET status_id = $2, remote_task_id = $3, error_code = $4, \
                 error_reason = $5, progress = 0 \
             WHERE id = $1 AND status_id = $6",
        )
        .bind(id)
        .bind(JobStatus::Failed.id())
        .bind(remote_task_id)
        .bind(ErrorCode::CreditsDeductionFailed.as_str())
        .bind(reason)
        .bind(JobStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Mark a job `Completed` if it is still in `expected`.
    pub async fn complete(
        tx: &mut Transaction<'_, Postgres>,
        id: DbId,
        expected: JobStatus,
        callback_received: bool,
        expires_at: Timestamp,
        recovered: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs \
             SET status_id = $2, progress = 100, completed_at = NOW(), \
                 callback_received = callback_received OR $3, \
                 file_transfer_status_id = $4, ephemeral_url_expires_at = $5, \
                 recovered_at = CASE WHEN $6 THEN NOW() ELSE recovered_at END \
             WHERE id = $1 AND status_id = $7",
        )
        .bind(id)
        .bind(JobStatus::Completed.id())
        .bind(callback_received)
        .bind(FileTransferStatus::Pending.id())
        .bind(expires_at)
        .bind(recovered)
        .bind(expected.id())
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a job `Failed` if it is still in `expected`.
    pub async fn fail(
        tx: &mut Transaction<'_, Postgres>,
        id: DbId,
        expected: JobStatus,
        code: ErrorCode,
        reason: Option<&str>,
        callback_received: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs \
             SET status_id = $2, error_code = $3, error_reason = $4, progress = 0, \
                 callback_received = callback_received OR $5 \
             WHERE id = $1 AND status_id = $6",
        )
        .bind(id)
        .bind(JobStatus::Failed.id())
        .bind(code.as_str())
        .bind(reason)
        .bind(callback_received)
        .bind(expected.id())
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Raise progress on a `Processing` job. Never lowers it.
    pub async fn raise_progress(pool: &PgPool, id: DbId, progress: i16) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs SET progress = $2 \
             WHERE id = $1 AND status_id = $3 AND progress < $2",
        )
        .bind(id)
        .bind(progress)
        .bind(JobStatus::Processing.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<GenerationJobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generation_jobs WHERE id = $1");
        sqlx::query_as::<_, GenerationJobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_remote_task_id(
        pool: &PgPool,
        remote_task_id: &str,
    ) -> Result<Option<GenerationJobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generation_jobs WHERE remote_task_id = $1");
        sqlx::query_as::<_, GenerationJobRow>(&query)
            .bind(remote_task_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_webhook_token_hash(
        pool: &PgPool,
        token_hash: &str,
    ) -> Result<Option<GenerationJobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generation_jobs WHERE webhook_token_hash = $1");
        sqlx::query_as::<_, GenerationJobRow>(&query)
            .bind(token_hash)
            .fetch_optional(pool)
            .await
    }

    /// All jobs currently awaiting a provider terminal signal, oldest
    /// acceptance first.
    pub async fn list_processing(pool: &PgPool, limit: i64) -> Result<Vec<GenerationJobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_jobs \
             WHERE status_id = $1 AND remote_task_id IS NOT NULL \
             ORDER BY accepted_at ASC NULLS LAST \
             LIMIT $2"
        );
        sqlx::query_as::<_, GenerationJobRow>(&query)
            .bind(JobStatus::Processing.id())
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Jobs stuck in `Pending` since before `created_before`, oldest first.
    pub async fn list_stale_pending(
        pool: &PgPool,
        created_before: Timestamp,
        limit: i64,
    ) -> Result<Vec<GenerationJobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_jobs \
             WHERE status_id = $1 AND created_at < $2 \
             ORDER BY created_at ASC \
             LIMIT $3"
        );
        sqlx::query_as::<_, GenerationJobRow>(&query)
            .bind(JobStatus::Pending.id())
            .bind(created_before)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Paginated job history for one owner, newest first.
    pub async fn list_by_owner(
        pool: &PgPool,
        owner_id: DbId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<GenerationJobRow>, sqlx::Error> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        let query = format!(
            "SELECT {COLUMNS} FROM generation_jobs \
             WHERE owner_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, GenerationJobRow>(&query)
            .bind(owner_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    pub async fn count_by_owner(pool: &PgPool, owner_id: DbId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM generation_jobs WHERE owner_id = $1")
            .bind(owner_id)
            .fetch_one(pool)
            .await
    }

    // -----------------------------------------------------------------------
    // Durable migration
    // -----------------------------------------------------------------------

    /// Completed jobs under the retry cap whose transfer is pending,
    /// failed, or claimed before `stale_before` and never finished.
    /// Expiry filtering and ordering happen in the caller.
    pub async fn list_transfer_candidates(
        pool: &PgPool,
        filter: &CandidateFilter,
        max_retries: i32,
        stale_before: Timestamp,
    ) -> Result<Vec<GenerationJobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_jobs \
             WHERE status_id = $1 \
               AND transfer_retry_count < $2 \
               AND {CLAIMABLE} \
               AND ($6::TIMESTAMPTZ IS NULL OR created_at >= $6) \
               AND ($7::TIMESTAMPTZ IS NULL OR created_at <= $7) \
               AND ($8::TEXT IS NULL OR job_type = $8)"
        );
        sqlx::query_as::<_, GenerationJobRow>(&query)
            .bind(JobStatus::Completed.id())
            .bind(max_retries)
            .bind(&CLAIMABLE_STATUSES[..])
            .bind(FileTransferStatus::Transferring.id())
            .bind(stale_before)
            .bind(filter.created_from)
            .bind(filter.created_to)
            .bind(filter.job_type.map(|t| t.as_str()))
            .fetch_all(pool)
            .await
    }

    /// Claim a job for migration: move it to `Transferring` and stamp the
    /// claim. Taking over a claim older than `stale_before` counts the
    /// abandoned attempt against the retry cap.
    pub async fn claim_transfer(
        pool: &PgPool,
        id: DbId,
        stale_before: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let query = format!(
            "UPDATE generation_jobs \
             SET transfer_retry_count = transfer_retry_count \
                     + CASE WHEN file_transfer_status_id = $4 THEN 1 ELSE 0 END, \
                 file_transfer_status_id = $4, transfer_claimed_at = NOW() \
             WHERE id = $1 AND status_id = $2 AND {CLAIMABLE}"
        );
        let result = sqlx::query(&query)
            .bind(id)
            .bind(JobStatus::Completed.id())
            .bind(&CLAIMABLE_STATUSES[..])
            .bind(FileTransferStatus::Transferring.id())
            .bind(stale_before)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a claimable job's transfer `Failed` with the retry count at
    /// `max_retries`. Applies once: afterwards the job is past the cap.
    pub async fn abandon_transfer(
        pool: &PgPool,
        id: DbId,
        max_retries: i32,
        stale_before: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let query = format!(
            "UPDATE generation_jobs \
             SET file_transfer_status_id = $6, transfer_retry_count = $7 \
             WHERE id = $1 AND status_id = $2 AND transfer_retry_count < $7 AND {CLAIMABLE}"
        );
        let result = sqlx::query(&query)
            .bind(id)
            .bind(JobStatus::Completed.id())
            .bind(&CLAIMABLE_STATUSES[..])
            .bind(FileTransferStatus::Transferring.id())
            .bind(stale_before)
            .bind(FileTransferStatus::Failed.id())
            .bind(max_retries)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record the outcome of a migration attempt.
    ///
    /// Success resets the retry counter; anything else marks the transfer
    /// `Failed` and increments it.
    pub async fn record_transfer_outcome(
        pool: &PgPool,
        id: DbId,
        all_migrated: bool,
    ) -> Result<bool, sqlx::Error> {
        let query = if all_migrated {
            "UPDATE generation_jobs \
             SET file_transfer_status_id = $2, transfer_retry_count = 0 \
             WHERE id = $1"
        } else {
            "UPDATE generation_jobs \
             SET file_transfer_status_id = $2, transfer_retry_count = transfer_retry_count + 1 \
             WHERE id = $1"
        };
        let status = if all_migrated {
            FileTransferStatus::Completed
        } else {
            FileTransferStatus::Failed
        };
        let result = sqlx::query(query)
            .bind(id)
            .bind(status.id())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
