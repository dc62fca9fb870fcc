//! Postgres-backed [`JobStore`] and [`CreditLedger`].

use async_trait::async_trait;
use atelier_core::job::{GenerationJob, NewJob, ResultAsset};
use atelier_core::transfer::CandidateFilter;
use atelier_core::types::{DbId, Timestamp};
use atelier_db::models::generation_job::GenerationJobRow;
use atelier_db::models::result_asset::ResultAssetRow;
use atelier_db::repositories::{CreditRepo, GenerationJobRepo, ResultAssetRepo};
use atelier_db::DbPool;

use super::{AcceptOutcome, CompletionWrite, CreditLedger, FailureWrite, JobStore};
use crate::error::StoreError;

/// Ledger note attached to refunds and restores.
const REFUND_REASON_FAILED: &str = "generation failed";
const RESTORE_REASON_RECOVERED: &str = "late success after failure";

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn jobs(rows: Vec<GenerationJobRow>) -> Result<Vec<GenerationJob>, StoreError> {
    rows.into_iter()
        .map(|row| GenerationJob::try_from(row).map_err(StoreError::from))
        .collect()
}

fn job(row: Option<GenerationJobRow>) -> Result<Option<GenerationJob>, StoreError> {
    Ok(row.map(GenerationJob::try_from).transpose()?)
}

fn assets(rows: Vec<ResultAssetRow>) -> Result<Vec<ResultAsset>, StoreError> {
    rows.into_iter()
        .map(|row| ResultAsset::try_from(row).map_err(StoreError::from))
        .collect()
}

#[async_trait]
impl JobStore for PgStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        atelier_db::health_check(&self.pool).await?;
        Ok(())
    }

    async fn insert_pending(&self, input: &NewJob) -> Result<GenerationJob, StoreError> {
        let row = GenerationJobRepo::insert_pending(&self.pool, input).await?;
        Ok(GenerationJob::try_from(row)?)
    }

    async fn mark_provider_failed(&self, id: DbId, reason: &str) -> Result<bool, StoreError> {
        Ok(GenerationJobRepo::mark_provider_failed(&self.pool, id, reason).await?)
    }

    async fn expire_pending(&self, id: DbId, reason: &str) -> Result<bool, StoreError> {
        Ok(GenerationJobRepo::expire_pending(&self.pool, id, reason).await?)
    }

    async fn accept_task(
        &self,
        id: DbId,
        owner_id: DbId,
        remote_task_id: &str,
        charge: i32,
        progress: i16,
    ) -> Result<AcceptOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let deducted = charge > 0;
        if deducted && !CreditRepo::decrease(&mut tx, owner_id, id, charge).await? {
            tx.rollback().await?;
            return Ok(AcceptOutcome::InsufficientCredits);
        }
        if !GenerationJobRepo::accept(&mut tx, id, remote_task_id, progress, deducted).await? {
            tx.rollback().await?;
            return Ok(AcceptOutcome::NotPending);
        }

        tx.commit().await?;
        Ok(AcceptOutcome::Accepted)
    }

    async fn mark_bookkeeping_failed(
        &self,
        id: DbId,
        remote_task_id: &str,
        reason: &str,
    ) -> Result<bool, StoreError> {
        Ok(GenerationJobRepo::mark_bookkeeping_failed(&self.pool, id, remote_task_id, reason).await?)
    }

    async fn apply_completion(&self, id: DbId, write: &CompletionWrite) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let applied = GenerationJobRepo::complete(
            &mut tx,
            id,
            write.expected,
            write.callback_received,
            write.ephemeral_url_expires_at,
            write.recovered,
        )
        .await?;
        if !applied {
            tx.rollback().await?;
            return Ok(false);
        }

        let inserted = ResultAssetRepo::insert_many(&mut tx, id, &write.new_assets).await?;
        if inserted < write.new_assets.len() as u64 {
            tracing::debug!(job_id = %id, inserted, "Some result assets were already recorded");
        }
        if write.restore_credits {
            let restored = CreditRepo::restore(&mut tx, id, RESTORE_REASON_RECOVERED).await?;
            tracing::debug!(job_id = %id, restored, "Credits restored");
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn apply_failure(&self, id: DbId, write: &FailureWrite) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let applied = GenerationJobRepo::fail(
            &mut tx,
            id,
            write.expected,
            write.code,
            write.reason.as_deref(),
            write.callback_received,
        )
        .await?;
        if !applied {
            tx.rollback().await?;
            return Ok(false);
        }
        if write.refund_credits {
            let refunded = CreditRepo::refund(&mut tx, id, REFUND_REASON_FAILED).await?;
            tracing::debug!(job_id = %id, refunded, "Credits refunded");
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn raise_progress(&self, id: DbId, progress: i16) -> Result<bool, StoreError> {
        Ok(GenerationJobRepo::raise_progress(&self.pool, id, progress).await?)
    }

    async fn find(&self, id: DbId) -> Result<Option<GenerationJob>, StoreError> {
        job(GenerationJobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_by_remote_task_id(
        &self,
        remote_task_id: &str,
    ) -> Result<Option<GenerationJob>, StoreError> {
        job(GenerationJobRepo::find_by_remote_task_id(&self.pool, remote_task_id).await?)
    }

    async fn find_by_webhook_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<GenerationJob>, StoreError> {
        job(GenerationJobRepo::find_by_webhook_token_hash(&self.pool, token_hash).await?)
    }

    async fn list_assets(&self, job_id: DbId) -> Result<Vec<ResultAsset>, StoreError> {
        assets(ResultAssetRepo::list_by_job(&self.pool, job_id).await?)
    }

    async fn list_assets_for(&self, job_ids: &[DbId]) -> Result<Vec<ResultAsset>, StoreError> {
        assets(ResultAssetRepo::list_by_jobs(&self.pool, job_ids).await?)
    }

    async fn list_processing(&self, limit: i64) -> Result<Vec<GenerationJob>, StoreError> {
        jobs(GenerationJobRepo::list_processing(&self.pool, limit).await?)
    }

    async fn list_stale_pending(
        &self,
        created_before: Timestamp,
        limit: i64,
    ) -> Result<Vec<GenerationJob>, StoreError> {
        jobs(GenerationJobRepo::list_stale_pending(&self.pool, created_before, limit).await?)
    }

    async fn list_by_owner(
        &self,
        owner_id: DbId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<GenerationJob>, StoreError> {
        jobs(GenerationJobRepo::list_by_owner(&self.pool, owner_id, limit, offset).await?)
    }

    async fn count_by_owner(&self, owner_id: DbId) -> Result<i64, StoreError> {
        Ok(GenerationJobRepo::count_by_owner(&self.pool, owner_id).await?)
    }

    async fn list_transfer_candidates(
        &self,
        filter: &CandidateFilter,
        max_retries: i32,
        stale_before: Timestamp,
    ) -> Result<Vec<GenerationJob>, StoreError> {
        jobs(
            GenerationJobRepo::list_transfer_candidates(&self.pool, filter, max_retries, stale_before)
                .await?,
        )
    }

    async fn claim_transfer(&self, id: DbId, stale_before: Timestamp) -> Result<bool, StoreError> {
        Ok(GenerationJobRepo::claim_transfer(&self.pool, id, stale_before).await?)
    }

    async fn abandon_transfer(
        &self,
        id: DbId,
        max_retries: i32,
        stale_before: Timestamp,
    ) -> Result<bool, StoreError> {
        Ok(GenerationJobRepo::abandon_transfer(&self.pool, id, max_retries, stale_before).await?)
    }

    async fn record_transfer_outcome(
        &self,
        id: DbId,
        all_migrated: bool,
    ) -> Result<bool, StoreError> {
        Ok(GenerationJobRepo::record_transfer_outcome(&self.pool, id, all_migrated).await?)
    }

    async fn mark_asset_migrated(
        &self,
        asset_id: DbId,
        durable_url: &str,
        thumbnail_url: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(ResultAssetRepo::mark_migrated(&self.pool, asset_id, durable_url, thumbnail_url).await?)
    }
}

#[async_trait]
impl CreditLedger for PgStore {
    async fn balance(&self, owner_id: DbId) -> Result<i32, StoreError> {
        Ok(CreditRepo::balance(&self.pool, owner_id).await?)
    }

    async fn grant(
        &self,
        owner_id: DbId,
        amount: i32,
        description: Option<&str>,
    ) -> Result<i32, StoreError> {
        let account = CreditRepo::grant(&self.pool, owner_id, amount, description).await?;
        Ok(account.balance)
    }
}
