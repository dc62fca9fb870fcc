//! Durable migration of ephemeral result URLs.
//!
//! Each sweep selects completed jobs under the retry cap whose transfer is
//! `Pending`, `Failed`, or `Transferring` under a claim older than the
//! lease (a worker died or lost its database mid-job). Jobs whose provider
//! URLs already expired are reported once and retired; the rest are
//! migrated in priority order with bounded concurrency. Only one sweep
//! runs at a time within a process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use atelier_core::job::{AssetKind, GenerationJob, ResultAsset};
use atelier_core::metadata::JobType;
use atelier_core::redact::mask_url;
use atelier_core::status::FileTransferStatus;
use atelier_core::transfer::{
    self, asset_key, content_type_for_extension, extension_from_url, thumbnail_key,
    CandidateFilter, PriorityKey, ThumbnailVariant,
};
use atelier_core::types::{DbId, Timestamp};
use atelier_storage::{images, ObjectStorage, SourceFetcher, StorageError};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::services::Services;

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("A migration sweep is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
enum AssetError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Image processing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A migration candidate as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedCandidate {
    /// 1-based position in the processing order; 0 for expired jobs.
    pub rank: usize,
    pub job_id: DbId,
    pub job_type: JobType,
    pub file_transfer_status: FileTransferStatus,
    pub transfer_retry_count: i32,
    pub ephemeral_url_expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// Current migration queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingMigrations {
    pub candidates: Vec<RankedCandidate>,
    /// Candidates whose sources are gone; the next sweep retires them.
    pub expired: Vec<RankedCandidate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobMigration {
    Migrated,
    Failed,
    /// Claimed by another worker or no longer eligible.
    Skipped,
}

/// Counts from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub candidates: usize,
    pub expired: usize,
    pub migrated: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct MigrationScheduler {
    services: Arc<Services>,
    storage: Arc<dyn ObjectStorage>,
    fetcher: Arc<dyn SourceFetcher>,
    running: Arc<AtomicBool>,
}

/// Releases the single-flight flag when dropped.
struct SweepPermit {
    flag: Arc<AtomicBool>,
}

impl Drop for SweepPermit {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

fn priority_key(job: &GenerationJob) -> PriorityKey {
    PriorityKey {
        expires_at: job.ephemeral_url_expires_at,
        status: job.file_transfer_status,
        retry_count: job.transfer_retry_count,
        created_at: job.created_at,
    }
}

fn ranked(rank: usize, job: &GenerationJob) -> RankedCandidate {
    RankedCandidate {
        rank,
        job_id: job.id,
        job_type: job.job_type,
        file_transfer_status: job.file_transfer_status,
        transfer_retry_count: job.transfer_retry_count,
        ephemeral_url_expires_at: job.ephemeral_url_expires_at,
        created_at: job.created_at,
    }
}

impl MigrationScheduler {
    pub fn new(
        services: Arc<Services>,
        storage: Arc<dyn ObjectStorage>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        Self {
            services,
            storage,
            fetcher,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run a sweep every configured interval until `cancel` is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let config = &self.services.config.migration;
        let mut ticker = tokio::time::interval(config.interval);
        tracing::info!(
            interval_secs = config.interval.as_secs(),
            max_retries = config.max_retries,
            "Migration scheduler started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Migration scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.sweep(&CandidateFilter::default()).await {
                        Ok(report) if report.candidates > 0 || report.expired > 0 => {
                            tracing::info!(?report, "Migration sweep finished");
                        }
                        Ok(_) => {}
                        Err(MigrationError::AlreadyRunning) => {
                            tracing::debug!("Migration sweep skipped; previous sweep still running");
                        }
                        Err(e) => tracing::error!(error = %e, "Migration sweep failed"),
                    }
                }
            }
        }
    }

    /// Run one sweep now, in the caller's task.
    pub async fn sweep(&self, filter: &CandidateFilter) -> Result<SweepReport, MigrationError> {
        let _permit = self.acquire()?;
        Ok(self.run_sweep(filter).await?)
    }

    /// Start a sweep on a background task and return immediately.
    ///
    /// Fails with [`MigrationError::AlreadyRunning`] when a sweep is in
    /// progress.
    pub fn trigger(self: &Arc<Self>, filter: CandidateFilter) -> Result<(), MigrationError> {
        let permit = self.acquire()?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            match this.run_sweep(&filter).await {
                Ok(report) => tracing::info!(?report, "Triggered migration sweep finished"),
                Err(e) => tracing::error!(error = %e, "Triggered migration sweep failed"),
            }
        });
        Ok(())
    }

    /// The current queue in processing order, plus expired candidates.
    pub async fn pending(&self, filter: &CandidateFilter) -> Result<PendingMigrations, StoreError> {
        let (live, expired) = self.select(filter, self.stale_claim_cutoff()).await?;
        Ok(PendingMigrations {
            candidates: live
                .iter()
                .enumerate()
                .map(|(i, job)| ranked(i + 1, job))
                .collect(),
            expired: expired.iter().map(|job| ranked(0, job)).collect(),
        })
    }

    fn acquire(&self) -> Result<SweepPermit, MigrationError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| MigrationError::AlreadyRunning)?;
        Ok(SweepPermit {
            flag: Arc::clone(&self.running),
        })
    }

    /// Claims taken before this instant are considered abandoned.
    fn stale_claim_cutoff(&self) -> Timestamp {
        Utc::now() - self.services.config.migration.claim_lease
    }

    /// Candidates split into (live in priority order, expired).
    async fn select(
        &self,
        filter: &CandidateFilter,
        stale_before: Timestamp,
    ) -> Result<(Vec<GenerationJob>, Vec<GenerationJob>), StoreError> {
        let max_retries = self.services.config.migration.max_retries;
        let candidates = self
            .services
            .store
            .list_transfer_candidates(filter, max_retries, stale_before)
            .await?;

        let now = Utc::now();
        let (mut live, expired): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|job| !transfer::is_expired(job.ephemeral_url_expires_at, now));
        transfer::sort_by_priority(&mut live, priority_key);
        Ok((live, expired))
    }

    async fn run_sweep(&self, filter: &CandidateFilter) -> Result<SweepReport, StoreError> {
        let stale_before = self.stale_claim_cutoff();
        let (live, expired) = self.select(filter, stale_before).await?;

        for job in &expired {
            self.retire_expired(job, stale_before).await;
        }

        let mut report = SweepReport {
            candidates: live.len(),
            expired: expired.len(),
            ..Default::default()
        };
        let concurrency = self.services.config.migration.job_concurrency.max(1);
        let results: Vec<JobMigration> = stream::iter(live)
            .map(|job| self.migrate_job(job, stale_before))
            .buffer_unordered(concurrency)
            .collect()
            .await;
        for result in results {
            match result {
                JobMigration::Migrated => report.migrated += 1,
                JobMigration::Failed => report.failed += 1,
                JobMigration::Skipped => report.skipped += 1,
            }
        }
        Ok(report)
    }

    /// Report lost sources once, then take the job out of the queue.
    async fn retire_expired(&self, job: &GenerationJob, stale_before: Timestamp) {
        let max_retries = self.services.config.migration.max_retries;
        match self
            .services
            .store
            .abandon_transfer(job.id, max_retries, stale_before)
            .await
        {
            Ok(true) => tracing::error!(
                job_id = %job.id,
                expired_at = ?job.ephemeral_url_expires_at,
                retry_count = job.transfer_retry_count,
                "Result URLs expired before migration; assets lost",
            ),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to retire expired migration");
            }
        }
    }

    async fn migrate_job(&self, job: GenerationJob, stale_before: Timestamp) -> JobMigration {
        let store = &self.services.store;
        if job.file_transfer_status == FileTransferStatus::Transferring {
            tracing::warn!(
                job_id = %job.id,
                claimed_at = ?job.transfer_claimed_at,
                "Taking over an abandoned migration claim",
            );
        }
        match store.claim_transfer(job.id, stale_before).await {
            Ok(true) => {}
            Ok(false) => return JobMigration::Skipped,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to claim job for migration");
                return JobMigration::Skipped;
            }
        }

        let all_migrated = match store.list_assets(job.id).await {
            Ok(assets) => {
                let concurrency = self.services.config.migration.asset_concurrency.max(1);
                let ephemeral = assets.into_iter().filter(ResultAsset::is_ephemeral);
                let results: Vec<bool> = stream::iter(ephemeral)
                    .map(|asset| self.migrate_asset_with_retry(job.id, asset))
                    .buffer_unordered(concurrency)
                    .collect()
                    .await;
                results.into_iter().all(|ok| ok)
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to list assets for migration");
                false
            }
        };

        if let Err(e) = store.record_transfer_outcome(job.id, all_migrated).await {
            tracing::error!(
                job_id = %job.id,
                error = %e,
                "Failed to record migration outcome; claim is retried once its lease runs out",
            );
        }
        if all_migrated {
            tracing::info!(job_id = %job.id, "Result assets migrated to durable storage");
            JobMigration::Migrated
        } else {
            tracing::warn!(
                job_id = %job.id,
                retry_count = job.transfer_retry_count + 1,
                "Migration incomplete; will retry next sweep",
            );
            JobMigration::Failed
        }
    }

    async fn migrate_asset_with_retry(&self, job_id: DbId, asset: ResultAsset) -> bool {
        let config = &self.services.config.migration;
        let attempts = config.asset_attempts.max(1);
        for attempt in 1..=attempts {
            match self.migrate_asset(job_id, &asset).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        asset_id = %asset.id,
                        source = %mask_url(&asset.source_url),
                        attempt,
                        error = %e,
                        "Asset migration attempt failed",
                    );
                    if attempt < attempts {
                        tokio::time::sleep(transfer::retry_delay(config.retry_delay, attempt)).await;
                    }
                }
            }
        }
        false
    }

    async fn migrate_asset(&self, job_id: DbId, asset: &ResultAsset) -> Result<(), AssetError> {
        let prefix = &self.services.config.migration.key_prefix;
        let fetched = self.fetcher.fetch(&asset.source_url).await?;
        let ext = extension_from_url(&asset.source_url, asset.kind);

        let (bytes, thumbnails) = match asset.kind {
            AssetKind::Image => {
                let bytes = fetched.bytes;
                tokio::task::spawn_blocking(move || derive_thumbnails(bytes)).await??
            }
            AssetKind::Video => (fetched.bytes, Vec::new()),
        };

        let durable_url = self
            .storage
            .upload(
                bytes,
                &asset_key(prefix, job_id, asset.index, ext),
                content_type_for_extension(ext),
            )
            .await?;

        let mut thumbnail_url = None;
        for (variant, thumb) in thumbnails {
            let url = self
                .storage
                .upload(
                    thumb,
                    &thumbnail_key(prefix, job_id, asset.index, variant),
                    "image/jpeg",
                )
                .await?;
            if variant == ThumbnailVariant::Mobile {
                thumbnail_url = Some(url);
            }
        }

        self.services
            .store
            .mark_asset_migrated(asset.id, &durable_url, thumbnail_url.as_deref())
            .await?;
        Ok(())
    }
}

/// Decode the image (rejecting anything that is not one) and render every
/// thumbnail variant. Returns the original bytes alongside.
fn derive_thumbnails(
    bytes: Vec<u8>,
) -> Result<(Vec<u8>, Vec<(ThumbnailVariant, Vec<u8>)>), StorageError> {
    let img = images::decode_image(&bytes)?;
    let thumbnails = ThumbnailVariant::ALL
        .into_iter()
        .map(|variant| Ok((variant, images::thumbnail_jpeg(&img, variant.max_edge())?)))
        .collect::<Result<Vec<_>, StorageError>>()?;
    Ok((bytes, thumbnails))
}
