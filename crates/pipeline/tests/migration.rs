//! Durable migration sweeps against in-memory storage.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use atelier_core::metadata::JobType;
use atelier_core::status::FileTransferStatus;
use atelier_core::task_state::SignalSource;
use atelier_core::transfer::{CandidateFilter, DEFAULT_MAX_TRANSFER_RETRIES};
use atelier_core::types::DbId;
use atelier_pipeline::kinds::{VideoKind, VideoRequest};
use atelier_pipeline::{MigrationError, MigrationScheduler, Orchestrator, SweepReport};
use atelier_storage::MemoryStorage;
use chrono::Utc;
use common::{png, FakeFetcher, Harness};

struct Fixture {
    h: Harness,
    storage: Arc<MemoryStorage>,
    fetcher: Arc<FakeFetcher>,
    scheduler: Arc<MigrationScheduler>,
}

async fn fixture() -> Fixture {
    let h = Harness::new(10_000).await;
    let storage = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(FakeFetcher::default());
    let scheduler = Arc::new(MigrationScheduler::new(
        h.services.clone(),
        storage.clone(),
        fetcher.clone(),
    ));
    Fixture {
        h,
        storage,
        fetcher,
        scheduler,
    }
}

impl Fixture {
    async fn completed_image(&self, urls: &[&str]) -> DbId {
        let created = self.h.create_image(1).await.unwrap();
        self.h
            .succeed(&created.remote_task_id, urls, SignalSource::Webhook)
            .await;
        created.id
    }

    async fn sweep(&self) -> SweepReport {
        self.scheduler
            .sweep(&CandidateFilter::default())
            .await
            .unwrap()
    }
}

// ---------------------------------------------------------------------------
// Successful migration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn image_assets_move_to_durable_storage_with_thumbnails() {
    let f = fixture().await;
    let source = "https://tempfile.example.com/r/abc.png?sig=123";
    f.fetcher.serve(source, png(1600, 900));
    let job_id = f.completed_image(&[source]).await;

    let report = f.sweep().await;

    assert_eq!(report.migrated, 1);
    assert_eq!(report.failed, 0);

    let key = format!("generations/{job_id}/{job_id}_0.png");
    let stored = f.storage.get(&key).expect("main object uploaded");
    assert_eq!(stored.content_type, "image/png");
    for variant in ["mobile", "desktop", "detail"] {
        let thumb = format!("generations/{job_id}/thumbs/{variant}_{job_id}_0.jpg");
        let object = f.storage.get(&thumb).expect("thumbnail uploaded");
        assert_eq!(object.content_type, "image/jpeg");
    }

    let asset = &f.h.assets(job_id).await[0];
    assert_eq!(asset.url, format!("{}/{key}", MemoryStorage::BASE_URL));
    assert_eq!(asset.source_url, source);
    assert!(asset.migrated_at.is_some());
    assert_eq!(
        asset.thumbnail_url.as_deref(),
        Some(format!("{}/generations/{job_id}/thumbs/mobile_{job_id}_0.jpg", MemoryStorage::BASE_URL).as_str())
    );

    let job = f.h.job(job_id).await;
    assert_eq!(job.file_transfer_status, FileTransferStatus::Completed);
    assert_eq!(job.transfer_retry_count, 0);
}

#[tokio::test]
async fn video_assets_are_copied_without_thumbnails() {
    let f = fixture().await;
    let videos = Orchestrator::new(VideoKind, f.h.services.clone());
    let created = videos
        .create(
            f.h.owner,
            VideoRequest {
                model_id: "kling/v2-5-turbo".into(),
                prompt: "a paper boat drifting down a gutter".into(),
                duration_secs: 5,
                aspect_ratio: None,
                reference_urls: Vec::new(),
            },
            None,
        )
        .await
        .unwrap();
    let source = "https://tempfile.example.com/v/clip";
    f.fetcher.serve(source, b"not really an mp4".to_vec());
    f.h.succeed(&created.remote_task_id, &[source], SignalSource::Webhook)
        .await;

    f.sweep().await;

    let id = created.id;
    assert_eq!(f.storage.keys(), vec![format!("generations/{id}/{id}_0.mp4")]);
    assert_eq!(
        f.storage.get(&f.storage.keys()[0]).unwrap().content_type,
        "video/mp4"
    );
    assert_eq!(
        f.h.job(id).await.file_transfer_status,
        FileTransferStatus::Completed
    );
}

// ---------------------------------------------------------------------------
// Failures and retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn undecodable_image_is_retried_then_counted_as_a_failure() {
    let f = fixture().await;
    let source = "https://tempfile.example.com/r/broken.png";
    f.fetcher.serve(source, b"<html>expired</html>".to_vec());
    let job_id = f.completed_image(&[source]).await;

    let report = f.sweep().await;

    assert_eq!(report.failed, 1);
    assert_eq!(f.fetcher.attempts(source), 3);
    assert!(f.storage.keys().is_empty());
    let job = f.h.job(job_id).await;
    assert_eq!(job.file_transfer_status, FileTransferStatus::Failed);
    assert_eq!(job.transfer_retry_count, 1);
    assert_eq!(f.h.assets(job_id).await[0].url, source);
}

#[tokio::test]
async fn retries_stop_at_the_cap() {
    let f = fixture().await;
    let source = "https://tempfile.example.com/r/gone.png";
    let job_id = f.completed_image(&[source]).await;

    for sweep in 1..=3 {
        let report = f.sweep().await;
        assert_eq!(report.candidates, 1, "sweep {sweep}");
        assert_eq!(f.h.job(job_id).await.transfer_retry_count, sweep);
    }

    let report = f.sweep().await;
    assert_eq!(report.candidates, 0);
    let pending = f.scheduler.pending(&CandidateFilter::default()).await.unwrap();
    assert!(pending.candidates.is_empty());
    assert_eq!(f.fetcher.attempts(source), 9);

    let job = f.h.job(job_id).await;
    assert_eq!(job.transfer_retry_count, 3);
    assert_eq!(job.file_transfer_status, FileTransferStatus::Failed);
}

#[tokio::test]
async fn partial_progress_survives_between_sweeps() {
    let f = fixture().await;
    let first = "https://tempfile.example.com/r/one.png";
    let second = "https://tempfile.example.com/r/two.png";
    f.fetcher.serve(first, png(64, 64));
    let job_id = f.completed_image(&[first, second]).await;

    f.sweep().await;
    let job = f.h.job(job_id).await;
    assert_eq!(job.file_transfer_status, FileTransferStatus::Failed);
    let assets = f.h.assets(job_id).await;
    assert!(assets[0].migrated_at.is_some());
    assert!(assets[1].migrated_at.is_none());

    f.fetcher.serve(second, png(64, 64));
    let report = f.sweep().await;

    assert_eq!(report.migrated, 1);
    assert_eq!(f.fetcher.attempts(first), 1);
    let job = f.h.job(job_id).await;
    assert_eq!(job.file_transfer_status, FileTransferStatus::Completed);
    assert_eq!(job.transfer_retry_count, 0);
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn candidates_are_ranked_by_priority() {
    let f = fixture().await;
    let now = Utc::now();

    let pending_no_expiry = f.completed_image(&["https://t.example.com/1.png"]).await;
    let failed_no_expiry = f.completed_image(&["https://t.example.com/2.png"]).await;
    let expires_in_5h = f.completed_image(&["https://t.example.com/3.png"]).await;
    let expires_in_1h = f.completed_image(&["https://t.example.com/4.png"]).await;
    let expired = f.completed_image(&["https://t.example.com/5.png"]).await;

    f.h.backend.update_job(pending_no_expiry, |j| j.ephemeral_url_expires_at = None);
    f.h.backend.update_job(failed_no_expiry, |j| {
        j.ephemeral_url_expires_at = None;
        j.file_transfer_status = FileTransferStatus::Failed;
        j.transfer_retry_count = 1;
    });
    f.h.backend.update_job(expires_in_5h, |j| {
        j.ephemeral_url_expires_at = Some(now + chrono::Duration::hours(5));
    });
    f.h.backend.update_job(expires_in_1h, |j| {
        j.ephemeral_url_expires_at = Some(now + chrono::Duration::hours(1));
    });
    f.h.backend.update_job(expired, |j| {
        j.ephemeral_url_expires_at = Some(now - chrono::Duration::minutes(1));
    });

    let pending = f.scheduler.pending(&CandidateFilter::default()).await.unwrap();

    let order: Vec<DbId> = pending.candidates.iter().map(|c| c.job_id).collect();
    assert_eq!(
        order,
        vec![expires_in_1h, expires_in_5h, failed_no_expiry, pending_no_expiry]
    );
    let ranks: Vec<usize> = pending.candidates.iter().map(|c| c.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
    assert_eq!(pending.expired.len(), 1);
    assert_eq!(pending.expired[0].job_id, expired);

    let report = f.sweep().await;
    assert_eq!(report.expired, 1);
    assert_eq!(report.candidates, 4);
    assert_eq!(f.fetcher.attempts("https://t.example.com/5.png"), 0);
}

#[tokio::test]
async fn abandoned_claims_are_taken_over_after_the_lease() {
    let f = fixture().await;
    let healthy = "https://tempfile.example.com/r/healthy.png";
    let broken = "https://tempfile.example.com/r/broken.png";
    let busy = "https://tempfile.example.com/r/busy.png";
    f.fetcher.serve(healthy, png(64, 64));
    let recovered = f.completed_image(&[healthy]).await;
    let still_failing = f.completed_image(&[broken]).await;
    let in_flight = f.completed_image(&[busy]).await;

    let long_ago = Some(Utc::now() - chrono::Duration::hours(2));
    for id in [recovered, still_failing] {
        f.h.backend.update_job(id, |j| {
            j.file_transfer_status = FileTransferStatus::Transferring;
            j.transfer_claimed_at = long_ago;
        });
    }
    f.h.backend.update_job(in_flight, |j| {
        j.file_transfer_status = FileTransferStatus::Transferring;
        j.transfer_claimed_at = Some(Utc::now());
    });

    let pending = f.scheduler.pending(&CandidateFilter::default()).await.unwrap();
    let mut listed: Vec<DbId> = pending.candidates.iter().map(|c| c.job_id).collect();
    listed.sort();
    let mut expected = vec![recovered, still_failing];
    expected.sort();
    assert_eq!(listed, expected);

    let report = f.sweep().await;

    assert_eq!(report.candidates, 2);
    assert_eq!(report.migrated, 1);
    assert_eq!(report.failed, 1);
    let job = f.h.job(recovered).await;
    assert_eq!(job.file_transfer_status, FileTransferStatus::Completed);
    assert!(f.h.assets(recovered).await[0].migrated_at.is_some());
    // The abandoned attempt and this sweep's failure both count.
    let job = f.h.job(still_failing).await;
    assert_eq!(job.file_transfer_status, FileTransferStatus::Failed);
    assert_eq!(job.transfer_retry_count, 2);
    // A live claim is left to its owner.
    assert_eq!(
        f.h.job(in_flight).await.file_transfer_status,
        FileTransferStatus::Transferring
    );
    assert_eq!(f.fetcher.attempts(busy), 0);
}

#[tokio::test]
async fn expired_sources_are_retired_after_one_report() {
    let f = fixture().await;
    let lapsed = f.completed_image(&["https://tempfile.example.com/r/lapsed.png"]).await;
    let stranded = f.completed_image(&["https://tempfile.example.com/r/stranded.png"]).await;
    let past = Some(Utc::now() - chrono::Duration::minutes(1));
    f.h.backend.update_job(lapsed, |j| j.ephemeral_url_expires_at = past);
    f.h.backend.update_job(stranded, |j| {
        j.ephemeral_url_expires_at = past;
        j.file_transfer_status = FileTransferStatus::Transferring;
        j.transfer_claimed_at = Some(Utc::now() - chrono::Duration::hours(2));
    });

    let pending = f.scheduler.pending(&CandidateFilter::default()).await.unwrap();
    assert_eq!(pending.expired.len(), 2);

    let report = f.sweep().await;

    assert_eq!(report.expired, 2);
    assert_eq!(report.candidates, 0);
    for id in [lapsed, stranded] {
        let job = f.h.job(id).await;
        assert_eq!(job.file_transfer_status, FileTransferStatus::Failed);
        assert_eq!(job.transfer_retry_count, DEFAULT_MAX_TRANSFER_RETRIES);
    }
    assert_eq!(f.sweep().await, SweepReport::default());
    let pending = f.scheduler.pending(&CandidateFilter::default()).await.unwrap();
    assert!(pending.expired.is_empty());
    assert!(pending.candidates.is_empty());
}

#[tokio::test]
async fn job_type_filter_narrows_candidates() {
    let f = fixture().await;
    f.completed_image(&["https://t.example.com/a.png"]).await;

    let filter = CandidateFilter {
        job_type: Some(JobType::Video),
        ..Default::default()
    };
    let pending = f.scheduler.pending(&filter).await.unwrap();
    assert!(pending.candidates.is_empty());

    let filter = CandidateFilter {
        job_type: Some(JobType::Image),
        ..Default::default()
    };
    assert_eq!(f.scheduler.pending(&filter).await.unwrap().candidates.len(), 1);
}

// ---------------------------------------------------------------------------
// Single flight
// ---------------------------------------------------------------------------

#[tokio::test]
async fn only_one_sweep_runs_at_a_time() {
    let f = fixture().await;
    let source = "https://tempfile.example.com/r/slow.png";
    f.fetcher.serve(source, png(32, 32));
    let job_id = f.completed_image(&[source]).await;
    let gate = f.fetcher.hold();

    f.scheduler.trigger(CandidateFilter::default()).unwrap();
    assert!(f.scheduler.is_running());

    assert_matches!(
        f.scheduler.trigger(CandidateFilter::default()),
        Err(MigrationError::AlreadyRunning)
    );
    assert_matches!(
        f.scheduler.sweep(&CandidateFilter::default()).await,
        Err(MigrationError::AlreadyRunning)
    );

    gate.notify_one();
    for _ in 0..200 {
        if !f.scheduler.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!f.scheduler.is_running());
    assert_eq!(
        f.h.job(job_id).await.file_transfer_status,
        FileTransferStatus::Completed
    );

    // The flag is released, so the next sweep runs (and finds nothing).
    assert_eq!(f.sweep().await.candidates, 0);
}
