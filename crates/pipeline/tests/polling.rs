//! Background polling: terminal states, progress, timeouts and error
//! escalation.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use atelier_core::status::JobStatus;
use atelier_core::task_state::{ErrorCode, SignalSource, TaskState};
use atelier_pipeline::polling::{PollOutcome, PollSummary};
use atelier_pipeline::{PollingWorker, ReconcileOutcome};
use chrono::Utc;
use common::{Harness, Reply};

fn worker(h: &Harness) -> PollingWorker {
    PollingWorker::new(h.services.clone(), Arc::clone(&h.reconciler))
}

#[tokio::test]
async fn terminal_state_is_reconciled_through_the_poll_path() {
    let h = Harness::new(50).await;
    let created = h.create_image(1).await.unwrap();
    h.provider.set_reply(
        &created.remote_task_id,
        Reply::success(&["https://tempfile.example.com/p/0.png"]),
    );

    let summary = worker(&h).tick().await.unwrap();

    assert_eq!(
        summary,
        PollSummary {
            examined: 1,
            reconciled: 1,
            ..Default::default()
        }
    );
    let job = h.job(created.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert!(!job.callback_received);
    assert_eq!(h.assets(created.id).await.len(), 1);
}

#[tokio::test]
async fn generating_raises_progress() {
    let h = Harness::new(50).await;
    let created = h.create_image(1).await.unwrap();
    h.provider
        .set_reply(&created.remote_task_id, Reply::state(TaskState::Generating));

    let outcome = worker(&h).poll_job(h.job(created.id).await).await.unwrap();

    assert_eq!(
        outcome,
        PollOutcome::InProgress {
            state: TaskState::Generating
        }
    );
    assert_eq!(h.job(created.id).await.progress, 50);
}

#[tokio::test]
async fn provider_failure_refunds() {
    let h = Harness::new(50).await;
    let created = h.create_image(1).await.unwrap();
    h.provider.set_reply(
        &created.remote_task_id,
        Reply::State {
            state: TaskState::Fail,
            urls: Vec::new(),
            reason: Some("prompt rejected".into()),
        },
    );

    let outcome = worker(&h).poll_job(h.job(created.id).await).await.unwrap();

    assert_matches!(
        outcome,
        PollOutcome::Reconciled(ReconcileOutcome::Failed { code: ErrorCode::GenerationFailed, .. })
    );
    assert_eq!(h.balance().await, 50);
}

#[tokio::test]
async fn silence_past_the_ceiling_times_out_and_refunds() {
    let h = Harness::new(50).await;
    let created = h.create_image(1).await.unwrap();
    h.backend.update_job(created.id, |job| {
        job.accepted_at = Some(Utc::now() - chrono::Duration::minutes(6));
    });

    let outcome = worker(&h).poll_job(h.job(created.id).await).await.unwrap();

    assert_matches!(
        outcome,
        PollOutcome::TimedOut(ReconcileOutcome::Failed { code: ErrorCode::PollingTimeout, refunded: true, .. })
    );
    let job = h.job(created.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(h.balance().await, 50);
}

#[tokio::test]
async fn webhook_after_timeout_recovers_the_job() {
    let h = Harness::new(50).await;
    let created = h.create_image(1).await.unwrap();
    h.backend.update_job(created.id, |job| {
        job.accepted_at = Some(Utc::now() - chrono::Duration::minutes(10));
    });
    worker(&h).tick().await.unwrap();
    assert_eq!(h.job(created.id).await.status, JobStatus::Failed);

    let outcome = h
        .succeed(
            &created.remote_task_id,
            &["https://tempfile.example.com/late.png"],
            SignalSource::Webhook,
        )
        .await;

    assert_matches!(outcome, ReconcileOutcome::Completed { recovered: true, .. });
    assert_eq!(h.balance().await, 46);
}

#[tokio::test]
async fn repeated_network_errors_become_network_error() {
    let h = Harness::new(50).await;
    let created = h.create_image(1).await.unwrap();
    h.provider
        .set_reply(&created.remote_task_id, Reply::NetworkError);
    let poller = worker(&h);

    for expected in 1..=2 {
        let outcome = poller.poll_job(h.job(created.id).await).await.unwrap();
        assert_eq!(outcome, PollOutcome::QueryFailed { consecutive: expected });
        assert_eq!(h.job(created.id).await.status, JobStatus::Processing);
    }
    let outcome = poller.poll_job(h.job(created.id).await).await.unwrap();

    assert_matches!(
        outcome,
        PollOutcome::GaveUp(ReconcileOutcome::Failed { code: ErrorCode::NetworkError, .. })
    );
    assert_eq!(h.balance().await, 50);
}

#[tokio::test]
async fn repeated_http_errors_become_polling_error() {
    let h = Harness::new(50).await;
    let created = h.create_image(1).await.unwrap();
    h.provider
        .set_reply(&created.remote_task_id, Reply::HttpError(500));
    let poller = worker(&h);

    for _ in 0..3 {
        poller.tick().await.unwrap();
    }

    let job = h.job(created.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.parsed_error_code(), Some(ErrorCode::PollingError));
}

#[tokio::test]
async fn a_successful_query_resets_the_error_count() {
    let h = Harness::new(50).await;
    let created = h.create_image(1).await.unwrap();
    let poller = worker(&h);

    h.provider
        .set_reply(&created.remote_task_id, Reply::NetworkError);
    poller.tick().await.unwrap();
    poller.tick().await.unwrap();
    h.provider
        .set_reply(&created.remote_task_id, Reply::state(TaskState::Queued));
    poller.tick().await.unwrap();
    h.provider
        .set_reply(&created.remote_task_id, Reply::NetworkError);
    poller.tick().await.unwrap();
    poller.tick().await.unwrap();

    assert_eq!(h.job(created.id).await.status, JobStatus::Processing);
}

#[tokio::test]
async fn settled_jobs_are_not_queried() {
    let h = Harness::new(50).await;
    let created = h.create_image(1).await.unwrap();
    h.succeed(
        &created.remote_task_id,
        &["https://tempfile.example.com/x.png"],
        SignalSource::Webhook,
    )
    .await;

    let poller = worker(&h);
    let summary = poller.tick().await.unwrap();
    let outcome = poller.poll_job(h.job(created.id).await).await.unwrap();

    assert_eq!(summary.examined, 0);
    assert_eq!(outcome, PollOutcome::Skipped);
    assert_eq!(h.provider.query_count(), 0);
}

#[tokio::test]
async fn jobs_stuck_in_pending_fail_after_the_ceiling() {
    let h = Harness::new(50).await;
    let stuck = h.create_image(1).await.unwrap();
    let fresh = h.create_image(1).await.unwrap();
    for (id, age_minutes) in [(stuck.id, 60), (fresh.id, 1)] {
        h.backend.update_job(id, |job| {
            job.status = JobStatus::Pending;
            job.remote_task_id = None;
            job.credits_deducted = false;
            job.accepted_at = None;
            job.created_at = Utc::now() - chrono::Duration::minutes(age_minutes);
        });
    }
    let balance = h.balance().await;
    let poller = worker(&h);

    let summary = poller.tick().await.unwrap();

    assert_eq!(
        summary,
        PollSummary {
            stale_pending: 1,
            ..Default::default()
        }
    );
    let job = h.job(stuck.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.parsed_error_code(), Some(ErrorCode::SubmissionTimeout));
    assert_eq!(h.job(fresh.id).await.status, JobStatus::Pending);
    assert_eq!(h.balance().await, balance);
    assert!(h.backend.ledger_entries(stuck.id).iter().all(|e| !e.voided));

    assert_eq!(poller.tick().await.unwrap().stale_pending, 0);
    assert_eq!(h.provider.query_count(), 0);
}
