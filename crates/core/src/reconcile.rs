//! Pure reconciliation planner.
//!
//! Given the current state of a job and an incoming terminal signal,
//! decides the single transition to apply. The asymmetry is deliberate
//! and fixed: success may override `Failed`, failure never overrides
//! `Completed`.

use std::collections::HashSet;

use crate::job::{AssetKind, NewAsset};
use crate::status::JobStatus;
use crate::task_state::{CompletionSignal, ErrorCode};

/// Why a signal produced no state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// `Completed` is hard-terminal.
    AlreadyCompleted,
    /// A failure arrived for a job that has already failed.
    DuplicateFailure,
    /// A success without any result URL arrived for a failed job.
    EmptySuccessAfterFailure,
    /// The provider acceptance has not been recorded locally yet.
    NotYetAccepted,
}

impl IgnoreReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyCompleted => "already_completed",
            Self::DuplicateFailure => "duplicate_failure",
            Self::EmptySuccessAfterFailure => "empty_success_after_failure",
            Self::NotYetAccepted => "not_yet_accepted",
        }
    }
}

/// The transition a signal resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilePlan {
    Ignore(IgnoreReason),
    Complete {
        /// Assets not already recorded for the job, with their indices.
        new_assets: Vec<NewAsset>,
        /// Undo the refund issued when the job first failed.
        restore_credits: bool,
        /// The job is being promoted out of `Failed`.
        recovered: bool,
    },
    Fail {
        code: ErrorCode,
        reason: Option<String>,
        refund_credits: bool,
    },
}

/// Snapshot of the fields the planner reads.
#[derive(Debug, Clone, Copy)]
pub struct JobView<'a> {
    pub status: JobStatus,
    pub credits_deducted: bool,
    pub kind: AssetKind,
    /// Source URLs of assets already recorded for the job.
    pub existing_urls: &'a [String],
}

/// Decide how to apply `signal` to a job in the state described by `job`.
pub fn plan(job: JobView<'_>, signal: &CompletionSignal) -> ReconcilePlan {
    match (job.status, signal) {
        (JobStatus::Completed, _) => ReconcilePlan::Ignore(IgnoreReason::AlreadyCompleted),
        (JobStatus::Pending, _) => ReconcilePlan::Ignore(IgnoreReason::NotYetAccepted),
        (JobStatus::Failed, CompletionSignal::Failure { .. }) => {
            ReconcilePlan::Ignore(IgnoreReason::DuplicateFailure)
        }
        (JobStatus::Failed, CompletionSignal::Success { result_urls }) => {
            let new_assets = dedup_new_assets(job, result_urls);
            if new_assets.is_empty() && job.existing_urls.is_empty() {
                return ReconcilePlan::Ignore(IgnoreReason::EmptySuccessAfterFailure);
            }
            ReconcilePlan::Complete {
                new_assets,
                restore_credits: job.credits_deducted,
                recovered: true,
            }
        }
        (JobStatus::Processing, CompletionSignal::Success { result_urls }) => {
            let new_assets = dedup_new_assets(job, result_urls);
            if new_assets.is_empty() && job.existing_urls.is_empty() {
                return ReconcilePlan::Fail {
                    code: ErrorCode::EmptyResult,
                    reason: None,
                    refund_credits: job.credits_deducted,
                };
            }
            ReconcilePlan::Complete {
                new_assets,
                restore_credits: false,
                recovered: false,
            }
        }
        (JobStatus::Processing, CompletionSignal::Failure { code, reason }) => {
            ReconcilePlan::Fail {
                code: *code,
                reason: reason.clone(),
                refund_credits: job.credits_deducted,
            }
        }
    }
}

/// Filter `incoming` down to URLs not yet recorded (also collapsing
/// duplicates inside `incoming`), numbering them after the existing ones.
pub fn dedup_new_assets(job: JobView<'_>, incoming: &[String]) -> Vec<NewAsset> {
    let mut seen: HashSet<&str> = job.existing_urls.iter().map(String::as_str).collect();
    let mut next_index = job.existing_urls.len() as i32;
    let mut out = Vec::new();

    for url in incoming {
        let url = url.trim();
        if url.is_empty() || !seen.insert(url) {
            continue;
        }
        out.push(NewAsset {
            index: next_index,
            url: url.to_string(),
            kind: job.kind,
        });
        next_index += 1;
    }
    out
}
