//! Read side: the status view with read-repair and the owner's history.

use std::collections::HashMap;
use std::sync::Arc;

use atelier_core::job::{AssetKind, GenerationJob, ResultAsset};
use atelier_core::metadata::JobType;
use atelier_core::status::{FileTransferStatus, JobStatus};
use atelier_core::task_state::ErrorCode;
use atelier_core::types::{DbId, Timestamp};
use serde::Serialize;

use crate::error::PipelineError;
use crate::services::Services;

/// Shown for failures without a provider-supplied reason.
pub const GENERIC_FAILURE_MESSAGE: &str = "Generation failed. Please try again.";

const TIMEOUT_MESSAGE: &str = "Generation took too long and was cancelled. Your credits were refunded.";

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Who is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: DbId,
    pub is_admin: bool,
}

impl Viewer {
    pub fn can_view(&self, job: &GenerationJob) -> bool {
        self.is_admin || job.owner_id == self.user_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetView {
    pub index: i32,
    pub url: String,
    pub kind: AssetKind,
    pub thumbnail_url: Option<String>,
}

impl From<ResultAsset> for AssetView {
    fn from(asset: ResultAsset) -> Self {
        Self {
            index: asset.index,
            url: asset.url,
            kind: asset.kind,
            thumbnail_url: asset.thumbnail_url,
        }
    }
}

/// A job as presented to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatusView {
    pub id: DbId,
    pub job_type: JobType,
    pub model_id: String,
    pub status: JobStatus,
    pub progress: i16,
    pub credits_cost: i32,
    /// User-facing failure message; internal codes are not exposed.
    pub error: Option<String>,
    /// Completed after first being marked failed.
    pub recovered: bool,
    pub file_transfer_status: FileTransferStatus,
    pub assets: Vec<AssetView>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobPage {
    pub items: Vec<JobStatusView>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Message to show the owner of a failed job.
pub fn user_error_message(job: &GenerationJob) -> Option<String> {
    if job.status != JobStatus::Failed {
        return None;
    }
    let provider_reason = job
        .error_reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    let message = match job.parsed_error_code() {
        Some(ErrorCode::GenerationFailed | ErrorCode::ApiCallFailed) => provider_reason
            .map(str::to_string)
            .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string()),
        Some(ErrorCode::PollingTimeout | ErrorCode::SubmissionTimeout) => TIMEOUT_MESSAGE.to_string(),
        _ => GENERIC_FAILURE_MESSAGE.to_string(),
    };
    Some(message)
}

/// Build the view, treating existing assets as proof of success.
///
/// A job whose status write lagged behind its asset inserts is reported
/// `Completed` with full progress.
pub fn status_view(job: GenerationJob, assets: Vec<ResultAsset>) -> JobStatusView {
    let repaired = !assets.is_empty() && job.status != JobStatus::Completed;
    if repaired {
        tracing::warn!(
            job_id = %job.id,
            status = %job.status,
            assets = assets.len(),
            "Job has result assets but is not completed; reporting completed",
        );
    }

    let (status, progress, error) = if repaired || job.status == JobStatus::Completed {
        (JobStatus::Completed, 100, None)
    } else {
        (job.status, job.progress, user_error_message(&job))
    };

    JobStatusView {
        id: job.id,
        job_type: job.job_type,
        model_id: job.model_id,
        status,
        progress,
        credits_cost: job.credits_cost,
        error,
        recovered: job.recovered_at.is_some(),
        file_transfer_status: job.file_transfer_status,
        assets: assets.into_iter().map(AssetView::from).collect(),
        created_at: job.created_at,
        completed_at: job.completed_at,
    }
}

pub struct JobQueries {
    services: Arc<Services>,
}

impl JobQueries {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Load a job the viewer may see.
    ///
    /// A job owned by someone else is reported as not found to non-admins.
    pub async fn load(&self, viewer: Viewer, id: DbId) -> Result<GenerationJob, PipelineError> {
        match self.services.store.find(id).await? {
            Some(job) if viewer.can_view(&job) => Ok(job),
            _ => Err(PipelineError::NotFound(id)),
        }
    }

    pub async fn status(&self, viewer: Viewer, id: DbId) -> Result<JobStatusView, PipelineError> {
        let job = self.load(viewer, id).await?;
        let assets = self.services.store.list_assets(job.id).await?;
        Ok(status_view(job, assets))
    }

    /// Newest-first page of the owner's jobs with their assets.
    pub async fn history(
        &self,
        owner_id: DbId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<JobPage, PipelineError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = offset.unwrap_or(0).max(0);

        let store = &self.services.store;
        let jobs = store.list_by_owner(owner_id, Some(limit), Some(offset)).await?;
        let total = store.count_by_owner(owner_id).await?;

        let ids: Vec<DbId> = jobs.iter().map(|j| j.id).collect();
        let mut by_job: HashMap<DbId, Vec<ResultAsset>> = HashMap::new();
        for asset in store.list_assets_for(&ids).await? {
            by_job.entry(asset.job_id).or_default().push(asset);
        }

        let items = jobs
            .into_iter()
            .map(|job| {
                let assets = by_job.remove(&job.id).unwrap_or_default();
                status_view(job, assets)
            })
            .collect();

        Ok(JobPage {
            items,
            total,
            limit,
            offset,
        })
    }
}
