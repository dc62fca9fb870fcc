//! Pipeline error taxonomy.

use atelier_core::error::CoreError;
use atelier_core::types::DbId;
use atelier_db::models::RowDecodeError;
use atelier_providers::ProviderError;

/// Failures of the persistence seam.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Corrupt(#[from] RowDecodeError),

    /// Backend-specific failure with no richer type (in-memory backend).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a pipeline operation that did not succeed.
///
/// Validation and business failures are values here; only
/// [`PipelineError::PostAcceptanceBookkeeping`] describes a genuine
/// inconsistency that operators must reconcile.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Rejected before anything was persisted. Safe to retry after fixing
    /// the input.
    #[error("{0}")]
    Validation(String),

    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: i32, available: i32 },

    /// The provider did not accept the task. No credits were taken; the
    /// job row is `Failed` and a new job may be submitted.
    #[error("Provider call failed for job {job_id}: {source}")]
    ProviderCall {
        job_id: DbId,
        #[source]
        source: ProviderError,
    },

    /// The provider accepted the task but the charge and status update
    /// could not be committed.
    #[error("Post-acceptance bookkeeping failed for job {job_id} (remote task {remote_task_id}): {message}")]
    PostAcceptanceBookkeeping {
        job_id: DbId,
        remote_task_id: String,
        message: String,
    },

    #[error("Generation job {0} not found")]
    NotFound(DbId),

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) | CoreError::Conflict(msg) => Self::Validation(msg),
            CoreError::NotFound { id, .. } => Self::NotFound(id),
            CoreError::Unauthorized(msg) | CoreError::Forbidden(msg) => Self::Forbidden(msg),
            CoreError::Internal(msg) => Self::Store(StoreError::Unavailable(msg)),
        }
    }
}

impl PipelineError {
    /// Map a synchronous model-selection rejection into a validation error.
    pub fn from_selection(err: ProviderError) -> Self {
        Self::Validation(err.to_string())
    }
}
