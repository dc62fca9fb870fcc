//! Generation job aggregate and its result assets.

use serde::{Deserialize, Serialize};

use crate::metadata::{JobMetadata, JobType};
use crate::status::{FileTransferStatus, JobStatus};
use crate::task_state::ErrorCode;
use crate::types::{DbId, Timestamp};

/// Kind of media a result asset holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// One user-initiated generation request, tracked end-to-end.
///
/// Jobs are never deleted; a terminal job is the permanent audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationJob {
    pub id: DbId,
    pub owner_id: DbId,
    pub job_type: JobType,
    /// Provider model actually dispatched (after registry resolution).
    pub model_id: String,
    pub status: JobStatus,
    pub remote_task_id: Option<String>,
    #[serde(skip)]
    pub webhook_token_hash: String,
    pub callback_received: bool,
    pub credits_cost: i32,
    pub credits_deducted: bool,
    pub progress: i16,
    pub error_code: Option<String>,
    pub error_reason: Option<String>,
    pub file_transfer_status: FileTransferStatus,
    pub transfer_retry_count: i32,
    /// When the latest migration claim was taken. A `Transferring` job
    /// whose claim is older than the lease is claimable again.
    pub transfer_claimed_at: Option<Timestamp>,
    pub ephemeral_url_expires_at: Option<Timestamp>,
    pub metadata: JobMetadata,
    pub accepted_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub recovered_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl GenerationJob {
    /// Asset kind produced by this job's type.
    pub fn asset_kind(&self) -> AssetKind {
        match self.job_type {
            JobType::Video => AssetKind::Video,
            JobType::Image | JobType::Avatar => AssetKind::Image,
        }
    }

    pub fn parsed_error_code(&self) -> Option<ErrorCode> {
        self.error_code.as_deref().and_then(ErrorCode::parse)
    }
}

/// Values needed to persist a new `Pending` job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: DbId,
    pub owner_id: DbId,
    pub job_type: JobType,
    pub model_id: String,
    pub webhook_token_hash: String,
    pub credits_cost: i32,
    pub metadata: JobMetadata,
}

/// One generated image or video belonging to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultAsset {
    pub id: DbId,
    pub job_id: DbId,
    pub index: i32,
    /// Current location: the provider URL until migrated, then durable.
    pub url: String,
    /// Provider URL the asset was first reported with. Dedup key.
    pub source_url: String,
    pub kind: AssetKind,
    pub thumbnail_url: Option<String>,
    pub migrated_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl ResultAsset {
    /// Still pointing at a provider-hosted URL.
    pub fn is_ephemeral(&self) -> bool {
        self.migrated_at.is_none()
    }
}

/// An asset to insert during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAsset {
    pub index: i32,
    pub url: String,
    pub kind: AssetKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_kind_labels_round_trip() {
        assert_eq!(AssetKind::parse("image"), Some(AssetKind::Image));
        assert_eq!(AssetKind::parse(AssetKind::Video.as_str()), Some(AssetKind::Video));
        assert_eq!(AssetKind::parse("audio"), None);
    }
}
