//! Generation job rows.

use atelier_core::job::GenerationJob;
use atelier_core::metadata::{JobMetadata, JobType};
use atelier_core::status::{FileTransferStatus, JobStatus, StatusId};
use atelier_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use super::RowDecodeError;

/// A row from the `generation_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GenerationJobRow {
    pub id: DbId,
    pub owner_id: DbId,
    pub job_type: String,
    pub model_id: String,
    pub status_id: StatusId,
    pub remote_task_id: Option<String>,
    #[serde(skip)]
    pub webhook_token_hash: String,
    pub callback_received: bool,
    pub credits_cost: i32,
    pub credits_deducted: bool,
    pub progress: i16,
    pub error_code: Option<String>,
    pub error_reason: Option<String>,
    pub file_transfer_status_id: StatusId,
    pub transfer_retry_count: i32,
    pub transfer_claimed_at: Option<Timestamp>,
    pub ephemeral_url_expires_at: Option<Timestamp>,
    pub metadata: serde_json::Value,
    pub accepted_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub recovered_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<GenerationJobRow> for GenerationJob {
    type Error = RowDecodeError;

    fn try_from(row: GenerationJobRow) -> Result<Self, Self::Error> {
        let corrupt = |detail: String| RowDecodeError {
            table: "generation_jobs",
            id: row.id,
            detail,
        };

        let job_type = JobType::parse(&row.job_type)
            .ok_or_else(|| corrupt(format!("unknown job_type '{}'", row.job_type)))?;
        let status = JobStatus::from_id(row.status_id)
            .ok_or_else(|| corrupt(format!("unknown status_id {}", row.status_id)))?;
        let file_transfer_status = FileTransferStatus::from_id(row.file_transfer_status_id)
            .ok_or_else(|| {
                corrupt(format!(
                    "unknown file_transfer_status_id {}",
                    row.file_transfer_status_id
                ))
            })?;
        let metadata: JobMetadata = serde_json::from_value(row.metadata.clone())
            .map_err(|e| corrupt(format!("metadata: {e}")))?;

        Ok(GenerationJob {
            id: row.id,
            owner_id: row.owner_id,
            job_type,
            model_id: row.model_id,
            status,
            remote_task_id: row.remote_task_id,
            webhook_token_hash: row.webhook_token_hash,
            callback_received: row.callback_received,
            credits_cost: row.credits_cost,
            credits_deducted: row.credits_deducted,
            progress: row.progress,
            error_code: row.error_code,
            error_reason: row.error_reason,
            file_transfer_status,
            transfer_retry_count: row.transfer_retry_count,
            transfer_claimed_at: row.transfer_claimed_at,
            ephemeral_url_expires_at: row.ephemeral_url_expires_at,
            metadata,
            accepted_at: row.accepted_at,
            completed_at: row.completed_at,
            recovered_at: row.recovered_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
