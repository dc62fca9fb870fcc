//! Result asset rows.

use atelier_core::job::{AssetKind, ResultAsset};
use atelier_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use super::RowDecodeError;

/// A row from the `result_assets` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ResultAssetRow {
    pub id: DbId,
    pub job_id: DbId,
    pub asset_index: i32,
    pub url: String,
    pub source_url: String,
    pub kind: String,
    pub thumbnail_url: Option<String>,
    pub migrated_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl TryFrom<ResultAssetRow> for ResultAsset {
    type Error = RowDecodeError;

    fn try_from(row: ResultAssetRow) -> Result<Self, Self::Error> {
        let kind = AssetKind::parse(&row.kind).ok_or_else(|| RowDecodeError {
            table: "result_assets",
            id: row.id,
            detail: format!("unknown kind '{}'", row.kind),
        })?;
        Ok(ResultAsset {
            id: row.id,
            job_id: row.job_id,
            index: row.asset_index,
            url: row.url,
            source_url: row.source_url,
            kind,
            thumbnail_url: row.thumbnail_url,
            migrated_at: row.migrated_at,
            created_at: row.created_at,
        })
    }
}
