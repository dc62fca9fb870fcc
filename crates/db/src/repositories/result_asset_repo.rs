//! Repository for the `result_assets` table.

use atelier_core::job::NewAsset;
use atelier_core::types::{new_id, DbId};
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::result_asset::ResultAssetRow;

/// Column list for `result_assets` queries.
const COLUMNS: &str = "\
    id, job_id, asset_index, url, source_url, kind, thumbnail_url, \
    migrated_at, created_at";

/// Provides persistence for result assets.
pub struct ResultAssetRepo;

impl ResultAssetRepo {
    /// Insert assets for a job, skipping any whose source URL is already
    /// recorded. Returns the number of rows actually inserted.
    pub async fn insert_many(
        tx: &mut Transaction<'_, Postgres>,
        job_id: DbId,
        assets: &[NewAsset],
    ) -> Result<u64, sqlx::Error> {
        let mut inserted = 0;
        for asset in assets {
            let result = sqlx::query(
                "INSERT INTO result_assets (id, job_id, asset_index, url, source_url, kind) \
                 VALUES ($1, $2, $3, $4, $4, $5) \
                 ON CONFLICT (job_id, source_url) DO NOTHING",
            )
            .bind(new_id())
            .bind(job_id)
            .bind(asset.index)
            .bind(&asset.url)
            .bind(asset.kind.as_str())
            .execute(&mut **tx)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    /// All assets of a job in index order.
    pub async fn list_by_job(pool: &PgPool, job_id: DbId) -> Result<Vec<ResultAssetRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM result_assets WHERE job_id = $1 ORDER BY asset_index ASC"
        );
        sqlx::query_as::<_, ResultAssetRow>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }

    /// Assets for several jobs at once, grouped by job then index.
    pub async fn list_by_jobs(
        pool: &PgPool,
        job_ids: &[DbId],
    ) -> Result<Vec<ResultAssetRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM result_assets \
             WHERE job_id = ANY($1) \
             ORDER BY job_id, asset_index ASC"
        );
        sqlx::query_as::<_, ResultAssetRow>(&query)
            .bind(job_ids)
            .fetch_all(pool)
            .await
    }

    /// Rewrite an asset's URL to its durable location. Applies once.
    pub async fn mark_migrated(
        pool: &PgPool,
        asset_id: DbId,
        durable_url: &str,
        thumbnail_url: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE result_assets \
             SET url = $2, thumbnail_url = $3, migrated_at = NOW() \
             WHERE id = $1 AND migrated_at IS NULL",
        )
        .bind(asset_id)
        .bind(durable_url)
        .bind(thumbnail_url)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
