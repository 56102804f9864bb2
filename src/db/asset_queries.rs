use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

use crate::models::asset::ProcessedImage;

const ASSET_COLUMNS: &str = "processed_image_id, job_id, original_image_id, storage_path, \
     filename, filesize_bytes, format, width, height, processing_params, is_premium, \
     scheduled_deletion_at, created_at";

fn asset_from_row(row: &PgRow) -> Result<ProcessedImage, sqlx::Error> {
    Ok(ProcessedImage {
        processed_image_id: row.try_get("processed_image_id")?,
        job_id: row.try_get("job_id")?,
        original_image_id: row.try_get("original_image_id")?,
        storage_path: row.try_get("storage_path")?,
        filename: row.try_get("filename")?,
        filesize_bytes: row.try_get("filesize_bytes")?,
        format: row.try_get("format")?,
        width: row.try_get("width")?,
        height: row.try_get("height")?,
        processing_params: row.try_get("processing_params")?,
        is_premium: row.try_get("is_premium")?,
        scheduled_deletion_at: row.try_get("scheduled_deletion_at")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Insert the output asset for a completed job. Runs inside the same
/// transaction as the job's status transition; the unique index on `job_id`
/// backstops the at-most-one-asset invariant.
pub async fn insert_asset<'e>(
    executor: impl PgExecutor<'e>,
    asset: &ProcessedImage,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO processed_images
            (processed_image_id, job_id, original_image_id, storage_path, filename,
             filesize_bytes, format, width, height, processing_params, scheduled_deletion_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(asset.processed_image_id)
    .bind(asset.job_id)
    .bind(asset.original_image_id)
    .bind(&asset.storage_path)
    .bind(&asset.filename)
    .bind(asset.filesize_bytes)
    .bind(&asset.format)
    .bind(asset.width)
    .bind(asset.height)
    .bind(&asset.processing_params)
    .bind(asset.scheduled_deletion_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// The (at most one) output asset linked to a job.
pub async fn get_by_job<'e>(
    executor: impl PgExecutor<'e>,
    job_id: Uuid,
) -> Result<Option<ProcessedImage>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {ASSET_COLUMNS}
        FROM processed_images
        WHERE job_id = $1
        "#,
    ))
    .bind(job_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(asset_from_row).transpose()
}

/// Flip the premium flag and replace the retention window. Guarded on
/// `is_premium = FALSE` so the flag and schedule mutate at most once; returns
/// `false` when the asset was already premium.
pub async fn mark_premium<'e>(
    executor: impl PgExecutor<'e>,
    processed_image_id: Uuid,
    scheduled_deletion_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE processed_images
        SET is_premium = TRUE,
            scheduled_deletion_at = $2
        WHERE processed_image_id = $1 AND is_premium = FALSE
        "#,
    )
    .bind(processed_image_id)
    .bind(scheduled_deletion_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Assets whose retention window has elapsed.
pub async fn list_expired(
    pool: &PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<ProcessedImage>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {ASSET_COLUMNS}
        FROM processed_images
        WHERE scheduled_deletion_at IS NOT NULL AND scheduled_deletion_at <= $1
        ORDER BY scheduled_deletion_at ASC
        LIMIT $2
        "#,
    ))
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(asset_from_row).collect()
}

/// Assets older than the emergency cutoff, regardless of schedule.
pub async fn list_created_before(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<ProcessedImage>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {ASSET_COLUMNS}
        FROM processed_images
        WHERE created_at < $1
        ORDER BY created_at ASC
        LIMIT $2
        "#,
    ))
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(asset_from_row).collect()
}

pub async fn delete_asset(pool: &PgPool, processed_image_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM processed_images WHERE processed_image_id = $1")
        .bind(processed_image_id)
        .execute(pool)
        .await?;
    Ok(())
}
