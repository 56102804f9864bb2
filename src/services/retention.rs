use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::db::asset_queries;
use crate::services::storage::CloudStorage;

/// Free-tier retention: long enough for the owner to download the thumbnail.
pub const FREE_RETENTION: Duration = Duration::hours(1);

/// Premium retention horizon after unlock.
pub const PREMIUM_RETENTION: Duration = Duration::days(30);

/// Emergency cutoff: assets older than this are removed regardless of their
/// schedule.
pub const EMERGENCY_CUTOFF: Duration = Duration::days(45);

const SWEEP_BATCH: i64 = 500;

/// Delete assets whose retention window has elapsed, from storage first and
/// then from the database. Per-asset failures are logged and skipped so one
/// bad object cannot wedge the sweep.
pub async fn sweep_expired(
    pool: &PgPool,
    storage: &CloudStorage,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let expired = asset_queries::list_expired(pool, now, SWEEP_BATCH).await?;
    tracing::info!(count = expired.len(), "found expired assets");

    let mut deleted = 0;
    for asset in expired {
        match delete_one(pool, storage, &asset).await {
            Ok(()) => deleted += 1,
            Err(e) => tracing::error!(
                processed_image_id = %asset.processed_image_id,
                error = %e,
                "failed to delete expired asset"
            ),
        }
    }
    Ok(deleted)
}

/// Remove very old assets regardless of schedule.
pub async fn sweep_aged(
    pool: &PgPool,
    storage: &CloudStorage,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let cutoff = now - EMERGENCY_CUTOFF;
    let aged = asset_queries::list_created_before(pool, cutoff, SWEEP_BATCH).await?;
    tracing::info!(count = aged.len(), "emergency sweep: found aged assets");

    let mut deleted = 0;
    for asset in aged {
        match delete_one(pool, storage, &asset).await {
            Ok(()) => deleted += 1,
            Err(e) => tracing::error!(
                processed_image_id = %asset.processed_image_id,
                error = %e,
                "emergency sweep failed for asset"
            ),
        }
    }
    Ok(deleted)
}

async fn delete_one(
    pool: &PgPool,
    storage: &CloudStorage,
    asset: &crate::models::asset::ProcessedImage,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Some(key) = storage.key_from_url(&asset.storage_path) {
        storage.delete(&key).await?;
    } else {
        tracing::warn!(
            processed_image_id = %asset.processed_image_id,
            storage_path = %asset.storage_path,
            "asset URL is not under the managed bucket, skipping storage delete"
        );
    }

    asset_queries::delete_asset(pool, asset.processed_image_id).await?;

    tracing::info!(
        processed_image_id = %asset.processed_image_id,
        "deleted expired asset"
    );
    Ok(())
}
