use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{asset_queries, job_queries, user_queries};
use crate::error::ApiError;
use crate::models::asset::ProcessedImage;
use crate::models::job::{Job, JobStatus};
use crate::services::retention::PREMIUM_RETENTION;
use crate::services::storage::CloudStorage;
use crate::services::tokens::{self, Pricing};

/// Result of a successful (or already-satisfied) unlock.
#[derive(Debug)]
pub struct UnlockOutcome {
    pub job: Job,
    pub asset: ProcessedImage,
    pub token_balance: i64,
}

/// URLs the caller may use for a job's output, per the access rules: the
/// thumbnail is an unconditional capability of the job owner, the full
/// resolution URL appears only once the asset's stored premium flag is set.
#[derive(Debug, serde::Serialize)]
pub struct AccessUrls {
    pub processed_image_url: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// Pay tokens to unlock full-resolution access to a job's output.
///
/// Precondition order: job exists, caller owns it, output asset exists. The
/// debit and the premium flip then commit in a single transaction — a crash
/// between them can never be observed as "tokens spent, not unlocked" or the
/// reverse. Insufficient balance rolls everything back and surfaces
/// `PaymentRequired`.
pub async fn unlock_premium(
    db: &PgPool,
    pricing: &Pricing,
    job_id: Uuid,
    user_id: Uuid,
) -> Result<UnlockOutcome, ApiError> {
    let job = job_queries::get_job(db, job_id)
        .await?
        .ok_or(ApiError::NotFound("job"))?;

    if job.user_id != user_id {
        return Err(ApiError::Forbidden);
    }

    let asset = match asset_queries::get_by_job(db, job_id).await? {
        Some(asset) if job.status == JobStatus::Completed => asset,
        _ => return Err(ApiError::NotReady),
    };

    if asset.is_premium {
        // Unlock already granted; a retried request must not double-charge.
        tracing::info!(%job_id, "premium already unlocked, returning current state");
        let balance = user_queries::get_balance(db, user_id)
            .await?
            .ok_or(ApiError::NotFound("user"))?;
        return Ok(UnlockOutcome {
            job,
            asset,
            token_balance: balance,
        });
    }

    let cost = pricing.cost(job.job_type);
    let retention_until = Utc::now() + PREMIUM_RETENTION;

    let mut tx = db.begin().await?;

    let new_balance = match tokens::try_debit(&mut *tx, user_id, cost).await? {
        Some(balance) => balance,
        None => {
            // Insufficient funds (or user vanished): no mutation escapes.
            tx.rollback().await?;
            if !user_queries::user_exists(db, user_id).await? {
                return Err(ApiError::NotFound("user"));
            }
            return Err(ApiError::PaymentRequired);
        }
    };

    let flipped =
        asset_queries::mark_premium(&mut *tx, asset.processed_image_id, retention_until).await?;
    if !flipped {
        // Concurrent unlock won; roll back our debit and report the current state.
        tx.rollback().await?;
        return Err(ApiError::Conflict);
    }

    tx.commit().await?;

    metrics::counter!("premium_unlocks_total").increment(1);
    tracing::info!(
        %job_id,
        %user_id,
        cost,
        new_balance,
        retention_until = %retention_until,
        "unlocked premium access"
    );

    let mut unlocked = asset;
    unlocked.is_premium = true;
    unlocked.scheduled_deletion_at = Some(retention_until);

    Ok(UnlockOutcome {
        job,
        asset: unlocked,
        token_balance: new_balance,
    })
}

/// Resolve the URLs a job owner may see for the job's output. The asset's
/// stored premium flag is authoritative; token balance plays no part here.
pub fn resolve_access(
    storage: &CloudStorage,
    job: &Job,
    asset: Option<&ProcessedImage>,
) -> AccessUrls {
    let Some(asset) = asset else {
        return AccessUrls {
            processed_image_url: None,
            thumbnail_url: None,
        };
    };

    let processed_image_url = asset
        .is_premium
        .then(|| format!("/api/v1/images/{}?premium=true", job.job_id));

    // Preference order: worker-reported pre-generated thumbnail, provider
    // URL transform, local re-encode behind the proxy route.
    let thumbnail_url = asset
        .reported_thumbnail_url()
        .map(str::to_string)
        .or_else(|| storage.derive_thumbnail_url(&asset.storage_path))
        .unwrap_or_else(|| format!("/api/v1/images/{}/thumbnail", job.job_id));

    AccessUrls {
        processed_image_url,
        thumbnail_url: Some(thumbnail_url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobType;
    use chrono::Utc;

    fn storage() -> CloudStorage {
        CloudStorage::new(
            "images",
            "https://storage.example.com",
            "key",
            "secret",
            "https://cdn.example.com",
        )
        .unwrap()
    }

    fn completed_job() -> Job {
        Job {
            job_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            original_image_id: Uuid::new_v4(),
            batch_id: None,
            job_type: JobType::BgRemoval,
            status: JobStatus::Completed,
            priority: None,
            job_config: None,
            error_message: None,
            version: 2,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
        }
    }

    fn asset_for(job: &Job, is_premium: bool) -> ProcessedImage {
        ProcessedImage {
            processed_image_id: Uuid::new_v4(),
            job_id: job.job_id,
            original_image_id: job.original_image_id,
            storage_path: "https://cdn.example.com/processed/out.png".into(),
            filename: "out.png".into(),
            filesize_bytes: None,
            format: None,
            width: None,
            height: None,
            processing_params: None,
            is_premium,
            scheduled_deletion_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn full_url_gated_on_stored_premium_flag() {
        let job = completed_job();
        let storage = storage();

        let free = resolve_access(&storage, &job, Some(&asset_for(&job, false)));
        assert!(free.processed_image_url.is_none());
        assert!(free.thumbnail_url.is_some());

        let premium = resolve_access(&storage, &job, Some(&asset_for(&job, true)));
        assert_eq!(
            premium.processed_image_url,
            Some(format!("/api/v1/images/{}?premium=true", job.job_id))
        );
    }

    #[test]
    fn thumbnail_prefers_worker_reported_url() {
        let job = completed_job();
        let mut asset = asset_for(&job, false);
        asset.processing_params = Some(serde_json::json!({
            "thumbnail_url": "https://cdn.example.com/thumbs/out.png"
        }));

        let urls = resolve_access(&storage(), &job, Some(&asset));
        assert_eq!(
            urls.thumbnail_url.as_deref(),
            Some("https://cdn.example.com/thumbs/out.png")
        );
    }

    #[test]
    fn thumbnail_falls_back_to_proxy_route() {
        let job = completed_job();
        let urls = resolve_access(&storage(), &job, Some(&asset_for(&job, false)));
        assert_eq!(
            urls.thumbnail_url,
            Some(format!("/api/v1/images/{}/thumbnail", job.job_id))
        );
    }

    #[test]
    fn no_asset_means_no_urls() {
        let mut job = completed_job();
        job.status = JobStatus::Processing;
        let urls = resolve_access(&storage(), &job, None);
        assert!(urls.processed_image_url.is_none());
        assert!(urls.thumbnail_url.is_none());
    }
}
