use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, JobType};

/// Request to create a processing job for an already-uploaded image.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateJobRequest {
    #[garde(skip)]
    pub image_id: Uuid,

    #[garde(skip)]
    pub job_type: JobType,

    /// Free-form worker configuration; interpreted only by the worker and by
    /// per-type default filling.
    #[garde(custom(bounded_json_object))]
    pub job_config: Option<serde_json::Value>,

    #[garde(inner(range(min = 0, max = 10)))]
    pub priority: Option<i32>,
}

/// Worker callback payload reporting job progress. Arrives without per-user
/// auth, so every field is bounded.
#[derive(Debug, Deserialize, Validate)]
pub struct JobStatusUpdateRequest {
    #[garde(skip)]
    pub status: JobStatus,

    /// Storage URL of the processed result; required on `completed`.
    #[garde(inner(length(min = 1, max = 1024)))]
    pub processed_storage_path: Option<String>,

    /// Parameters the worker actually used, including any pre-generated
    /// thumbnail URL.
    #[garde(custom(bounded_json_object))]
    pub processing_params: Option<serde_json::Value>,

    #[garde(inner(length(max = 2000)))]
    pub error_message: Option<String>,
}

/// Guard against oversized opaque JSON blobs from semi-trusted callers.
fn bounded_json_object(value: &Option<serde_json::Value>, _ctx: &()) -> garde::Result {
    const MAX_SERIALIZED_LEN: usize = 8 * 1024;
    if let Some(value) = value {
        if !value.is_object() {
            return Err(garde::Error::new("expected a JSON object"));
        }
        let len = serde_json::to_string(value).map(|s| s.len()).unwrap_or(usize::MAX);
        if len > MAX_SERIALIZED_LEN {
            return Err(garde::Error::new("JSON object too large"));
        }
    }
    Ok(())
}

/// Job summary returned to the polling client.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: Uuid,
    pub original_image_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub token_cost: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_balance: Option<i64>,
    pub is_premium_quality: bool,
    /// Populated only once the asset's premium flag is set.
    pub processed_image_url: Option<String>,
    /// Always available to the job owner once the job completes.
    pub thumbnail_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobResponse {
    pub fn from_job(job: &Job, token_cost: i64) -> Self {
        Self {
            job_id: job.job_id,
            original_image_id: job.original_image_id,
            job_type: job.job_type,
            status: job.status,
            token_cost,
            token_balance: None,
            is_premium_quality: false,
            processed_image_url: None,
            thumbnail_url: None,
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenBalanceResponse {
    pub balance: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TokenPurchaseRequest {
    #[garde(range(min = 1, max = 1000))]
    pub amount: i64,
}

/// Query parameters for the job history listing.
#[derive(Debug, Deserialize, Validate)]
pub struct JobHistoryQuery {
    #[garde(skip)]
    pub since: Option<DateTime<Utc>>,

    #[garde(inner(range(min = 1, max = 100)))]
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use garde::Validate;

    #[test]
    fn callback_payload_bounds_enforced() {
        let oversized = JobStatusUpdateRequest {
            status: JobStatus::Failed,
            processed_storage_path: None,
            processing_params: None,
            error_message: Some("e".repeat(2001)),
        };
        assert!(oversized.validate().is_err());

        let ok = JobStatusUpdateRequest {
            status: JobStatus::Completed,
            processed_storage_path: Some("https://cdn.example.com/out.png".into()),
            processing_params: Some(serde_json::json!({"thumbnail_url": "https://t"})),
            error_message: None,
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn callback_rejects_non_object_params() {
        let bad = JobStatusUpdateRequest {
            status: JobStatus::Completed,
            processed_storage_path: Some("https://cdn.example.com/out.png".into()),
            processing_params: Some(serde_json::json!(["not", "an", "object"])),
            error_message: None,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn create_job_rejects_oversized_config() {
        let huge: serde_json::Map<String, serde_json::Value> = (0..2000)
            .map(|i| (format!("key_{i}"), serde_json::Value::from("x")))
            .collect();
        let req = CreateJobRequest {
            image_id: Uuid::new_v4(),
            job_type: JobType::Upscale,
            job_config: Some(serde_json::Value::Object(huge)),
            priority: None,
        };
        assert!(req.validate().is_err());
    }
}
