use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An uploaded source image. Created by the upload pipeline (outside this
/// core); the job lifecycle only reads these rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputImage {
    pub image_id: Uuid,
    pub user_id: Uuid,
    pub storage_path: String,
    pub filename: String,
    pub filesize_bytes: Option<i64>,
    pub format: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub uploaded_at: DateTime<Utc>,
}

/// The stored result of a completed job. Created at most once per job by
/// status ingestion; after creation only `is_premium` and
/// `scheduled_deletion_at` ever change, both exactly once, on premium unlock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedImage {
    pub processed_image_id: Uuid,
    pub job_id: Uuid,
    pub original_image_id: Uuid,
    pub storage_path: String,
    pub filename: String,
    pub filesize_bytes: Option<i64>,
    pub format: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub processing_params: Option<serde_json::Value>,
    pub is_premium: bool,
    pub scheduled_deletion_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ProcessedImage {
    /// Direct thumbnail URL reported by the worker in its processing params,
    /// if any. Workers upload a pre-generated low-quality variant alongside
    /// the full result and record its URL under `thumbnail_url`.
    pub fn reported_thumbnail_url(&self) -> Option<&str> {
        self.processing_params
            .as_ref()
            .and_then(|params| params.get("thumbnail_url"))
            .and_then(|value| value.as_str())
            .filter(|url| !url.is_empty())
    }
}
