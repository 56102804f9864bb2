use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Transformations offered by the processing workers. Each variant maps to a
/// dedicated worker pool via the dispatch routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    BgRemoval,
    Upscale,
    Enlarge,
    StyleTransfer,
    ObjectRemoval,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::BgRemoval,
        JobType::Upscale,
        JobType::Enlarge,
        JobType::StyleTransfer,
        JobType::ObjectRemoval,
    ];
}

/// Lifecycle of a processing job.
///
/// `queued -> processing -> {completed, failed}`, plus `queued -> failed`
/// when dispatch exhausts its retry budget. `completed` and `failed` are
/// terminal; callbacks arriving after a terminal state are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A unit of requested image transformation with a tracked lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub user_id: Uuid,
    pub original_image_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: Option<i32>,
    pub job_config: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// Optimistic lock counter, bumped by every update.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn status_wire_form_round_trips() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn job_type_wire_form_round_trips() {
        for job_type in JobType::ALL {
            let parsed: JobType = job_type.to_string().parse().unwrap();
            assert_eq!(parsed, job_type);
        }
        assert_eq!(JobType::BgRemoval.to_string(), "bg_removal");
        assert_eq!(JobType::StyleTransfer.to_string(), "style_transfer");
    }
}
