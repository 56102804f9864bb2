use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{asset_queries, image_queries, job_queries, user_queries};
use crate::error::ApiError;
use crate::models::api::{CreateJobRequest, JobStatusUpdateRequest};
use crate::models::asset::ProcessedImage;
use crate::models::job::{Job, JobStatus, JobType};
use crate::services::dispatch::{DispatchChannel, DispatchError, JobMessage, MAX_PUBLISH_ATTEMPTS};
use crate::services::retention::FREE_RETENTION;

/// Internal retries when a versioned update loses a race.
const CAS_ATTEMPTS: u32 = 2;

/// Create a job in `queued` state and publish it to the dispatch channel.
///
/// The job row commits before publish is attempted, so the worker can look
/// the job up independently. If publish fails permanently the job is forced
/// to a terminal `failed` state with a stored error message; it is never left
/// silently queued.
pub async fn create_and_dispatch(
    db: &PgPool,
    channel: &DispatchChannel,
    user_id: Uuid,
    request: &CreateJobRequest,
) -> Result<Job, ApiError> {
    let image = image_queries::get_image(db, request.image_id)
        .await?
        .ok_or(ApiError::NotFound("image"))?;

    if image.user_id != user_id {
        return Err(ApiError::Forbidden);
    }

    if !user_queries::user_exists(db, user_id).await? {
        return Err(ApiError::NotFound("user"));
    }

    let job_config = fill_config_defaults(request.job_type, request.job_config.clone());

    let job = job_queries::create_job(
        db,
        user_id,
        image.image_id,
        request.job_type,
        job_config.as_ref(),
        request.priority,
    )
    .await?;

    metrics::counter!("jobs_created_total").increment(1);
    tracing::info!(job_id = %job.job_id, job_type = %job.job_type, "created job");

    let message = JobMessage {
        job_id: job.job_id,
        original_image_id: image.image_id,
        image_storage_path: image.storage_path,
        job_type: job.job_type,
        job_config,
    };

    match channel.publish(&message).await {
        Ok(()) => {
            tracing::info!(job_id = %job.job_id, "dispatched job");
            Ok(job)
        }
        Err(err) => {
            metrics::counter!("jobs_dispatch_failed_total").increment(1);
            let stored_message = dispatch_failure_message(&err);
            force_fail(db, job.job_id, &stored_message).await;

            Err(match err {
                DispatchError::UnsupportedJobType(t) => ApiError::UnsupportedJobType(t),
                other => ApiError::DispatchExhausted {
                    job_id: job.job_id,
                    reason: other.to_string(),
                },
            })
        }
    }
}

/// Error message stored on a job whose dispatch failed. Only transient
/// failures burn the retry budget, so only those mention it.
fn dispatch_failure_message(err: &DispatchError) -> String {
    match err {
        DispatchError::UnsupportedJobType(t) => {
            format!("no worker route configured for job type {t}")
        }
        other if other.is_transient() => {
            format!("failed to dispatch job after {MAX_PUBLISH_ATTEMPTS} attempts: {other}")
        }
        other => format!("failed to dispatch job: {other}"),
    }
}

/// Force a job to `failed` with an error message, respecting the version
/// check and terminal-state monotonicity. Best-effort: a job that raced to a
/// terminal state is left alone.
async fn force_fail(db: &PgPool, job_id: Uuid, error_message: &str) {
    for _ in 0..CAS_ATTEMPTS + 1 {
        let job = match job_queries::get_job(db, job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(%job_id, error = %e, "failed to load job for failure marking");
                return;
            }
        };
        if job.status.is_terminal() {
            return;
        }
        match job_queries::apply_transition(
            db,
            job_id,
            job.version,
            JobStatus::Failed,
            None,
            Some(Utc::now()),
            Some(error_message),
        )
        .await
        {
            Ok(true) => {
                metrics::counter!("jobs_failed_total").increment(1);
                tracing::warn!(%job_id, error_message, "job marked failed");
                return;
            }
            Ok(false) => continue,
            Err(e) => {
                tracing::error!(%job_id, error = %e, "failed to mark job failed");
                return;
            }
        }
    }
    tracing::error!(%job_id, "gave up marking job failed after repeated version conflicts");
}

/// What the status callback asked for, resolved against the current row.
#[derive(Debug)]
pub enum Transition {
    /// Callback redelivered after a terminal state, or otherwise stale.
    /// Accepted with no mutation.
    Ignore(&'static str),
    Apply(TransitionPlan),
}

#[derive(Debug)]
pub struct TransitionPlan {
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub output: Option<OutputSpec>,
}

/// Output asset to materialize together with a `completed` transition.
#[derive(Debug)]
pub struct OutputSpec {
    pub storage_path: String,
    pub processing_params: Option<Value>,
}

/// Decide how a callback applies to the job's current state. Pure: all
/// ordering and idempotency rules live here, the caller only executes the
/// plan transactionally.
pub fn plan_transition(
    job: &Job,
    update: &JobStatusUpdateRequest,
    now: DateTime<Utc>,
) -> Result<Transition, ApiError> {
    // At-least-once delivery: terminal jobs absorb redeliveries untouched,
    // whatever the payload says.
    if job.status.is_terminal() {
        return Ok(Transition::Ignore("job already in a terminal state"));
    }

    match update.status {
        JobStatus::Queued => Err(ApiError::InvalidPayload(
            "cannot transition a job back to queued".into(),
        )),
        JobStatus::Processing => Ok(Transition::Apply(TransitionPlan {
            status: JobStatus::Processing,
            // Stamped on the first processing callback only.
            started_at: job.started_at.is_none().then_some(now),
            completed_at: None,
            error_message: None,
            output: None,
        })),
        JobStatus::Completed => {
            let storage_path = update
                .processed_storage_path
                .clone()
                .ok_or_else(|| {
                    ApiError::InvalidPayload(
                        "completed status requires processed_storage_path".into(),
                    )
                })?;
            Ok(Transition::Apply(TransitionPlan {
                status: JobStatus::Completed,
                started_at: job.started_at.is_none().then_some(now),
                completed_at: Some(now),
                error_message: None,
                output: Some(OutputSpec {
                    storage_path,
                    processing_params: update.processing_params.clone(),
                }),
            }))
        }
        JobStatus::Failed => Ok(Transition::Apply(TransitionPlan {
            status: JobStatus::Failed,
            started_at: None,
            completed_at: Some(now),
            error_message: Some(
                update
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "processing failed".to_string()),
            ),
            output: None,
        })),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Applied(JobStatus),
    Ignored,
}

/// Apply a worker status callback: state transition and, on completion, the
/// output asset, committed as one transaction. Loses against a concurrent
/// writer at most `CAS_ATTEMPTS` times before surfacing `Conflict`.
pub async fn ingest_status(
    db: &PgPool,
    job_id: Uuid,
    update: &JobStatusUpdateRequest,
) -> Result<IngestOutcome, ApiError> {
    for _ in 0..CAS_ATTEMPTS {
        let job = job_queries::get_job(db, job_id)
            .await?
            .ok_or(ApiError::NotFound("job"))?;

        let plan = match plan_transition(&job, update, Utc::now())? {
            Transition::Ignore(reason) => {
                tracing::info!(%job_id, status = %job.status, reason, "ignoring status callback");
                return Ok(IngestOutcome::Ignored);
            }
            Transition::Apply(plan) => plan,
        };

        let mut tx = db.begin().await?;

        let applied = job_queries::apply_transition(
            &mut *tx,
            job.job_id,
            job.version,
            plan.status,
            plan.started_at,
            plan.completed_at,
            plan.error_message.as_deref(),
        )
        .await?;

        if !applied {
            // Lost the version race; re-read and re-plan.
            tx.rollback().await?;
            continue;
        }

        if let Some(output) = &plan.output {
            let asset = build_asset(&job, output, Utc::now());
            asset_queries::insert_asset(&mut *tx, &asset).await?;
            tracing::info!(
                %job_id,
                processed_image_id = %asset.processed_image_id,
                "materialized output asset"
            );
        }

        tx.commit().await?;

        match plan.status {
            JobStatus::Completed => metrics::counter!("jobs_completed_total").increment(1),
            JobStatus::Failed => metrics::counter!("jobs_failed_total").increment(1),
            _ => {}
        }
        tracing::info!(%job_id, status = %plan.status, "applied status transition");
        return Ok(IngestOutcome::Applied(plan.status));
    }

    Err(ApiError::Conflict)
}

/// Build the output asset row for a completed job. Metadata the worker chose
/// to report rides along in `processing_params`; the free-tier retention
/// window is stamped at creation.
fn build_asset(job: &Job, output: &OutputSpec, now: DateTime<Utc>) -> ProcessedImage {
    let params = output.processing_params.as_ref();

    ProcessedImage {
        processed_image_id: Uuid::new_v4(),
        job_id: job.job_id,
        original_image_id: job.original_image_id,
        storage_path: output.storage_path.clone(),
        filename: filename_from_path(&output.storage_path),
        filesize_bytes: params.and_then(|p| p.get("filesize_bytes")).and_then(Value::as_i64),
        format: params
            .and_then(|p| p.get("format"))
            .and_then(Value::as_str)
            .map(str::to_string),
        width: params
            .and_then(|p| p.get("width"))
            .and_then(Value::as_i64)
            .map(|w| w as i32),
        height: params
            .and_then(|p| p.get("height"))
            .and_then(Value::as_i64)
            .map(|h| h as i32),
        processing_params: output.processing_params.clone(),
        is_premium: false,
        scheduled_deletion_at: Some(now + FREE_RETENTION),
        created_at: now,
    }
}

fn filename_from_path(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Fill per-type defaults into the worker configuration. Only the keys the
/// workers fall back on anyway; everything else is passed through opaque.
pub fn fill_config_defaults(job_type: JobType, config: Option<Value>) -> Option<Value> {
    let mut map = match config {
        Some(Value::Object(map)) => map,
        Some(other) => {
            // Bounded validation upstream only admits objects; keep anything
            // else opaque rather than guessing.
            return Some(other);
        }
        None => serde_json::Map::new(),
    };

    match job_type {
        JobType::Upscale => {
            map.entry("scale_factor").or_insert(Value::from(2));
        }
        JobType::Enlarge => {
            map.entry("aspect_ratio").or_insert(Value::from("square"));
            map.entry("position").or_insert(Value::from("center"));
        }
        JobType::BgRemoval | JobType::StyleTransfer | JobType::ObjectRemoval => {}
    }

    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queued_job() -> Job {
        Job {
            job_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            original_image_id: Uuid::new_v4(),
            batch_id: None,
            job_type: JobType::Upscale,
            status: JobStatus::Queued,
            priority: None,
            job_config: None,
            error_message: None,
            version: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn update(status: JobStatus) -> JobStatusUpdateRequest {
        JobStatusUpdateRequest {
            status,
            processed_storage_path: None,
            processing_params: None,
            error_message: None,
        }
    }

    #[test]
    fn processing_stamps_started_at_once() {
        let job = queued_job();
        let now = Utc::now();

        let first = plan_transition(&job, &update(JobStatus::Processing), now).unwrap();
        let Transition::Apply(plan) = first else {
            panic!("expected apply");
        };
        assert_eq!(plan.status, JobStatus::Processing);
        assert_eq!(plan.started_at, Some(now));

        let mut started = job;
        started.status = JobStatus::Processing;
        started.started_at = Some(now);

        let second =
            plan_transition(&started, &update(JobStatus::Processing), Utc::now()).unwrap();
        let Transition::Apply(plan) = second else {
            panic!("expected apply");
        };
        // Repeat callbacks must not re-stamp.
        assert_eq!(plan.started_at, None);
    }

    #[test]
    fn completed_requires_output_location() {
        let mut job = queued_job();
        job.status = JobStatus::Processing;
        job.started_at = Some(Utc::now());

        let err = plan_transition(&job, &update(JobStatus::Completed), Utc::now());
        assert!(matches!(err, Err(ApiError::InvalidPayload(_))));
    }

    #[test]
    fn completed_materializes_output() {
        let mut job = queued_job();
        job.status = JobStatus::Processing;
        job.started_at = Some(Utc::now());

        let mut req = update(JobStatus::Completed);
        req.processed_storage_path = Some("https://cdn.example.com/processed/x.png".into());
        req.processing_params = Some(json!({"width": 1600, "height": 1200, "format": "PNG"}));

        let now = Utc::now();
        let Transition::Apply(plan) = plan_transition(&job, &req, now).unwrap() else {
            panic!("expected apply");
        };
        assert_eq!(plan.status, JobStatus::Completed);
        assert_eq!(plan.completed_at, Some(now));

        let output = plan.output.expect("output spec");
        let asset = build_asset(&job, &output, now);
        assert_eq!(asset.job_id, job.job_id);
        assert_eq!(asset.filename, "x.png");
        assert_eq!(asset.width, Some(1600));
        assert_eq!(asset.height, Some(1200));
        assert_eq!(asset.format.as_deref(), Some("PNG"));
        assert!(!asset.is_premium);
        assert_eq!(asset.scheduled_deletion_at, Some(now + FREE_RETENTION));
    }

    #[test]
    fn terminal_jobs_absorb_redeliveries() {
        let mut job = queued_job();
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());

        // Redelivered COMPLETED with a different payload: no-op, no second
        // asset.
        let mut redelivery = update(JobStatus::Completed);
        redelivery.processed_storage_path = Some("https://cdn.example.com/other.png".into());
        let plan = plan_transition(&job, &redelivery, Utc::now()).unwrap();
        assert!(matches!(plan, Transition::Ignore(_)));

        // Stale PROCESSING after terminal: also absorbed.
        let stale = plan_transition(&job, &update(JobStatus::Processing), Utc::now()).unwrap();
        assert!(matches!(stale, Transition::Ignore(_)));

        let mut failed = queued_job();
        failed.status = JobStatus::Failed;
        let after_failed =
            plan_transition(&failed, &update(JobStatus::Completed), Utc::now()).unwrap();
        assert!(matches!(after_failed, Transition::Ignore(_)));
    }

    #[test]
    fn failed_carries_error_message() {
        let job = queued_job();
        let mut req = update(JobStatus::Failed);
        req.error_message = Some("model OOM".into());

        let now = Utc::now();
        let Transition::Apply(plan) = plan_transition(&job, &req, now).unwrap() else {
            panic!("expected apply");
        };
        assert_eq!(plan.status, JobStatus::Failed);
        assert_eq!(plan.completed_at, Some(now));
        assert_eq!(plan.error_message.as_deref(), Some("model OOM"));
        assert!(plan.output.is_none());

        // Message defaults when the worker sends none.
        let Transition::Apply(plan) =
            plan_transition(&job, &update(JobStatus::Failed), now).unwrap()
        else {
            panic!("expected apply");
        };
        assert_eq!(plan.error_message.as_deref(), Some("processing failed"));
    }

    #[test]
    fn requeue_is_rejected() {
        let mut job = queued_job();
        job.status = JobStatus::Processing;
        let err = plan_transition(&job, &update(JobStatus::Queued), Utc::now());
        assert!(matches!(err, Err(ApiError::InvalidPayload(_))));
    }

    #[test]
    fn dispatch_failure_message_mentions_retries_only_when_retried() {
        let transient = DispatchError::Redis(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "connection refused",
        )));
        let message = dispatch_failure_message(&transient);
        assert!(message.contains("after 3 attempts"));

        // A payload that cannot serialize fails on the first attempt; the
        // stored message must not claim retries happened.
        let permanent =
            DispatchError::Serialize(serde_json::from_str::<serde_json::Value>("{").unwrap_err());
        let message = dispatch_failure_message(&permanent);
        assert!(!message.contains("attempts"));

        let unrouted = dispatch_failure_message(&DispatchError::UnsupportedJobType(
            "style_transfer".into(),
        ));
        assert!(unrouted.contains("style_transfer"));
        assert!(!unrouted.contains("attempts"));
    }

    #[test]
    fn config_defaults_by_type() {
        let upscale = fill_config_defaults(JobType::Upscale, None).unwrap();
        assert_eq!(upscale["scale_factor"], json!(2));

        // Caller-provided values win over defaults.
        let custom =
            fill_config_defaults(JobType::Upscale, Some(json!({"scale_factor": 4}))).unwrap();
        assert_eq!(custom["scale_factor"], json!(4));

        let enlarge = fill_config_defaults(JobType::Enlarge, None).unwrap();
        assert_eq!(enlarge["aspect_ratio"], json!("square"));
        assert_eq!(enlarge["position"], json!("center"));

        assert!(fill_config_defaults(JobType::BgRemoval, None).is_none());
    }
}
