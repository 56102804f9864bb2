use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, JobType};

/// Hard cap on history page size.
pub const MAX_LIST_LIMIT: i64 = 100;

const JOB_COLUMNS: &str = "job_id, user_id, original_image_id, batch_id, job_type, status, \
     priority, job_config, error_message, version, created_at, started_at, completed_at";

fn job_from_row(row: &PgRow) -> Result<Job, sqlx::Error> {
    let job_type: String = row.try_get("job_type")?;
    let status: String = row.try_get("status")?;

    Ok(Job {
        job_id: row.try_get("job_id")?,
        user_id: row.try_get("user_id")?,
        original_image_id: row.try_get("original_image_id")?,
        batch_id: row.try_get("batch_id")?,
        job_type: job_type.parse::<JobType>().map_err(|e| decode_err("job_type", e))?,
        status: status.parse::<JobStatus>().map_err(|e| decode_err("status", e))?,
        priority: row.try_get("priority")?,
        job_config: row.try_get("job_config")?,
        error_message: row.try_get("error_message")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn decode_err(column: &str, source: strum::ParseError) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

/// Insert a new job in `queued` state. The id is generated server-side; the
/// worker never supplies identities.
pub async fn create_job(
    pool: &PgPool,
    user_id: Uuid,
    original_image_id: Uuid,
    job_type: JobType,
    job_config: Option<&serde_json::Value>,
    priority: Option<i32>,
) -> Result<Job, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO jobs (job_id, user_id, original_image_id, job_type, status, job_config, priority)
        VALUES ($1, $2, $3, $4, 'queued', $5, $6)
        RETURNING {JOB_COLUMNS}
        "#,
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(original_image_id)
    .bind(job_type.to_string())
    .bind(job_config)
    .bind(priority)
    .fetch_one(pool)
    .await?;

    job_from_row(&row)
}

/// Get a job by ID
pub async fn get_job<'e>(
    executor: impl PgExecutor<'e>,
    job_id: Uuid,
) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM jobs
        WHERE job_id = $1
        "#,
    ))
    .bind(job_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Most-recent-first job history for a user, bounded by `MAX_LIST_LIMIT`.
pub async fn list_jobs(
    pool: &PgPool,
    user_id: Uuid,
    since: Option<DateTime<Utc>>,
    limit: i64,
) -> Result<Vec<Job>, sqlx::Error> {
    let limit = limit.clamp(1, MAX_LIST_LIMIT);

    let rows = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM jobs
        WHERE user_id = $1
          AND ($2::timestamptz IS NULL OR created_at >= $2)
        ORDER BY created_at DESC
        LIMIT $3
        "#,
    ))
    .bind(user_id)
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Compare-and-swap status transition. Timestamps are only written when the
/// caller supplies them (COALESCE keeps prior stamps), the error message is
/// never cleared, and the version column is bumped. Returns `false` when the
/// expected version no longer matches (concurrent writer won).
#[allow(clippy::too_many_arguments)]
pub async fn apply_transition<'e>(
    executor: impl PgExecutor<'e>,
    job_id: Uuid,
    expected_version: i64,
    status: JobStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = $3,
            started_at = COALESCE($4, started_at),
            completed_at = COALESCE($5, completed_at),
            error_message = COALESCE($6, error_message),
            version = version + 1
        WHERE job_id = $1 AND version = $2
        "#,
    )
    .bind(job_id)
    .bind(expected_version)
    .bind(status.to_string())
    .bind(started_at)
    .bind(completed_at)
    .bind(error_message)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}
