use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::db::{asset_queries, job_queries};
use crate::error::ApiError;
use crate::models::api::{CreateJobRequest, JobHistoryQuery, JobResponse, JobStatusUpdateRequest};
use crate::models::asset::ProcessedImage;
use crate::models::job::Job;
use crate::services::{jobs, premium, tokens};

/// Default history page size when the client does not ask for one.
const DEFAULT_LIST_LIMIT: i64 = 50;

/// POST /api/v1/jobs — create a job and dispatch it to the workers.
pub async fn create_job(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    request.validate()?;

    let job = jobs::create_and_dispatch(&state.db, &state.dispatch, user_id, &request).await?;

    let mut response = JobResponse::from_job(&job, state.pricing.cost(job.job_type));
    response.token_balance = Some(tokens::balance(&state.db, user_id).await?);

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// POST /api/v1/jobs/{job_id}/status — worker status callback.
///
/// No per-user auth: the workers are trusted at the network level, so the
/// payload is parsed from raw bytes and schema-validated before anything is
/// touched. Redeliveries for terminal jobs return 200 without mutation.
pub async fn update_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let update: JobStatusUpdateRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidPayload(format!("malformed status payload: {e}")))?;
    update.validate()?;

    tracing::info!(%job_id, status = %update.status, "received status callback");

    jobs::ingest_status(&state.db, job_id, &update).await?;
    Ok(StatusCode::OK)
}

/// GET /api/v1/jobs/{job_id}/status — poll a job.
pub async fn get_job_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = job_queries::get_job(&state.db, job_id)
        .await?
        .ok_or(ApiError::NotFound("job"))?;

    if job.user_id != user_id {
        return Err(ApiError::Forbidden);
    }

    let asset = asset_queries::get_by_job(&state.db, job_id).await?;
    let mut response = to_response(&state, &job, asset.as_ref());
    response.token_balance = Some(tokens::balance(&state.db, user_id).await?);

    Ok(Json(response))
}

/// GET /api/v1/jobs — job history for the caller, most recent first.
pub async fn list_jobs(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<JobHistoryQuery>,
) -> Result<Json<Vec<JobResponse>>, ApiError> {
    query.validate()?;

    let jobs = job_queries::list_jobs(
        &state.db,
        user_id,
        query.since,
        query.limit.unwrap_or(DEFAULT_LIST_LIMIT),
    )
    .await?;

    let mut responses = Vec::with_capacity(jobs.len());
    for job in &jobs {
        let asset = asset_queries::get_by_job(&state.db, job.job_id).await?;
        responses.push(to_response(&state, job, asset.as_ref()));
    }

    Ok(Json(responses))
}

/// POST /api/v1/jobs/{job_id}/unlock-premium — pay tokens for full access.
pub async fn unlock_premium(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    let outcome = premium::unlock_premium(&state.db, &state.pricing, job_id, user_id).await?;

    let mut response = to_response(&state, &outcome.job, Some(&outcome.asset));
    response.token_balance = Some(outcome.token_balance);

    Ok(Json(response))
}

fn to_response(state: &AppState, job: &Job, asset: Option<&ProcessedImage>) -> JobResponse {
    let mut response = JobResponse::from_job(job, state.pricing.cost(job.job_type));
    let urls = premium::resolve_access(&state.storage, job, asset);
    response.is_premium_quality = asset.map(|a| a.is_premium).unwrap_or(false);
    response.processed_image_url = urls.processed_image_url;
    response.thumbnail_url = urls.thumbnail_url;
    response
}
