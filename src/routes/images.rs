use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::db::{asset_queries, job_queries};
use crate::error::ApiError;
use crate::models::asset::ProcessedImage;

/// GET /api/v1/images/{job_id} — stream the full-quality result. Owner-only,
/// gated purely on the asset's stored premium flag; query parameters on the
/// advertised URL are ignored.
pub async fn full_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let asset = owned_asset(&state, job_id, user_id).await?;

    if !asset.is_premium {
        return Err(ApiError::PaymentRequired);
    }

    let bytes = state
        .proxy
        .fetch_full(&asset.storage_path)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    let content_type = content_type_for(&asset.filename);
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

/// GET /api/v1/images/{job_id}/thumbnail — low-quality preview.
/// Owner-only, available regardless of premium state.
pub async fn thumbnail(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let asset = owned_asset(&state, job_id, user_id).await?;

    let bytes = state
        .proxy
        .fetch_thumbnail(&asset.storage_path)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    // Locally rendered thumbnails are always JPEG.
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes))
}

async fn owned_asset(
    state: &AppState,
    job_id: Uuid,
    user_id: Uuid,
) -> Result<ProcessedImage, ApiError> {
    let job = job_queries::get_job(&state.db, job_id)
        .await?
        .ok_or(ApiError::NotFound("job"))?;

    if job.user_id != user_id {
        return Err(ApiError::Forbidden);
    }

    asset_queries::get_by_job(&state.db, job_id)
        .await?
        .ok_or(ApiError::NotReady)
}

fn content_type_for(filename: &str) -> &'static str {
    match filename.rsplit('.').next().map(str::to_ascii_lowercase) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for("out.png"), "image/png");
        assert_eq!(content_type_for("out.JPG"), "image/jpeg");
        assert_eq!(content_type_for("out.webp"), "image/webp");
        assert_eq!(content_type_for("mystery"), "application/octet-stream");
    }
}
