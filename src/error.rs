use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

/// Request-scoped error taxonomy, mapped onto HTTP status codes at the edge.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("caller does not own this resource")]
    Forbidden,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("job output is not ready")]
    NotReady,

    #[error("insufficient token balance")]
    PaymentRequired,

    #[error("concurrent modification, retry the request")]
    Conflict,

    #[error("no routing key configured for job type {0}")]
    UnsupportedJobType(String),

    #[error("dispatch failed for job {job_id}: {reason}")]
    DispatchExhausted { job_id: Uuid, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("upstream fetch failed: {0}")]
    Upstream(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::NotReady | ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::PaymentRequired => StatusCode::PAYMENT_REQUIRED,
            ApiError::UnsupportedJobType(_)
            | ApiError::DispatchExhausted { .. }
            | ApiError::Database(_)
            | ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let mut body = json!({ "error": self.to_string() });
        if let ApiError::DispatchExhausted { job_id, .. } = &self {
            // Surface the job id so the failure can be followed up.
            body["job_id"] = json!(job_id);
        }

        (status, Json(body)).into_response()
    }
}

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        ApiError::InvalidPayload(report.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_status_codes() {
        assert_eq!(ApiError::NotFound("job").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::InvalidPayload("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::PaymentRequired.status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(ApiError::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::NotReady.status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::DispatchExhausted {
                job_id: Uuid::new_v4(),
                reason: "broker unreachable".into()
            }
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
