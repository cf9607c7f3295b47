//! API error types and HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use complykit_billing::BillingError;

/// Result alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced by API handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("billing is not configured")]
    ServiceUnavailable,

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "Authentication required".to_string())
            }
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            ApiError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Billing is not configured".to_string(),
            ),
            // Internal details go to the log, not the wire
            ApiError::Database(msg) | ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal API error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Database(e.to_string())
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::Validation(msg) => ApiError::BadRequest(msg),
            BillingError::WebhookSignatureInvalid => {
                ApiError::BadRequest("Invalid webhook signature".to_string())
            }
            // Configuration problems are operator errors; the caller just
            // sees a 500 with the detail in the log
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn billing_validation_maps_to_bad_request() {
        let err: ApiError = BillingError::Validation("unknown subscription tier: gold".into()).into();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn configuration_error_is_not_leaked_as_client_error() {
        let err: ApiError =
            BillingError::Configuration("no active price - run catalog sync".into()).into();
        assert!(matches!(err, ApiError::Internal(_)));
    }

    #[test]
    fn signature_failure_maps_to_bad_request() {
        let err: ApiError = BillingError::WebhookSignatureInvalid.into();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
