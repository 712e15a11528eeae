//! API error type

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use vitrina_payments::PaymentError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("payment provider unavailable")]
    UpstreamUnavailable(String),

    #[error("internal error")]
    Internal(String),
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::AuthRejected => ApiError::Unauthorized,
            PaymentError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            PaymentError::UpstreamUnavailable(msg) | PaymentError::PaymentNotFetched(msg) => {
                ApiError::UpstreamUnavailable(msg)
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::UpstreamUnavailable(detail) => {
                tracing::error!(detail = %detail, "Upstream payment provider failure");
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            ApiError::Internal(detail) => {
                // Detail stays in the logs, not in the response body.
                tracing::error!(detail = %detail, "Internal API error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
