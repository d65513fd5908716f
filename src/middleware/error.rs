//! Error response formatting
//!
//! Every failed request gets the same JSON body: the stable code, a localized
//! message, and a request id the caller can quote to support.

use crate::error::{AppError, ErrorCode};
use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: ErrorCode,

    /// Localized, human-readable message. Never carries internal detail.
    pub message: String,

    /// Request ID for support correlation
    pub request_id: String,

    /// RFC 3339 timestamp of the error
    pub timestamp: String,

    /// Whether the client may retry the request
    pub retryable: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error
                .request_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            timestamp: Utc::now().to_rfc3339(),
            retryable: error.is_retryable(),
            retry_after_seconds: error.retry_after(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse::from_app_error(&self);

        if status_code.is_server_error() {
            tracing::error!(
                code = self.error_code().as_str(),
                request_id = %body.request_id,
                status = status_code.as_u16(),
                error = %self.internal_message(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                code = self.error_code().as_str(),
                request_id = %body.request_id,
                status = status_code.as_u16(),
                error = %self.internal_message(),
                "Client error occurred"
            );
        }

        let retry_after = body.retry_after_seconds;
        let mut response = (status_code, Json(body)).into_response();
        if let Some(seconds) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Create a standardized success response
pub fn success_response<T: Serialize>(data: T) -> impl IntoResponse {
    Json(serde_json::json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Helper to extract request ID from request headers
pub fn get_request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppErrorKind, ExternalError};
    use crate::locale::Locale;

    #[test]
    fn test_error_response_from_app_error() {
        let app_error = AppError::booking_not_found("b-1").with_request_id("req_123");

        let error_response = ErrorResponse::from_app_error(&app_error);

        assert_eq!(error_response.error, ErrorCode::NotFound);
        assert_eq!(error_response.request_id, "req_123");
        assert!(!error_response.retryable);
        assert!(!error_response.message.contains("b-1"));
    }

    #[test]
    fn test_request_id_is_generated_when_missing() {
        let error_response = ErrorResponse::from_app_error(&AppError::internal("boom"));

        assert!(Uuid::parse_str(&error_response.request_id).is_ok());
        assert!(!error_response.message.contains("boom"));
    }

    #[test]
    fn test_rate_limit_response_carries_retry_after() {
        let app_error = AppError::new(AppErrorKind::External(ExternalError::RateLimit {
            action: "payment_intent".to_string(),
            retry_after: Some(42),
        }));

        let response = app_error.into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(axum::http::header::RETRY_AFTER).unwrap(),
            "42"
        );
    }

    #[test]
    fn test_status_code_mapping() {
        let illegal = AppError::invalid_transition("booking", "b-1", "completed", "cancelled");
        assert_eq!(illegal.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);

        let missing = AppError::missing_field("bookingId");
        assert_eq!(missing.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_message_follows_locale() {
        let en = ErrorResponse::from_app_error(&AppError::unauthenticated());
        let fr = ErrorResponse::from_app_error(&AppError::unauthenticated().with_locale(Locale::Fr));

        assert_ne!(en.message, fr.message);
    }
}
