use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{info, warn};

use super::AppState;
use crate::services::webhook_processor::WebhookProcessorError;

/// ANY /webhooks/{provider}
///
/// The body is taken as raw bytes: signatures are computed over exactly what
/// the provider sent.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    info!(provider = %provider, bytes = body.len(), "Received webhook");

    match state
        .services
        .webhooks
        .process(&method, &provider, &headers, &body)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome.body())).into_response(),
        Err(WebhookProcessorError::InvalidSignature) => {
            warn!(provider = %provider, "Rejected webhook with invalid signature");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "received": false, "error": "invalid_signature" })),
            )
                .into_response()
        }
        Err(WebhookProcessorError::MethodNotAllowed(method)) => {
            warn!(provider = %provider, method = %method, "Rejected webhook method");
            (
                StatusCode::METHOD_NOT_ALLOWED,
                [(axum::http::header::ALLOW, "POST")],
                Json(json!({ "received": false, "error": "method_not_allowed" })),
            )
                .into_response()
        }
    }
}
