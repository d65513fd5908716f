//! HTTP surface.

pub mod admin;
pub mod auth;
pub mod bookings;
pub mod payments;
pub mod webhooks;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{any, get, post, put},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use crate::health::{HealthChecker, HealthState};
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::Services;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub health: HealthChecker,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .route("/v1/bookings/cancel", post(bookings::cancel_booking))
        .route("/v1/bookings/confirm", post(bookings::confirm_booking))
        .route("/v1/bookings/start", post(bookings::start_service))
        .route("/v1/bookings/complete", post(bookings::complete_booking))
        .route("/v1/bookings/dispute", post(bookings::open_dispute))
        .route("/v1/bookings/resolve-dispute", post(bookings::resolve_dispute))
        .route("/v1/payments/intents", post(payments::create_payment_intent))
        .route("/v1/payments/confirm", post(payments::confirm_payment))
        .route("/v1/admin/feature-flags/{flag}", put(admin::set_feature_flag))
        .route("/webhooks/{provider}", any(webhooks::handle_webhook))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn root() -> &'static str {
    "Welcome to EventHub Backend API"
}

/// GET /health: 503 once any hard dependency is down.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    info!("🏥 Health check requested");
    let status = state.health.check_health().await;
    let code = match status.status {
        HealthState::Unhealthy => {
            error!("❌ Health check failed - service unhealthy");
            StatusCode::SERVICE_UNAVAILABLE
        }
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
    };
    (code, Json(status))
}

/// Readiness probe - same checks as `/health`
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    info!("🔍 Readiness probe requested");
    health(State(state)).await
}

/// Liveness probe - the process is up
async fn liveness() -> &'static str {
    "OK"
}
