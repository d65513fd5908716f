use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::Deserialize;

use super::auth::Authenticated;
use super::AppState;
use crate::error::AppError;
use crate::services::bookings::{CancelBookingResult, DisputeOutcome, TransitionResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingActionBody {
    #[serde(default)]
    pub booking_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveDisputeBody {
    #[serde(default)]
    pub booking_id: String,
    pub outcome: DisputeOutcome,
    pub note: Option<String>,
}

/// POST /v1/bookings/cancel
pub async fn cancel_booking(
    State(state): State<AppState>,
    auth: Authenticated,
    body: Result<Json<BookingActionBody>, JsonRejection>,
) -> Result<Json<CancelBookingResult>, AppError> {
    let body = auth.ctx.body(body)?;
    state
        .services
        .bookings
        .cancel_booking(&auth.caller, &body.booking_id, body.reason)
        .await
        .map(Json)
        .map_err(|e| auth.ctx.reject(e))
}

/// POST /v1/bookings/confirm
pub async fn confirm_booking(
    State(state): State<AppState>,
    auth: Authenticated,
    body: Result<Json<BookingActionBody>, JsonRejection>,
) -> Result<Json<TransitionResult>, AppError> {
    let body = auth.ctx.body(body)?;
    state
        .services
        .bookings
        .confirm_booking(&auth.caller, &body.booking_id)
        .await
        .map(Json)
        .map_err(|e| auth.ctx.reject(e))
}

/// POST /v1/bookings/start
pub async fn start_service(
    State(state): State<AppState>,
    auth: Authenticated,
    body: Result<Json<BookingActionBody>, JsonRejection>,
) -> Result<Json<TransitionResult>, AppError> {
    let body = auth.ctx.body(body)?;
    state
        .services
        .bookings
        .start_service(&auth.caller, &body.booking_id)
        .await
        .map(Json)
        .map_err(|e| auth.ctx.reject(e))
}

/// POST /v1/bookings/complete
pub async fn complete_booking(
    State(state): State<AppState>,
    auth: Authenticated,
    body: Result<Json<BookingActionBody>, JsonRejection>,
) -> Result<Json<TransitionResult>, AppError> {
    let body = auth.ctx.body(body)?;
    state
        .services
        .bookings
        .complete_booking(&auth.caller, &body.booking_id)
        .await
        .map(Json)
        .map_err(|e| auth.ctx.reject(e))
}

/// POST /v1/bookings/dispute
pub async fn open_dispute(
    State(state): State<AppState>,
    auth: Authenticated,
    body: Result<Json<BookingActionBody>, JsonRejection>,
) -> Result<Json<TransitionResult>, AppError> {
    let body = auth.ctx.body(body)?;
    state
        .services
        .bookings
        .open_dispute(&auth.caller, &body.booking_id, body.reason)
        .await
        .map(Json)
        .map_err(|e| auth.ctx.reject(e))
}

/// POST /v1/bookings/resolve-dispute
pub async fn resolve_dispute(
    State(state): State<AppState>,
    auth: Authenticated,
    body: Result<Json<ResolveDisputeBody>, JsonRejection>,
) -> Result<Json<TransitionResult>, AppError> {
    let body = auth.ctx.body(body)?;
    state
        .services
        .bookings
        .resolve_dispute(&auth.caller, &body.booking_id, body.outcome, body.note)
        .await
        .map(Json)
        .map_err(|e| auth.ctx.reject(e))
}
