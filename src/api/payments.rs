use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::Deserialize;

use super::auth::Authenticated;
use super::AppState;
use crate::error::AppError;
use crate::services::payments::{CreateIntentRequest, ManualConfirmation, PaymentIntentResponse};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentBody {
    #[serde(default)]
    pub payment_id: String,
}

/// POST /v1/payments/intents
pub async fn create_payment_intent(
    State(state): State<AppState>,
    auth: Authenticated,
    body: Result<Json<CreateIntentRequest>, JsonRejection>,
) -> Result<Json<PaymentIntentResponse>, AppError> {
    let request = auth.ctx.body(body)?;
    state
        .services
        .payments
        .create_payment_intent(&auth.caller, request)
        .await
        .map(Json)
        .map_err(|e| auth.ctx.reject(e))
}

/// POST /v1/payments/confirm
pub async fn confirm_payment(
    State(state): State<AppState>,
    auth: Authenticated,
    body: Result<Json<ConfirmPaymentBody>, JsonRejection>,
) -> Result<Json<ManualConfirmation>, AppError> {
    let body = auth.ctx.body(body)?;
    state
        .services
        .payments
        .confirm_payment(&auth.caller, &body.payment_id)
        .await
        .map(Json)
        .map_err(|e| auth.ctx.reject(e))
}
