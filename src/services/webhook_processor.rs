//! Inbound payment provider webhooks.
//!
//! Providers retry aggressively on anything but 2xx, so every outcome other
//! than a bad signature or a wrong method is reported as received. "Could not
//! act" is signalled through [`WebhookOutcome::Skipped`], never as an error.

use http::{HeaderMap, Method};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::repository::PaymentRepository;
use crate::error::AppResult;
use crate::models::{Payment, PaymentStatus};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{WebhookEvent, WebhookEventType};
use crate::payments::PaymentProviderRegistry;
use crate::services::feature_flags::{Feature, FeatureFlags};
use crate::services::idempotency::{Claim, IdempotencyService};
use crate::services::settlement::{SettlementOutcome, SettlementService, StatusUpdate};

const WEBHOOK_OPERATION: &str = "webhook";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookProcessorError {
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("Invalid signature")]
    InvalidSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    KillSwitch,
    ProviderUnavailable,
    Unparseable,
    Duplicate,
    PaymentNotFound,
    ProcessingError,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::KillSwitch => "kill_switch",
            SkipReason::ProviderUnavailable => "provider_unavailable",
            SkipReason::Unparseable => "unparseable",
            SkipReason::Duplicate => "duplicate",
            SkipReason::PaymentNotFound => "payment_not_found",
            SkipReason::ProcessingError => "processing_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Processed {
        event_type: WebhookEventType,
        event_id: String,
    },
    Skipped(SkipReason),
}

impl WebhookOutcome {
    /// JSON acknowledgement returned to the provider.
    pub fn body(&self) -> JsonValue {
        match self {
            WebhookOutcome::Processed { event_type, event_id } => json!({
                "received": true,
                "eventType": event_type.as_str(),
                "eventId": event_id,
            }),
            WebhookOutcome::Skipped(reason) => json!({
                "received": true,
                "skipped": true,
                "reason": reason.as_str(),
            }),
        }
    }
}

pub struct WebhookProcessor {
    flags: Arc<FeatureFlags>,
    providers: PaymentProviderRegistry,
    idempotency: IdempotencyService,
    payments: Arc<dyn PaymentRepository>,
    settlement: Arc<SettlementService>,
}

impl WebhookProcessor {
    pub fn new(
        flags: Arc<FeatureFlags>,
        providers: PaymentProviderRegistry,
        idempotency: IdempotencyService,
        payments: Arc<dyn PaymentRepository>,
        settlement: Arc<SettlementService>,
    ) -> Self {
        Self {
            flags,
            providers,
            idempotency,
            payments,
            settlement,
        }
    }

    pub async fn process(
        &self,
        method: &Method,
        provider_name: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        if method != Method::POST {
            return Err(WebhookProcessorError::MethodNotAllowed(method.to_string()));
        }

        if !self.flags.is_enabled(Feature::Payments).await
            || !self.flags.is_enabled(Feature::Webhooks).await
        {
            warn!(provider = %provider_name, "webhook skipped by kill-switch");
            return Ok(WebhookOutcome::Skipped(SkipReason::KillSwitch));
        }

        let Some(provider) = self.providers.resolve(provider_name) else {
            warn!(provider = %provider_name, "webhook for unavailable provider");
            return Ok(WebhookOutcome::Skipped(SkipReason::ProviderUnavailable));
        };

        self.verify(provider.as_ref(), headers, body)?;

        let event = match provider.parse_webhook_event(body) {
            Ok(event) => event,
            Err(e) => {
                warn!(provider = %provider_name, error = %e, "unparseable webhook payload");
                return Ok(WebhookOutcome::Skipped(SkipReason::Unparseable));
            }
        };

        let key = event.idempotency_key();
        if let Claim::Duplicate { .. } = self.idempotency.try_begin(&key, WEBHOOK_OPERATION).await {
            info!(key = %key, "duplicate webhook delivery");
            return Ok(WebhookOutcome::Skipped(SkipReason::Duplicate));
        }

        let payment = match self.find_payment(&event).await {
            Ok(Some(payment)) => payment,
            Ok(None) => {
                warn!(
                    key = %key,
                    provider_payment_id = ?event.provider_payment_id,
                    reference = ?event.reference,
                    "webhook for unknown payment"
                );
                self.idempotency.mark_failed(&key, "payment not found").await;
                return Ok(WebhookOutcome::Skipped(SkipReason::PaymentNotFound));
            }
            Err(e) => {
                error!(key = %key, error = %e.internal_message(), "payment lookup failed");
                self.idempotency.mark_failed(&key, &e.internal_message()).await;
                return Ok(WebhookOutcome::Skipped(SkipReason::ProcessingError));
            }
        };

        match self.dispatch(&event, payment).await {
            Ok(result) => {
                self.idempotency.mark_completed(&key, Some(result)).await;
                info!(key = %key, event_type = %event.event_type, "webhook processed");
                Ok(WebhookOutcome::Processed {
                    event_type: event.event_type,
                    event_id: event.event_id,
                })
            }
            Err(e) => {
                error!(key = %key, event_type = %event.event_type, error = %e.internal_message(), "webhook dispatch failed");
                self.idempotency.mark_failed(&key, &e.internal_message()).await;
                Ok(WebhookOutcome::Skipped(SkipReason::ProcessingError))
            }
        }
    }

    fn verify(
        &self,
        provider: &dyn PaymentProvider,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), WebhookProcessorError> {
        let signature = headers
            .get(provider.signature_header())
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                warn!(provider = %provider.name(), header = provider.signature_header(), "webhook signature missing");
                WebhookProcessorError::InvalidSignature
            })?;

        let verification = provider.verify_webhook(body, signature);
        if !verification.valid {
            error!(
                provider = %provider.name(),
                reason = ?verification.reason,
                "invalid webhook signature"
            );
            return Err(WebhookProcessorError::InvalidSignature);
        }
        Ok(())
    }

    async fn find_payment(&self, event: &WebhookEvent) -> AppResult<Option<Payment>> {
        if let Some(provider_payment_id) = event.provider_payment_id.as_deref() {
            if let Some(payment) = self
                .payments
                .find_by_provider_payment_id(event.provider, provider_payment_id)
                .await?
            {
                return Ok(Some(payment));
            }
        }
        match event.reference.as_deref() {
            Some(reference) => Ok(self.payments.find_by_reference(reference).await?),
            None => Ok(None),
        }
    }

    async fn dispatch(&self, event: &WebhookEvent, payment: Payment) -> AppResult<JsonValue> {
        let payment_id = payment.id.clone();
        let status = match event.event_type {
            WebhookEventType::PaymentConfirmed => {
                match self
                    .settlement
                    .confirm_payment(payment, event.amount, event.provider_payment_id.clone())
                    .await?
                {
                    SettlementOutcome::Confirmed { payment, effects } => {
                        if !effects.all_succeeded() {
                            warn!(payment_id = %payment.id, "payment confirmed with failed follow-up effects");
                        }
                        payment.status
                    }
                    SettlementOutcome::AlreadyConfirmed(payment) | SettlementOutcome::Ignored(payment) => {
                        payment.status
                    }
                }
            }
            WebhookEventType::PaymentFailed | WebhookEventType::PaymentExpired => {
                let target = if event.event_type == WebhookEventType::PaymentFailed {
                    PaymentStatus::Failed
                } else {
                    PaymentStatus::Expired
                };
                let reason = event
                    .raw_data
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .or_else(|| Some(event.event_type.as_str().to_string()));
                match self.settlement.record_outcome(&payment, target, reason).await? {
                    StatusUpdate::Applied(p) | StatusUpdate::Unchanged(p) => p.status,
                }
            }
            WebhookEventType::RefundSucceeded => {
                match self.settlement.record_refund(&payment, event.amount).await? {
                    StatusUpdate::Applied(p) | StatusUpdate::Unchanged(p) => p.status,
                }
            }
            WebhookEventType::RefundFailed => {
                error!(
                    payment_id = %payment.id,
                    provider = %event.provider,
                    event_id = %event.event_id,
                    "provider reported a failed refund"
                );
                payment.status
            }
        };

        Ok(json!({
            "eventType": event.event_type.as_str(),
            "paymentId": payment_id,
            "status": status,
        }))
    }
}
