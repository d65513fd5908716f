//! Scriptable provider for service tests.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    ConfirmPaymentRequest, PaymentConfirmation, PaymentIntent, PaymentIntentRequest, ProviderName,
    ProviderPaymentState, RefundRequest, RefundResponse, RefundState, WebhookEvent,
    WebhookEventType, WebhookVerificationResult,
};

pub const VALID_SIGNATURE: &str = "sig-ok";

pub struct ScriptedProvider {
    name: ProviderName,
    fail_refunds: AtomicBool,
    fail_intents: AtomicBool,
    pub refund_calls: AtomicUsize,
    pub intent_calls: AtomicUsize,
    confirmation: Mutex<Option<PaymentConfirmation>>,
}

impl ScriptedProvider {
    pub fn new(name: ProviderName) -> Self {
        Self {
            name,
            fail_refunds: AtomicBool::new(false),
            fail_intents: AtomicBool::new(false),
            refund_calls: AtomicUsize::new(0),
            intent_calls: AtomicUsize::new(0),
            confirmation: Mutex::new(None),
        }
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    pub fn fail_intents(&self, fail: bool) {
        self.fail_intents.store(fail, Ordering::SeqCst);
    }

    pub fn confirm_with(&self, confirmation: PaymentConfirmation) {
        *self.confirmation.lock().unwrap() = Some(confirmation);
    }

    pub fn refunds(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }
}

/// Body understood by [`ScriptedProvider::parse_webhook_event`].
pub fn webhook_body(event_type: &str, event_id: &str, provider_payment_id: &str, amount: i64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": event_id,
        "type": event_type,
        "paymentId": provider_payment_id,
        "amount": amount,
        "currency": "XAF",
    }))
    .unwrap()
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    fn name(&self) -> ProviderName {
        self.name
    }

    fn signature_header(&self) -> &'static str {
        "x-test-signature"
    }

    fn supports_refunds(&self) -> bool {
        true
    }

    async fn create_payment_intent(&self, request: PaymentIntentRequest) -> PaymentResult<PaymentIntent> {
        self.intent_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_intents.load(Ordering::SeqCst) {
            return Err(PaymentError::provider(self.name.as_str(), "intent rejected", false));
        }
        Ok(PaymentIntent {
            provider_payment_id: format!("prov-{}", request.reference),
            state: ProviderPaymentState::Pending,
            checkout_url: Some("https://pay.test/checkout".to_string()),
            instructions: None,
            expires_at: None,
            provider_data: None,
        })
    }

    async fn confirm_payment(&self, _request: ConfirmPaymentRequest) -> PaymentResult<PaymentConfirmation> {
        Ok(self
            .confirmation
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(PaymentConfirmation::awaiting_webhook))
    }

    async fn refund_payment(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(PaymentError::provider(self.name.as_str(), "refund rejected", true));
        }
        Ok(RefundResponse {
            provider_refund_id: format!("refund-{}", request.provider_payment_id),
            state: RefundState::Succeeded,
        })
    }

    fn verify_webhook(&self, _payload: &[u8], signature: &str) -> WebhookVerificationResult {
        WebhookVerificationResult::from_check(signature == VALID_SIGNATURE, "signature mismatch")
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let raw: JsonValue = serde_json::from_slice(payload).map_err(|e| PaymentError::WebhookPayloadError {
            message: e.to_string(),
        })?;
        let event_type = raw
            .get("type")
            .and_then(|v| serde_json::from_value::<WebhookEventType>(v.clone()).ok())
            .ok_or_else(|| PaymentError::WebhookPayloadError {
                message: "unknown event type".to_string(),
            })?;
        Ok(WebhookEvent {
            provider: self.name,
            event_type,
            event_id: raw.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            provider_payment_id: raw.get("paymentId").and_then(|v| v.as_str()).map(str::to_string),
            reference: raw.get("reference").and_then(|v| v.as_str()).map(str::to_string),
            amount: raw.get("amount").and_then(|v| v.as_i64()),
            currency: raw.get("currency").and_then(|v| v.as_str()).map(str::to_string),
            raw_data: raw,
            timestamp: Utc::now(),
        })
    }
}
