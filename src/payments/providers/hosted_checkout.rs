//! Hosted card checkout sessions.
//!
//! Webhooks are signed as `t=<unix>,v1=<hex hmac-sha256("{t}.{body}")>` and
//! rejected outside the replay tolerance window.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::{env_or, malformed, required_env};
use crate::payments::types::{
    ConfirmPaymentRequest, PaymentConfirmation, PaymentIntent, PaymentIntentRequest,
    ProviderName, ProviderPaymentState, RefundRequest, RefundResponse, RefundState, WebhookEvent,
    WebhookEventType, WebhookVerificationResult,
};
use crate::payments::utils::{
    hmac_sha256_hex, json_amount, json_string, json_timestamp, secure_eq, PaymentHttpClient,
    RequestAuth,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

pub const SIGNATURE_HEADER: &str = "checkout-signature";

#[derive(Debug, Clone)]
pub struct HostedCheckoutConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub signature_tolerance_secs: i64,
    pub default_return_url: Option<String>,
}

impl HostedCheckoutConfig {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            secret_key: required_env("HOSTED_CHECKOUT_API_KEY")?,
            webhook_secret: required_env("HOSTED_CHECKOUT_WEBHOOK_SECRET")?,
            base_url: std::env::var("HOSTED_CHECKOUT_BASE_URL")
                .unwrap_or_else(|_| "https://api.checkout.example.com/v1".to_string()),
            timeout_secs: env_or("HOSTED_CHECKOUT_TIMEOUT_SECS", 30),
            max_retries: env_or("HOSTED_CHECKOUT_MAX_RETRIES", 3),
            signature_tolerance_secs: env_or("HOSTED_CHECKOUT_SIGNATURE_TOLERANCE_SECS", 300),
            default_return_url: std::env::var("HOSTED_CHECKOUT_RETURN_URL").ok(),
        })
    }
}

pub struct HostedCheckoutProvider {
    config: HostedCheckoutConfig,
    http: PaymentHttpClient,
}

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

impl SignatureHeader {
    fn parse(header: &str) -> Option<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let (key, value) = part.trim().split_once('=')?;
            match key {
                "t" => timestamp = value.parse::<i64>().ok(),
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }
        Some(Self {
            timestamp: timestamp?,
            signatures,
        })
    }
}

impl HostedCheckoutProvider {
    pub fn new(config: HostedCheckoutConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "hosted_checkout",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(HostedCheckoutConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Signature check against an explicit clock.
    pub fn verify_webhook_at(
        &self,
        payload: &[u8],
        header: &str,
        now: DateTime<Utc>,
    ) -> WebhookVerificationResult {
        let parsed = match SignatureHeader::parse(header) {
            Some(parsed) if !parsed.signatures.is_empty() => parsed,
            _ => return WebhookVerificationResult::from_check(false, "malformed signature header"),
        };

        if (now.timestamp() - parsed.timestamp).abs() > self.config.signature_tolerance_secs {
            return WebhookVerificationResult::from_check(false, "signature timestamp outside tolerance");
        }

        let mut signed = format!("{}.", parsed.timestamp).into_bytes();
        signed.extend_from_slice(payload);
        let expected = match hmac_sha256_hex(&signed, &self.config.webhook_secret) {
            Some(expected) => expected,
            None => return WebhookVerificationResult::from_check(false, "invalid webhook secret"),
        };

        let valid = parsed
            .signatures
            .iter()
            .any(|candidate| secure_eq(expected.as_bytes(), candidate.as_bytes()));
        WebhookVerificationResult::from_check(valid, "invalid checkout signature")
    }

    fn session_state(status: &str, payment_status: &str) -> ProviderPaymentState {
        match (status, payment_status) {
            (_, "paid") => ProviderPaymentState::Confirmed,
            ("expired", _) => ProviderPaymentState::Expired,
            (_, "failed") => ProviderPaymentState::Failed,
            _ => ProviderPaymentState::Pending,
        }
    }
}

#[async_trait]
impl PaymentProvider for HostedCheckoutProvider {
    fn name(&self) -> ProviderName {
        ProviderName::HostedCheckout
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn supports_refunds(&self) -> bool {
        true
    }

    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> PaymentResult<PaymentIntent> {
        request.validate()?;
        let return_url = request
            .return_url
            .clone()
            .or_else(|| self.config.default_return_url.clone());

        let payload = serde_json::json!({
            "client_reference_id": request.reference,
            "amount": request.amount,
            "currency": request.currency.to_lowercase(),
            "customer_email": request.customer.email,
            "success_url": return_url,
            "metadata": { "bookingId": request.booking_id },
        });

        let raw: CheckoutSession = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/checkout/sessions"),
                RequestAuth::Bearer(&self.config.secret_key),
                Some(&payload),
                Some(&request.reference),
            )
            .await?;

        info!(
            reference = %request.reference,
            session_id = %raw.id,
            "checkout session created"
        );

        Ok(PaymentIntent {
            provider_payment_id: raw.id,
            state: Self::session_state(&raw.status, &raw.payment_status),
            checkout_url: raw.url,
            instructions: None,
            expires_at: raw
                .expires_at
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            provider_data: None,
        })
    }

    async fn confirm_payment(
        &self,
        request: ConfirmPaymentRequest,
    ) -> PaymentResult<PaymentConfirmation> {
        let session_id = request
            .provider_payment_id
            .filter(|v| !v.trim().is_empty())
            .ok_or(PaymentError::ValidationError {
                message: "provider_payment_id is required to query a checkout session".to_string(),
                field: Some("provider_payment_id".to_string()),
            })?;

        let raw: CheckoutSession = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/checkout/sessions/{}", session_id)),
                RequestAuth::Bearer(&self.config.secret_key),
                None,
                None,
            )
            .await?;

        Ok(PaymentConfirmation {
            state: Self::session_state(&raw.status, &raw.payment_status),
            provider_payment_id: Some(raw.id),
            amount: raw.amount_total,
            awaiting_webhook: false,
        })
    }

    async fn refund_payment(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        let payload = serde_json::json!({
            "session": request.provider_payment_id,
            "amount": request.amount,
            "reason": request.reason,
        });
        let raw: CheckoutRefund = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/refunds"),
                RequestAuth::Bearer(&self.config.secret_key),
                Some(&payload),
                Some(&request.idempotency_key),
            )
            .await?;

        let state = match raw.status.as_str() {
            "succeeded" => RefundState::Succeeded,
            "pending" | "requires_action" => RefundState::Pending,
            other => {
                return Err(PaymentError::provider(
                    "hosted_checkout",
                    format!("refund {} returned status {}", raw.id, other),
                    false,
                ))
            }
        };
        Ok(RefundResponse {
            provider_refund_id: raw.id,
            state,
        })
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> WebhookVerificationResult {
        self.verify_webhook_at(payload, signature, Utc::now())
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload)
            .map_err(|e| malformed("hosted_checkout", format!("invalid JSON: {}", e)))?;

        let raw_type = json_string(&parsed, "/type")
            .ok_or_else(|| malformed("hosted_checkout", "missing type"))?;
        let event_type = match raw_type.as_str() {
            "checkout.session.completed" => WebhookEventType::PaymentConfirmed,
            "checkout.session.expired" => WebhookEventType::PaymentExpired,
            "checkout.session.payment_failed" => WebhookEventType::PaymentFailed,
            "refund.succeeded" => WebhookEventType::RefundSucceeded,
            "refund.failed" => WebhookEventType::RefundFailed,
            other => {
                return Err(malformed(
                    "hosted_checkout",
                    format!("unsupported event {}", other),
                ))
            }
        };
        let event_id =
            json_string(&parsed, "/id").ok_or_else(|| malformed("hosted_checkout", "missing id"))?;

        // Refund objects point back at their session.
        let session_id = json_string(&parsed, "/data/object/session")
            .or_else(|| json_string(&parsed, "/data/object/id"));

        Ok(WebhookEvent {
            provider: ProviderName::HostedCheckout,
            event_type,
            event_id,
            provider_payment_id: session_id,
            reference: json_string(&parsed, "/data/object/client_reference_id"),
            amount: json_amount(&parsed, "/data/object/amount_total")
                .or_else(|| json_amount(&parsed, "/data/object/amount")),
            currency: json_string(&parsed, "/data/object/currency").map(|c| c.to_uppercase()),
            timestamp: json_timestamp(&parsed, "/created").unwrap_or_else(Utc::now),
            raw_data: parsed,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
    status: String,
    payment_status: String,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CheckoutRefund {
    id: String,
    status: String,
}
