//! Reference-code payments settled at ATMs and agents. The rail has no
//! refund API, so refunds fail explicitly and are handled out of band.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::{env_or, malformed, required_env};
use crate::payments::types::{
    ConfirmPaymentRequest, PaymentConfirmation, PaymentIntent, PaymentIntentRequest,
    ProviderName, ProviderPaymentState, RefundRequest, RefundResponse, WebhookEvent,
    WebhookEventType, WebhookVerificationResult,
};
use crate::payments::utils::{
    json_amount, json_string, json_timestamp, verify_hmac_sha512_hex, PaymentHttpClient,
    RequestAuth,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

pub const SIGNATURE_HEADER: &str = "x-reference-signature";

#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    pub api_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub expiry_minutes: u32,
}

impl ReferenceConfig {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            api_key: required_env("REFERENCE_API_KEY")?,
            webhook_secret: required_env("REFERENCE_WEBHOOK_SECRET")?,
            base_url: std::env::var("REFERENCE_BASE_URL")
                .unwrap_or_else(|_| "https://api.refpay.example.com".to_string()),
            timeout_secs: env_or("REFERENCE_TIMEOUT_SECS", 30),
            max_retries: env_or("REFERENCE_MAX_RETRIES", 3),
            expiry_minutes: env_or("REFERENCE_EXPIRY_MINUTES", 2880),
        })
    }
}

pub struct ReferenceProvider {
    config: ReferenceConfig,
    http: PaymentHttpClient,
}

impl ReferenceProvider {
    pub fn new(config: ReferenceConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "reference",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(ReferenceConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn auth(&self) -> RequestAuth<'_> {
        RequestAuth::ApiKeyHeader {
            header: "x-api-key",
            key: &self.config.api_key,
        }
    }

    fn state(raw: &str) -> ProviderPaymentState {
        match raw {
            "paid" | "settled" => ProviderPaymentState::Confirmed,
            "expired" => ProviderPaymentState::Expired,
            "cancelled" | "failed" => ProviderPaymentState::Failed,
            _ => ProviderPaymentState::Pending,
        }
    }
}

#[async_trait]
impl PaymentProvider for ReferenceProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Reference
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn supports_refunds(&self) -> bool {
        false
    }

    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> PaymentResult<PaymentIntent> {
        request.validate()?;
        let payload = serde_json::json!({
            "merchant_reference": request.reference,
            "amount": request.amount,
            "currency": request.currency,
            "expires_in_minutes": self.config.expiry_minutes,
            "description": request.description,
        });

        let raw: ReferenceData = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/references"),
                self.auth(),
                Some(&payload),
                Some(&request.reference),
            )
            .await?;

        info!(
            reference = %request.reference,
            provider_payment_id = %raw.id,
            "payment reference issued"
        );

        Ok(PaymentIntent {
            provider_payment_id: raw.id,
            state: ProviderPaymentState::Pending,
            checkout_url: None,
            instructions: Some(format!(
                "Pay at any ATM or agent using entity {} and reference {}",
                raw.entity, raw.reference_code
            )),
            expires_at: raw.expires_at,
            provider_data: Some(serde_json::json!({
                "entity": raw.entity,
                "referenceCode": raw.reference_code,
            })),
        })
    }

    async fn confirm_payment(
        &self,
        request: ConfirmPaymentRequest,
    ) -> PaymentResult<PaymentConfirmation> {
        let id = request
            .provider_payment_id
            .filter(|v| !v.trim().is_empty())
            .ok_or(PaymentError::ValidationError {
                message: "provider_payment_id is required to query a reference".to_string(),
                field: Some("provider_payment_id".to_string()),
            })?;

        let raw: ReferenceStatus = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/references/{}", id)),
                self.auth(),
                None,
                None,
            )
            .await?;

        Ok(PaymentConfirmation {
            state: Self::state(&raw.status),
            provider_payment_id: Some(id),
            amount: raw.paid_amount,
            awaiting_webhook: false,
        })
    }

    async fn refund_payment(&self, _request: RefundRequest) -> PaymentResult<RefundResponse> {
        Err(PaymentError::UnsupportedOperation {
            provider: ProviderName::Reference.to_string(),
            operation: "refunds".to_string(),
        })
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> WebhookVerificationResult {
        WebhookVerificationResult::from_check(
            verify_hmac_sha512_hex(payload, &self.config.webhook_secret, signature),
            "invalid reference signature",
        )
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload)
            .map_err(|e| malformed("reference", format!("invalid JSON: {}", e)))?;

        let raw_type =
            json_string(&parsed, "/type").ok_or_else(|| malformed("reference", "missing type"))?;
        let event_type = match raw_type.as_str() {
            "reference.paid" => WebhookEventType::PaymentConfirmed,
            "reference.expired" => WebhookEventType::PaymentExpired,
            "reference.cancelled" => WebhookEventType::PaymentFailed,
            other => return Err(malformed("reference", format!("unsupported event {}", other))),
        };
        let event_id = json_string(&parsed, "/event_id")
            .ok_or_else(|| malformed("reference", "missing event_id"))?;

        Ok(WebhookEvent {
            provider: ProviderName::Reference,
            event_type,
            event_id,
            provider_payment_id: json_string(&parsed, "/payment/id"),
            reference: json_string(&parsed, "/payment/merchant_reference"),
            amount: json_amount(&parsed, "/payment/amount"),
            currency: json_string(&parsed, "/payment/currency"),
            timestamp: json_timestamp(&parsed, "/occurred_at").unwrap_or_else(chrono::Utc::now),
            raw_data: parsed,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ReferenceData {
    id: String,
    entity: String,
    reference_code: String,
    #[serde(default)]
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
struct ReferenceStatus {
    status: String,
    #[serde(default)]
    paid_amount: Option<i64>,
}
