//! Mobile-money collections. The payer approves a push prompt on their
//! phone; settlement is only ever reported through webhooks.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::{env_or, malformed, required_env};
use crate::payments::types::{
    ConfirmPaymentRequest, PaymentConfirmation, PaymentIntent, PaymentIntentRequest,
    ProviderName, ProviderPaymentState, RefundRequest, RefundResponse, RefundState, WebhookEvent,
    WebhookEventType, WebhookVerificationResult,
};
use crate::payments::utils::{
    json_amount, json_string, json_timestamp, verify_hmac_sha256_base64, PaymentHttpClient,
    RequestAuth,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

pub const SIGNATURE_HEADER: &str = "x-signature";

#[derive(Debug, Clone)]
pub struct MobileMoneyConfig {
    pub api_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl MobileMoneyConfig {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            api_key: required_env("MOBILE_MONEY_API_KEY")?,
            webhook_secret: required_env("MOBILE_MONEY_WEBHOOK_SECRET")?,
            base_url: std::env::var("MOBILE_MONEY_BASE_URL")
                .unwrap_or_else(|_| "https://api.mobilemoney.example.com/v1".to_string()),
            timeout_secs: env_or("MOBILE_MONEY_TIMEOUT_SECS", 30),
            max_retries: env_or("MOBILE_MONEY_MAX_RETRIES", 3),
        })
    }
}

pub struct MobileMoneyProvider {
    config: MobileMoneyConfig,
    http: PaymentHttpClient,
}

impl MobileMoneyProvider {
    pub fn new(config: MobileMoneyConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "mobile_money",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(MobileMoneyConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn event_type(raw: &str) -> Option<WebhookEventType> {
        match raw {
            "collection.succeeded" => Some(WebhookEventType::PaymentConfirmed),
            "collection.failed" => Some(WebhookEventType::PaymentFailed),
            "collection.expired" => Some(WebhookEventType::PaymentExpired),
            "refund.succeeded" => Some(WebhookEventType::RefundSucceeded),
            "refund.failed" => Some(WebhookEventType::RefundFailed),
            _ => None,
        }
    }
}

#[async_trait]
impl PaymentProvider for MobileMoneyProvider {
    fn name(&self) -> ProviderName {
        ProviderName::MobileMoney
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
        let phone = request
            .customer
            .phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(PaymentError::ValidationError {
                message: "customer.phone is required for mobile money".to_string(),
                field: Some("customer.phone".to_string()),
            })?;

        let payload = serde_json::json!({
            "reference": request.reference,
            "amount": request.amount,
            "currency": request.currency,
            "phone": phone,
            "description": request.description,
        });

        let raw: CollectionEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/collections"),
                RequestAuth::Bearer(&self.config.api_key),
                Some(&payload),
                Some(&request.reference),
            )
            .await?;

        info!(
            reference = %request.reference,
            provider_payment_id = %raw.data.id,
            "mobile money collection requested"
        );

        Ok(PaymentIntent {
            provider_payment_id: raw.data.id,
            state: ProviderPaymentState::Pending,
            checkout_url: None,
            instructions: Some("Approve the payment prompt sent to your phone".to_string()),
            expires_at: raw.data.expires_at,
            provider_data: Some(serde_json::json!({ "status": raw.data.status })),
        })
    }

    async fn confirm_payment(
        &self,
        _request: ConfirmPaymentRequest,
    ) -> PaymentResult<PaymentConfirmation> {
        Ok(PaymentConfirmation::awaiting_webhook())
    }

    async fn refund_payment(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        let payload = serde_json::json!({
            "amount": request.amount,
            "currency": request.currency,
            "reason": request.reason,
        });
        let raw: RefundEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/collections/{}/refunds", request.provider_payment_id)),
                RequestAuth::Bearer(&self.config.api_key),
                Some(&payload),
                Some(&request.idempotency_key),
            )
            .await?;

        let state = match raw.data.status.as_str() {
            "succeeded" | "completed" => RefundState::Succeeded,
            "pending" | "processing" => RefundState::Pending,
            other => {
                return Err(PaymentError::provider(
                    "mobile_money",
                    format!("refund rejected with status {}", other),
                    false,
                ))
            }
        };

        Ok(RefundResponse {
            provider_refund_id: raw.data.id,
            state,
        })
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> WebhookVerificationResult {
        WebhookVerificationResult::from_check(
            verify_hmac_sha256_base64(payload, &self.config.webhook_secret, signature),
            "invalid mobile money signature",
        )
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload)
            .map_err(|e| malformed("mobile_money", format!("invalid JSON: {}", e)))?;

        let raw_type = json_string(&parsed, "/event")
            .ok_or_else(|| malformed("mobile_money", "missing event"))?;
        let event_type = Self::event_type(&raw_type)
            .ok_or_else(|| malformed("mobile_money", format!("unsupported event {}", raw_type)))?;
        let event_id =
            json_string(&parsed, "/id").ok_or_else(|| malformed("mobile_money", "missing id"))?;

        Ok(WebhookEvent {
            provider: ProviderName::MobileMoney,
            event_type,
            event_id,
            provider_payment_id: json_string(&parsed, "/data/id"),
            reference: json_string(&parsed, "/data/reference"),
            amount: json_amount(&parsed, "/data/amount"),
            currency: json_string(&parsed, "/data/currency"),
            timestamp: json_timestamp(&parsed, "/created_at").unwrap_or_else(chrono::Utc::now),
            raw_data: parsed,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CollectionEnvelope {
    data: CollectionData,
}

#[derive(Debug, Deserialize)]
struct CollectionData {
    id: String,
    status: String,
    #[serde(default)]
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
struct RefundEnvelope {
    data: RefundData,
}

#[derive(Debug, Deserialize)]
struct RefundData {
    id: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::utils::hmac_sha256_base64;

    fn provider() -> MobileMoneyProvider {
        MobileMoneyProvider::new(MobileMoneyConfig {
            api_key: "mm_test".to_string(),
            webhook_secret: "whsec_mm".to_string(),
            base_url: "https://api.mobilemoney.example.com/v1".to_string(),
            timeout_secs: 5,
            max_retries: 1,
        })
        .expect("provider init should succeed")
    }

    #[test]
    fn webhook_signature_validation() {
        let provider = provider();
        let payload = br#"{"id":"evt_1","event":"collection.succeeded"}"#;
        let signature = hmac_sha256_base64(payload, "whsec_mm").expect("hmac");
        assert!(provider.verify_webhook(payload, &signature).valid);

        let result = provider.verify_webhook(payload, "invalid_signature");
        assert!(!result.valid);
        assert!(result.reason.is_some());
    }

    #[test]
    fn parses_collection_success() {
        let payload = br#"{
            "id": "evt_1",
            "event": "collection.succeeded",
            "created_at": "2026-05-01T10:00:00Z",
            "data": {"id": "mm_123", "reference": "PAY-ABCDEF123456", "amount": 150000, "currency": "XAF"}
        }"#;
        let event = provider()
            .parse_webhook_event(payload)
            .expect("event should parse");
        assert_eq!(event.event_type, WebhookEventType::PaymentConfirmed);
        assert_eq!(event.provider_payment_id.as_deref(), Some("mm_123"));
        assert_eq!(event.reference.as_deref(), Some("PAY-ABCDEF123456"));
        assert_eq!(event.amount, Some(150000));
    }

    #[test]
    fn rejects_unknown_events() {
        let payload = br#"{"id":"evt_2","event":"account.updated","data":{}}"#;
        assert!(provider().parse_webhook_event(payload).is_err());
        assert!(provider().parse_webhook_event(b"not json").is_err());
    }

    #[tokio::test]
    async fn confirmation_waits_for_webhook() {
        let confirmation = provider()
            .confirm_payment(ConfirmPaymentRequest {
                reference: "PAY-1".to_string(),
                provider_payment_id: Some("mm_1".to_string()),
            })
            .await
            .expect("confirmation should succeed");
        assert!(confirmation.awaiting_webhook);
        assert_eq!(confirmation.state, ProviderPaymentState::Pending);
    }
}
