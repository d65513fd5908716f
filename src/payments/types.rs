use crate::payments::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    /// Mobile-money push to the payer's phone
    MobileMoney,
    /// ATM / agent payment against a reference code
    Reference,
    /// Hosted card checkout session
    HostedCheckout,
}

impl ProviderName {
    pub const ALL: [ProviderName; 3] = [
        ProviderName::MobileMoney,
        ProviderName::Reference,
        ProviderName::HostedCheckout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::MobileMoney => "mobile_money",
            ProviderName::Reference => "reference",
            ProviderName::HostedCheckout => "hosted_checkout",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "mobile_money" | "momo" => Ok(ProviderName::MobileMoney),
            "reference" | "atm" => Ok(ProviderName::Reference),
            "hosted_checkout" | "checkout" | "card" => Ok(ProviderName::HostedCheckout),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// Normalized webhook event types shared by every provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WebhookEventType {
    #[serde(rename = "payment.confirmed")]
    PaymentConfirmed,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    #[serde(rename = "payment.expired")]
    PaymentExpired,
    #[serde(rename = "refund.succeeded")]
    RefundSucceeded,
    #[serde(rename = "refund.failed")]
    RefundFailed,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventType::PaymentConfirmed => "payment.confirmed",
            WebhookEventType::PaymentFailed => "payment.failed",
            WebhookEventType::PaymentExpired => "payment.expired",
            WebhookEventType::RefundSucceeded => "refund.succeeded",
            WebhookEventType::RefundFailed => "refund.failed",
        }
    }
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CustomerContact {
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntentRequest {
    /// Internal payment reference; providers echo it back in webhooks.
    pub reference: String,
    pub booking_id: String,
    pub amount: i64,
    pub currency: String,
    pub customer: CustomerContact,
    pub return_url: Option<String>,
    pub description: Option<String>,
}

impl PaymentIntentRequest {
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.amount <= 0 {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }
}

/// Provider-side view of a payment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderPaymentState {
    Pending,
    Confirmed,
    Failed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub provider_payment_id: String,
    pub state: ProviderPaymentState,
    /// Where the payer completes a hosted checkout
    pub checkout_url: Option<String>,
    /// Human instructions, e.g. the reference code to enter at an ATM
    pub instructions: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub provider_data: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub reference: String,
    pub provider_payment_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub state: ProviderPaymentState,
    pub provider_payment_id: Option<String>,
    pub amount: Option<i64>,
    /// True for rails that only settle through webhooks
    pub awaiting_webhook: bool,
}

impl PaymentConfirmation {
    pub fn awaiting_webhook() -> Self {
        Self {
            state: ProviderPaymentState::Pending,
            provider_payment_id: None,
            amount: None,
            awaiting_webhook: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub reference: String,
    pub provider_payment_id: String,
    pub amount: i64,
    pub currency: String,
    pub reason: Option<String>,
    /// Forwarded to providers that support request deduplication
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundState {
    Pending,
    Succeeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    pub provider_refund_id: String,
    pub state: RefundState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

impl WebhookVerificationResult {
    pub fn from_check(valid: bool, failure: &str) -> Self {
        Self {
            valid,
            reason: if valid { None } else { Some(failure.to_string()) },
        }
    }
}

/// Provider webhook normalized into the shape the ledger understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub provider: ProviderName,
    #[serde(rename = "type")]
    pub event_type: WebhookEventType,
    pub event_id: String,
    pub provider_payment_id: Option<String>,
    pub reference: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub raw_data: JsonValue,
    pub timestamp: DateTime<Utc>,
}

impl WebhookEvent {
    /// Deduplication key for this delivery.
    pub fn idempotency_key(&self) -> String {
        format!(
            "webhook:{}:{}:{}",
            self.provider, self.event_type, self.event_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_name_parsing_accepts_aliases() {
        assert_eq!(ProviderName::from_str("momo").unwrap(), ProviderName::MobileMoney);
        assert_eq!(ProviderName::from_str("hosted-checkout").unwrap(), ProviderName::HostedCheckout);
        assert_eq!(ProviderName::from_str(" ATM ").unwrap(), ProviderName::Reference);
        assert!(ProviderName::from_str("paypal").is_err());
    }

    #[test]
    fn webhook_event_serializes_normalized_type() {
        let event = WebhookEvent {
            provider: ProviderName::MobileMoney,
            event_type: WebhookEventType::PaymentConfirmed,
            event_id: "evt-1".to_string(),
            provider_payment_id: Some("mm_1".to_string()),
            reference: Some("PAY-1".to_string()),
            amount: Some(150000),
            currency: Some("XAF".to_string()),
            raw_data: serde_json::json!({}),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).expect("serialization should succeed");
        assert_eq!(json["type"], "payment.confirmed");
        assert_eq!(json["eventId"], "evt-1");
        assert_eq!(
            event.idempotency_key(),
            "webhook:mobile_money:payment.confirmed:evt-1"
        );
    }

    #[test]
    fn intent_request_rejects_non_positive_amount() {
        let request = PaymentIntentRequest {
            reference: "PAY-1".to_string(),
            booking_id: "b1".to_string(),
            amount: 0,
            currency: "XAF".to_string(),
            customer: CustomerContact::default(),
            return_url: None,
            description: None,
        };
        assert!(request.validate().is_err());
    }
}
