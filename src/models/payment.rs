//! Payment attempt / settlement record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::payments::types::ProviderName;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Failed,
    Expired,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(PaymentStatus::Pending),
            "confirmed" => Some(PaymentStatus::Confirmed),
            "failed" => Some(PaymentStatus::Failed),
            "expired" => Some(PaymentStatus::Expired),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    /// States a payment may be confirmed from. A failed push can still be
    /// settled late by the provider.
    pub fn confirmable(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Failed)
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Confirmed | PaymentStatus::Refunded | PaymentStatus::Expired
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    /// Internal unique reference handed to the provider.
    pub reference: String,
    pub provider: ProviderName,
    /// Provider-assigned id, known once the intent has been created.
    pub provider_payment_id: Option<String>,
    pub booking_id: String,
    pub payer_id: String,
    pub status: PaymentStatus,
    pub amount: i64,
    /// Amount reported by the provider at confirmation.
    pub settled_amount: Option<i64>,
    pub refunded_amount: Option<i64>,
    pub currency: String,
    pub metadata: JsonValue,
    pub failure_reason: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        booking_id: impl Into<String>,
        payer_id: impl Into<String>,
        provider: ProviderName,
        amount: i64,
        currency: impl Into<String>,
        escrow_id: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: super::new_id(),
            reference: Self::generate_reference(),
            provider,
            provider_payment_id: None,
            booking_id: booking_id.into(),
            payer_id: payer_id.into(),
            status: PaymentStatus::Pending,
            amount,
            settled_amount: None,
            refunded_amount: None,
            currency: currency.into(),
            metadata: serde_json::json!({ "escrowId": escrow_id }),
            failure_reason: None,
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn generate_reference() -> String {
        let raw = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
        format!("PAY-{}", &raw[..12])
    }

    pub fn escrow_id(&self) -> Option<&str> {
        self.metadata.get("escrowId").and_then(|v| v.as_str())
    }

    /// Amount credited to the booking and escrow for this payment.
    pub fn credited_amount(&self) -> i64 {
        self.settled_amount.unwrap_or(self.amount)
    }
}
