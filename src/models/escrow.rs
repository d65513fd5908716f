//! Escrow entity: funds held for exactly one booking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    Funded,
    ServiceCompleted,
    Disputed,
    Refunded,
    Released,
}

impl EscrowStatus {
    pub const REFUNDABLE: [EscrowStatus; 3] = [
        EscrowStatus::Funded,
        EscrowStatus::ServiceCompleted,
        EscrowStatus::Disputed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Pending => "pending",
            EscrowStatus::Funded => "funded",
            EscrowStatus::ServiceCompleted => "service_completed",
            EscrowStatus::Disputed => "disputed",
            EscrowStatus::Refunded => "refunded",
            EscrowStatus::Released => "released",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(EscrowStatus::Pending),
            "funded" => Some(EscrowStatus::Funded),
            "service_completed" => Some(EscrowStatus::ServiceCompleted),
            "disputed" => Some(EscrowStatus::Disputed),
            "refunded" => Some(EscrowStatus::Refunded),
            "released" => Some(EscrowStatus::Released),
            _ => None,
        }
    }

    pub fn valid_transitions(&self) -> &'static [EscrowStatus] {
        match self {
            EscrowStatus::Pending => &[EscrowStatus::Funded],
            EscrowStatus::Funded => &[EscrowStatus::ServiceCompleted, EscrowStatus::Refunded],
            EscrowStatus::ServiceCompleted => &[
                EscrowStatus::Released,
                EscrowStatus::Disputed,
                EscrowStatus::Refunded,
            ],
            EscrowStatus::Disputed => &[EscrowStatus::Refunded, EscrowStatus::Released],
            EscrowStatus::Refunded | EscrowStatus::Released => &[],
        }
    }

    pub fn can_transition_to(&self, target: EscrowStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_refundable(&self) -> bool {
        Self::REFUNDABLE.contains(self)
    }

    /// States that accept a funding (initial or top-up).
    pub fn accepts_funding(&self) -> bool {
        matches!(self, EscrowStatus::Pending | EscrowStatus::Funded)
    }

    /// Every state from which `target` is reachable in one step.
    pub fn sources_of(target: EscrowStatus) -> Vec<EscrowStatus> {
        [
            EscrowStatus::Pending,
            EscrowStatus::Funded,
            EscrowStatus::ServiceCompleted,
            EscrowStatus::Disputed,
            EscrowStatus::Refunded,
            EscrowStatus::Released,
        ]
        .into_iter()
        .filter(|s| s.can_transition_to(target))
        .collect()
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Escrow {
    pub id: String,
    pub booking_id: String,
    pub status: EscrowStatus,
    /// Expected amount when the escrow was opened.
    pub amount: i64,
    /// Sum of the settled amounts of every payment in `payment_ids`.
    pub funded_amount: i64,
    pub currency: String,
    pub payment_ids: Vec<String>,
    pub funded_at: Option<DateTime<Utc>>,
    pub service_completed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_actor: Option<String>,
    pub refund_reason: Option<String>,
    pub release_actor: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Escrow {
    pub fn new(booking_id: impl Into<String>, amount: i64, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: super::new_id(),
            booking_id: booking_id.into(),
            status: EscrowStatus::Pending,
            amount,
            funded_amount: 0,
            currency: currency.into(),
            payment_ids: Vec::new(),
            funded_at: None,
            service_completed_at: None,
            released_at: None,
            refunded_at: None,
            refund_actor: None,
            refund_reason: None,
            release_actor: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_payment(&self, payment_id: &str) -> bool {
        self.payment_ids.iter().any(|p| p == payment_id)
    }
}
