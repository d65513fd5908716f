//! Booking entity and its lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::audit::ActorRole;

/// Booking lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Paid,
    InProgress,
    Completed,
    Cancelled,
    Disputed,
    Refunded,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 8] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Paid,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::Disputed,
        BookingStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Paid => "paid",
            BookingStatus::InProgress => "inProgress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Disputed => "disputed",
            BookingStatus::Refunded => "refunded",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "paid" => Some(BookingStatus::Paid),
            "inProgress" | "in_progress" => Some(BookingStatus::InProgress),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "disputed" => Some(BookingStatus::Disputed),
            "refunded" => Some(BookingStatus::Refunded),
            _ => None,
        }
    }

    /// Legal successor states.
    pub fn valid_transitions(&self) -> &'static [BookingStatus] {
        match self {
            BookingStatus::Pending => &[BookingStatus::Confirmed, BookingStatus::Cancelled],
            BookingStatus::Confirmed => &[BookingStatus::Paid, BookingStatus::Cancelled],
            BookingStatus::Paid => &[
                BookingStatus::InProgress,
                BookingStatus::Completed,
                BookingStatus::Cancelled,
                BookingStatus::Disputed,
            ],
            BookingStatus::InProgress => &[BookingStatus::Completed, BookingStatus::Disputed],
            BookingStatus::Disputed => &[BookingStatus::Refunded, BookingStatus::Completed],
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, target: BookingStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Refunded
        )
    }

    /// Cancellation is allowed from every non-terminal state. `Cancelled`
    /// itself is handled by callers as an idempotent no-op.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fields stamped onto a booking when it is cancelled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CancellationStamp {
    pub cancelled_at: DateTime<Utc>,
    pub cancelled_by: String,
    pub cancelled_by_role: ActorRole,
    pub cancellation_reason: Option<String>,
}

/// A client's reservation of a supplier's package for an event.
///
/// Amounts are integer minor units. `paid_amount` only ever grows; refunds
/// are tracked on the escrow and payment records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub client_id: String,
    pub supplier_id: String,
    pub package_id: String,
    pub status: BookingStatus,
    pub total_price: i64,
    pub paid_amount: i64,
    pub currency: String,
    pub event_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub cancelled_by_role: Option<ActorRole>,
    pub cancellation_reason: Option<String>,
}

impl Booking {
    pub fn new(
        client_id: impl Into<String>,
        supplier_id: impl Into<String>,
        package_id: impl Into<String>,
        total_price: i64,
        currency: impl Into<String>,
        event_date: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: super::new_id(),
            client_id: client_id.into(),
            supplier_id: supplier_id.into(),
            package_id: package_id.into(),
            status: BookingStatus::Pending,
            total_price,
            paid_amount: 0,
            currency: currency.into(),
            event_date,
            created_at: now,
            updated_at: now,
            cancelled_at: None,
            cancelled_by: None,
            cancelled_by_role: None,
            cancellation_reason: None,
        }
    }

    pub fn outstanding_amount(&self) -> i64 {
        (self.total_price - self.paid_amount).max(0)
    }

    pub fn apply_cancellation(&mut self, stamp: &CancellationStamp) {
        self.status = BookingStatus::Cancelled;
        self.cancelled_at = Some(stamp.cancelled_at);
        self.cancelled_by = Some(stamp.cancelled_by.clone());
        self.cancelled_by_role = Some(stamp.cancelled_by_role);
        self.cancellation_reason = stamp.cancellation_reason.clone();
        self.updated_at = stamp.cancelled_at;
    }

    /// Credits a confirmed payment. The status moves to `paid` only when the
    /// booking is in a state that may legally become paid.
    pub fn apply_payment(&mut self, amount: i64) {
        self.paid_amount += amount;
        if self.status == BookingStatus::Confirmed {
            self.status = BookingStatus::Paid;
        }
        self.updated_at = Utc::now();
    }
}
