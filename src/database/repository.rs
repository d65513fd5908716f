//! Storage seams. Every state change is a compare-and-set: an update only
//! applies while the stored status is still one of the expected sources,
//! and `Ok(None)` reports that a concurrent writer got there first.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::database::error::DatabaseError;
use crate::models::{
    AuditEntry, Booking, BookingStatus, Escrow, EscrowStatus, IdempotencyRecord,
    NotificationRecord, Payment, PaymentStatus, RateLimitRecord,
};
use crate::payments::types::ProviderName;

pub type DbResult<T> = Result<T, DatabaseError>;

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert(&self, booking: &Booking) -> DbResult<Booking>;

    async fn find_by_id(&self, id: &str) -> DbResult<Option<Booking>>;

    /// Writes `booking` (status, cancellation stamp, timestamps) if the
    /// stored status is one of `expected`.
    async fn update_if_status(
        &self,
        booking: &Booking,
        expected: &[BookingStatus],
    ) -> DbResult<Option<Booking>>;

    /// Atomically adds `amount` to the paid total. A confirmed booking moves
    /// to paid; every other status is left untouched.
    async fn credit_payment(&self, id: &str, amount: i64) -> DbResult<Option<Booking>>;
}

#[async_trait]
pub trait EscrowRepository: Send + Sync {
    /// Fails with a unique violation when the booking already has an escrow.
    async fn insert(&self, escrow: &Escrow) -> DbResult<Escrow>;

    async fn find_by_id(&self, id: &str) -> DbResult<Option<Escrow>>;

    async fn find_by_booking(&self, booking_id: &str) -> DbResult<Option<Escrow>>;

    /// Adds a settled payment to the escrow and marks it funded. Returns
    /// `None` when the escrow no longer accepts funding or already holds
    /// `payment_id`.
    async fn fund(
        &self,
        id: &str,
        payment_id: &str,
        amount: i64,
        at: DateTime<Utc>,
    ) -> DbResult<Option<Escrow>>;

    async fn update_if_status(
        &self,
        escrow: &Escrow,
        expected: &[EscrowStatus],
    ) -> DbResult<Option<Escrow>>;

    /// Escrows whose service was completed at or before `cutoff`.
    async fn list_releasable(&self, cutoff: DateTime<Utc>, limit: i64) -> DbResult<Vec<Escrow>>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert(&self, payment: &Payment) -> DbResult<Payment>;

    async fn find_by_id(&self, id: &str) -> DbResult<Option<Payment>>;

    async fn find_by_reference(&self, reference: &str) -> DbResult<Option<Payment>>;

    async fn find_by_provider_payment_id(
        &self,
        provider: ProviderName,
        provider_payment_id: &str,
    ) -> DbResult<Option<Payment>>;

    async fn list_by_booking(&self, booking_id: &str) -> DbResult<Vec<Payment>>;

    async fn update_if_status(
        &self,
        payment: &Payment,
        expected: &[PaymentStatus],
    ) -> DbResult<Option<Payment>>;
}

#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The key was free (or reclaimable) and now belongs to the caller.
    Claimed(IdempotencyRecord),
    /// A live record already holds the key.
    Existing(IdempotencyRecord),
}

#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    /// Atomically inserts `record`, or replaces an expired or failed one.
    async fn try_claim(&self, record: &IdempotencyRecord, now: DateTime<Utc>)
        -> DbResult<ClaimOutcome>;

    async fn get(&self, key: &str) -> DbResult<Option<IdempotencyRecord>>;

    async fn complete(&self, key: &str, result: Option<JsonValue>, now: DateTime<Utc>)
        -> DbResult<()>;

    async fn fail(&self, key: &str, error: &str, now: DateTime<Utc>) -> DbResult<()>;

    /// Deletes at most `limit` expired records.
    async fn delete_expired(&self, now: DateTime<Utc>, limit: i64) -> DbResult<u64>;
}

#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    /// Atomically counts one request against `key`, opening a fresh window
    /// when the stored one has lapsed.
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> DbResult<RateLimitRecord>;

    async fn delete_expired(&self, now: DateTime<Utc>, limit: i64) -> DbResult<u64>;
}

#[async_trait]
pub trait FeatureFlagRepository: Send + Sync {
    async fn load_all(&self) -> DbResult<HashMap<String, bool>>;

    async fn set(&self, flag: &str, enabled: bool, updated_by: &str) -> DbResult<()>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> DbResult<()>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert(&self, notification: &NotificationRecord) -> DbResult<()>;
}

/// Read-only view of users and supplier ownership.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_role(&self, user_id: &str) -> DbResult<Option<String>>;

    /// Owning user of a supplier profile.
    async fn supplier_owner(&self, supplier_id: &str) -> DbResult<Option<String>>;
}
