//! In-process store used when Postgres is skipped and by the test suites.
//! Each table sits behind its own lock, so every compare-and-set below is
//! atomic with respect to other callers of the same store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{
    AuditRepository, BookingRepository, ClaimOutcome, DbResult, EscrowRepository,
    FeatureFlagRepository, IdempotencyRepository, NotificationRepository, PaymentRepository,
    RateLimitRepository, UserDirectory,
};
use crate::models::{
    AuditEntry, Booking, BookingStatus, Escrow, EscrowStatus, IdempotencyRecord,
    IdempotencyStatus, NotificationRecord, Payment, PaymentStatus, RateLimitRecord,
};
use crate::payments::types::ProviderName;

#[derive(Default)]
pub struct InMemoryStore {
    bookings: RwLock<HashMap<String, Booking>>,
    escrows: RwLock<HashMap<String, Escrow>>,
    payments: RwLock<HashMap<String, Payment>>,
    idempotency: RwLock<HashMap<String, IdempotencyRecord>>,
    rate_limits: RwLock<HashMap<String, RateLimitRecord>>,
    feature_flags: RwLock<HashMap<String, bool>>,
    audit_log: RwLock<Vec<AuditEntry>>,
    notifications: RwLock<Vec<NotificationRecord>>,
    user_roles: RwLock<HashMap<String, String>>,
    supplier_owners: RwLock<HashMap<String, String>>,
}

fn read<'a, T>(lock: &'a RwLock<T>, resource: &str) -> DbResult<RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|_| DatabaseError::lock_poisoned(resource))
}

fn write<'a, T>(lock: &'a RwLock<T>, resource: &str) -> DbResult<RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|_| DatabaseError::lock_poisoned(resource))
}

fn duplicate(entity: &str, id: &str) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::UniqueViolation {
        message: format!("{} {} already exists", entity, id),
    })
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_user(&self, user_id: &str, role: &str) -> DbResult<()> {
        write(&self.user_roles, "users")?.insert(user_id.to_string(), role.to_string());
        Ok(())
    }

    pub fn seed_supplier(&self, supplier_id: &str, owner_user_id: &str) -> DbResult<()> {
        write(&self.supplier_owners, "suppliers")?
            .insert(supplier_id.to_string(), owner_user_id.to_string());
        Ok(())
    }

    pub fn audit_entries(&self) -> DbResult<Vec<AuditEntry>> {
        Ok(read(&self.audit_log, "audit_logs")?.clone())
    }

    pub fn notifications(&self) -> DbResult<Vec<NotificationRecord>> {
        Ok(read(&self.notifications, "notifications")?.clone())
    }

    pub fn idempotency_record(&self, key: &str) -> DbResult<Option<IdempotencyRecord>> {
        Ok(read(&self.idempotency, "idempotency_keys")?.get(key).cloned())
    }

    pub fn rate_limit_record(&self, key: &str) -> DbResult<Option<RateLimitRecord>> {
        Ok(read(&self.rate_limits, "rate_limits")?.get(key).cloned())
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn insert(&self, booking: &Booking) -> DbResult<Booking> {
        let mut bookings = write(&self.bookings, "bookings")?;
        if bookings.contains_key(&booking.id) {
            return Err(duplicate("booking", &booking.id));
        }
        bookings.insert(booking.id.clone(), booking.clone());
        Ok(booking.clone())
    }

    async fn find_by_id(&self, id: &str) -> DbResult<Option<Booking>> {
        Ok(read(&self.bookings, "bookings")?.get(id).cloned())
    }

    async fn update_if_status(
        &self,
        booking: &Booking,
        expected: &[BookingStatus],
    ) -> DbResult<Option<Booking>> {
        let mut bookings = write(&self.bookings, "bookings")?;
        let stored = bookings
            .get_mut(&booking.id)
            .ok_or_else(|| DatabaseError::not_found("booking", &booking.id))?;
        if !expected.contains(&stored.status) {
            return Ok(None);
        }
        // Paid total is owned by credit_payment.
        let paid_amount = stored.paid_amount;
        *stored = booking.clone();
        stored.paid_amount = paid_amount;
        Ok(Some(stored.clone()))
    }

    async fn credit_payment(&self, id: &str, amount: i64) -> DbResult<Option<Booking>> {
        let mut bookings = write(&self.bookings, "bookings")?;
        Ok(bookings.get_mut(id).map(|stored| {
            stored.apply_payment(amount);
            stored.clone()
        }))
    }
}

#[async_trait]
impl EscrowRepository for InMemoryStore {
    async fn insert(&self, escrow: &Escrow) -> DbResult<Escrow> {
        let mut escrows = write(&self.escrows, "escrows")?;
        if escrows
            .values()
            .any(|e| e.id == escrow.id || e.booking_id == escrow.booking_id)
        {
            return Err(duplicate("escrow for booking", &escrow.booking_id));
        }
        escrows.insert(escrow.id.clone(), escrow.clone());
        Ok(escrow.clone())
    }

    async fn find_by_id(&self, id: &str) -> DbResult<Option<Escrow>> {
        Ok(read(&self.escrows, "escrows")?.get(id).cloned())
    }

    async fn find_by_booking(&self, booking_id: &str) -> DbResult<Option<Escrow>> {
        Ok(read(&self.escrows, "escrows")?
            .values()
            .find(|e| e.booking_id == booking_id)
            .cloned())
    }

    async fn fund(
        &self,
        id: &str,
        payment_id: &str,
        amount: i64,
        at: DateTime<Utc>,
    ) -> DbResult<Option<Escrow>> {
        let mut escrows = write(&self.escrows, "escrows")?;
        let stored = escrows
            .get_mut(id)
            .ok_or_else(|| DatabaseError::not_found("escrow", id))?;
        if !stored.status.accepts_funding() || stored.has_payment(payment_id) {
            return Ok(None);
        }
        stored.funded_amount += amount;
        stored.payment_ids.push(payment_id.to_string());
        stored.status = EscrowStatus::Funded;
        stored.funded_at.get_or_insert(at);
        stored.updated_at = at;
        Ok(Some(stored.clone()))
    }

    async fn update_if_status(
        &self,
        escrow: &Escrow,
        expected: &[EscrowStatus],
    ) -> DbResult<Option<Escrow>> {
        let mut escrows = write(&self.escrows, "escrows")?;
        let stored = escrows
            .get_mut(&escrow.id)
            .ok_or_else(|| DatabaseError::not_found("escrow", &escrow.id))?;
        if !expected.contains(&stored.status) {
            return Ok(None);
        }
        // Funding columns are owned by fund().
        let (funded_amount, payment_ids, funded_at) = (
            stored.funded_amount,
            stored.payment_ids.clone(),
            stored.funded_at,
        );
        *stored = escrow.clone();
        stored.funded_amount = funded_amount;
        stored.payment_ids = payment_ids;
        stored.funded_at = funded_at;
        Ok(Some(stored.clone()))
    }

    async fn list_releasable(&self, cutoff: DateTime<Utc>, limit: i64) -> DbResult<Vec<Escrow>> {
        let escrows = read(&self.escrows, "escrows")?;
        let mut due: Vec<Escrow> = escrows
            .values()
            .filter(|e| {
                e.status == EscrowStatus::ServiceCompleted
                    && e.service_completed_at.is_some_and(|at| at <= cutoff)
            })
            .cloned()
            .collect();
        due.sort_by_key(|e| e.service_completed_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn insert(&self, payment: &Payment) -> DbResult<Payment> {
        let mut payments = write(&self.payments, "payments")?;
        if payments
            .values()
            .any(|p| p.id == payment.id || p.reference == payment.reference)
        {
            return Err(duplicate("payment", &payment.reference));
        }
        payments.insert(payment.id.clone(), payment.clone());
        Ok(payment.clone())
    }

    async fn find_by_id(&self, id: &str) -> DbResult<Option<Payment>> {
        Ok(read(&self.payments, "payments")?.get(id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> DbResult<Option<Payment>> {
        Ok(read(&self.payments, "payments")?
            .values()
            .find(|p| p.reference == reference)
            .cloned())
    }

    async fn find_by_provider_payment_id(
        &self,
        provider: ProviderName,
        provider_payment_id: &str,
    ) -> DbResult<Option<Payment>> {
        Ok(read(&self.payments, "payments")?
            .values()
            .find(|p| {
                p.provider == provider
                    && p.provider_payment_id.as_deref() == Some(provider_payment_id)
            })
            .cloned())
    }

    async fn list_by_booking(&self, booking_id: &str) -> DbResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = read(&self.payments, "payments")?
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn update_if_status(
        &self,
        payment: &Payment,
        expected: &[PaymentStatus],
    ) -> DbResult<Option<Payment>> {
        let mut payments = write(&self.payments, "payments")?;
        let stored = payments
            .get_mut(&payment.id)
            .ok_or_else(|| DatabaseError::not_found("payment", &payment.id))?;
        if !expected.contains(&stored.status) {
            return Ok(None);
        }
        *stored = payment.clone();
        Ok(Some(stored.clone()))
    }
}

#[async_trait]
impl IdempotencyRepository for InMemoryStore {
    async fn try_claim(
        &self,
        record: &IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> DbResult<ClaimOutcome> {
        let mut records = write(&self.idempotency, "idempotency_keys")?;
        if let Some(existing) = records.get(&record.key) {
            if !existing.is_reclaimable(now) {
                return Ok(ClaimOutcome::Existing(existing.clone()));
            }
        }
        records.insert(record.key.clone(), record.clone());
        Ok(ClaimOutcome::Claimed(record.clone()))
    }

    async fn get(&self, key: &str) -> DbResult<Option<IdempotencyRecord>> {
        Ok(read(&self.idempotency, "idempotency_keys")?.get(key).cloned())
    }

    async fn complete(
        &self,
        key: &str,
        result: Option<JsonValue>,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let mut records = write(&self.idempotency, "idempotency_keys")?;
        let record = records
            .get_mut(key)
            .ok_or_else(|| DatabaseError::not_found("idempotency key", key))?;
        record.status = IdempotencyStatus::Completed;
        record.result = result;
        record.error = None;
        record.updated_at = now;
        Ok(())
    }

    async fn fail(&self, key: &str, error: &str, now: DateTime<Utc>) -> DbResult<()> {
        let mut records = write(&self.idempotency, "idempotency_keys")?;
        let record = records
            .get_mut(key)
            .ok_or_else(|| DatabaseError::not_found("idempotency key", key))?;
        record.status = IdempotencyStatus::Failed;
        record.error = Some(error.to_string());
        record.updated_at = now;
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>, limit: i64) -> DbResult<u64> {
        let mut records = write(&self.idempotency, "idempotency_keys")?;
        let expired: Vec<String> = records
            .values()
            .filter(|r| r.is_expired(now))
            .take(limit.max(0) as usize)
            .map(|r| r.key.clone())
            .collect();
        for key in &expired {
            records.remove(key);
        }
        Ok(expired.len() as u64)
    }
}

#[async_trait]
impl RateLimitRepository for InMemoryStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> DbResult<RateLimitRecord> {
        let mut records = write(&self.rate_limits, "rate_limits")?;
        let record = records
            .entry(key.to_string())
            .or_insert_with(|| RateLimitRecord::fresh(now, window));
        record.advance(now, window);
        Ok(record.clone())
    }

    async fn delete_expired(&self, now: DateTime<Utc>, limit: i64) -> DbResult<u64> {
        let mut records = write(&self.rate_limits, "rate_limits")?;
        let expired: Vec<String> = records
            .iter()
            .filter(|(_, r)| r.expires_at <= now)
            .take(limit.max(0) as usize)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            records.remove(key);
        }
        Ok(expired.len() as u64)
    }
}

#[async_trait]
impl FeatureFlagRepository for InMemoryStore {
    async fn load_all(&self) -> DbResult<HashMap<String, bool>> {
        Ok(read(&self.feature_flags, "feature_flags")?.clone())
    }

    async fn set(&self, flag: &str, enabled: bool, _updated_by: &str) -> DbResult<()> {
        write(&self.feature_flags, "feature_flags")?.insert(flag.to_string(), enabled);
        Ok(())
    }
}

#[async_trait]
impl AuditRepository for InMemoryStore {
    async fn record(&self, entry: &AuditEntry) -> DbResult<()> {
        write(&self.audit_log, "audit_logs")?.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl NotificationRepository for InMemoryStore {
    async fn insert(&self, notification: &NotificationRecord) -> DbResult<()> {
        write(&self.notifications, "notifications")?.push(notification.clone());
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn user_role(&self, user_id: &str) -> DbResult<Option<String>> {
        Ok(read(&self.user_roles, "users")?.get(user_id).cloned())
    }

    async fn supplier_owner(&self, supplier_id: &str) -> DbResult<Option<String>> {
        Ok(read(&self.supplier_owners, "suppliers")?
            .get(supplier_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking() -> Booking {
        Booking::new("client-1", "supplier-1", "pkg-1", 100_000, "XAF", Utc::now())
    }

    #[tokio::test]
    async fn booking_cas_rejects_stale_status() {
        let store = InMemoryStore::new();
        let mut b = BookingRepository::insert(&store, &booking()).await.unwrap();
        b.status = BookingStatus::Confirmed;

        let applied = BookingRepository::update_if_status(&store, &b, &[BookingStatus::Pending])
            .await
            .unwrap();
        assert_eq!(applied.map(|b| b.status), Some(BookingStatus::Confirmed));

        let lost = BookingRepository::update_if_status(&store, &b, &[BookingStatus::Pending])
            .await
            .unwrap();
        assert!(lost.is_none());
    }

    #[tokio::test]
    async fn escrow_funding_is_once_per_payment() {
        let store = InMemoryStore::new();
        let escrow = EscrowRepository::insert(&store, &Escrow::new("b1", 5000, "EUR"))
            .await
            .unwrap();
        let now = Utc::now();

        let first = store.fund(&escrow.id, "p1", 5000, now).await.unwrap();
        assert_eq!(first.map(|e| e.funded_amount), Some(5000));

        let replay = store.fund(&escrow.id, "p1", 5000, now).await.unwrap();
        assert!(replay.is_none());

        let top_up = store.fund(&escrow.id, "p2", 1000, now).await.unwrap().unwrap();
        assert_eq!(top_up.funded_amount, 6000);
        assert_eq!(top_up.payment_ids, vec!["p1".to_string(), "p2".to_string()]);
    }

    #[tokio::test]
    async fn second_escrow_for_booking_is_rejected() {
        let store = InMemoryStore::new();
        EscrowRepository::insert(&store, &Escrow::new("b1", 5000, "EUR"))
            .await
            .unwrap();
        let err = EscrowRepository::insert(&store, &Escrow::new("b1", 5000, "EUR"))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn idempotency_claim_reclaims_failed_records() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let record = IdempotencyRecord::processing("k1", "op", now, Duration::hours(1));

        assert!(matches!(
            store.try_claim(&record, now).await.unwrap(),
            ClaimOutcome::Claimed(_)
        ));
        assert!(matches!(
            store.try_claim(&record, now).await.unwrap(),
            ClaimOutcome::Existing(_)
        ));

        store.fail("k1", "boom", now).await.unwrap();
        assert!(matches!(
            store.try_claim(&record, now).await.unwrap(),
            ClaimOutcome::Claimed(_)
        ));
    }

    #[tokio::test]
    async fn expired_records_are_purged_in_batches() {
        let store = InMemoryStore::new();
        let past = Utc::now() - Duration::hours(2);
        for i in 0..3 {
            let record =
                IdempotencyRecord::processing(&format!("k{i}"), "op", past, Duration::hours(1));
            store.try_claim(&record, past).await.unwrap();
        }
        let deleted = IdempotencyRepository::delete_expired(&store, Utc::now(), 2)
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        let deleted = IdempotencyRepository::delete_expired(&store, Utc::now(), 2)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
    }
}
