//! Escrow ledger: funds held per booking until release or refund.
//!
//! Status moves one way along `pending → funded → {service_completed |
//! refunded}`, `service_completed → {released | disputed | refunded}`,
//! `disputed → {refunded | released}`. Every move is a compare-and-set
//! against the status the ledger just read, so no transition applies twice.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database::repository::{EscrowRepository, PaymentRepository};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError};
use crate::models::{Escrow, EscrowStatus, Payment, PaymentStatus};
use crate::payments::types::{RefundRequest, RefundResponse, RefundState};
use crate::payments::PaymentProviderRegistry;
use crate::services::idempotency::{Idempotent, IdempotencyService};

#[derive(Debug, Clone, PartialEq)]
pub enum FundOutcome {
    Funded(Escrow),
    /// The payment was already counted; nothing changed.
    AlreadyFunded(Escrow),
    /// The escrow had moved past funding (refunded, released); the payment
    /// was sent back to the payer instead of being counted.
    ReturnedToPayer(Escrow),
}

impl FundOutcome {
    pub fn escrow(&self) -> &Escrow {
        match self {
            FundOutcome::Funded(escrow)
            | FundOutcome::AlreadyFunded(escrow)
            | FundOutcome::ReturnedToPayer(escrow) => escrow,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSummary {
    pub released: usize,
    pub failed: usize,
}

pub struct EscrowLedger {
    escrows: Arc<dyn EscrowRepository>,
    payments: Arc<dyn PaymentRepository>,
    providers: PaymentProviderRegistry,
    idempotency: IdempotencyService,
}

pub fn refund_key(escrow_id: &str, payment_id: &str) -> String {
    format!("escrow_refund:{}:{}", escrow_id, payment_id)
}

impl EscrowLedger {
    pub fn new(
        escrows: Arc<dyn EscrowRepository>,
        payments: Arc<dyn PaymentRepository>,
        providers: PaymentProviderRegistry,
        idempotency: IdempotencyService,
    ) -> Self {
        Self {
            escrows,
            payments,
            providers,
            idempotency,
        }
    }

    pub async fn get_escrow_by_booking_id(&self, booking_id: &str) -> AppResult<Option<Escrow>> {
        Ok(self.escrows.find_by_booking(booking_id).await?)
    }

    pub async fn get_escrow(&self, escrow_id: &str) -> AppResult<Escrow> {
        self.escrows
            .find_by_id(escrow_id)
            .await?
            .ok_or_else(|| AppError::escrow_not_found(escrow_id))
    }

    /// Get-or-create. The store keeps `booking_id` unique, so a racing
    /// creator loses on insert and reads the winner's row.
    pub async fn create_escrow_for_booking(
        &self,
        booking_id: &str,
        amount: i64,
        currency: &str,
    ) -> AppResult<Escrow> {
        if let Some(existing) = self.escrows.find_by_booking(booking_id).await? {
            return Ok(existing);
        }

        match self.escrows.insert(&Escrow::new(booking_id, amount, currency)).await {
            Ok(created) => {
                info!(escrow_id = %created.id, booking_id = %booking_id, amount, "escrow opened");
                Ok(created)
            }
            Err(e) if e.is_unique_violation() => self
                .escrows
                .find_by_booking(booking_id)
                .await?
                .ok_or_else(|| AppError::concurrent_modification("escrow", booking_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Counts a confirmed payment into the escrow. Re-funding with a payment
    /// that is already recorded is a no-op. A payment that settles after the
    /// escrow stopped accepting funds is refunded through its provider.
    pub async fn fund_escrow(&self, escrow_id: &str, payment_id: &str) -> AppResult<FundOutcome> {
        let payment = self
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::payment_not_found(payment_id))?;
        if payment.status != PaymentStatus::Confirmed {
            return Err(AppError::invalid_transition(
                "payment",
                payment_id,
                payment.status,
                "escrow funding",
            ));
        }

        let amount = payment.credited_amount();
        if let Some(escrow) = self
            .escrows
            .fund(escrow_id, payment_id, amount, Utc::now())
            .await?
        {
            info!(
                escrow_id = %escrow_id,
                payment_id = %payment_id,
                amount,
                funded_amount = escrow.funded_amount,
                "escrow funded"
            );
            return Ok(FundOutcome::Funded(escrow));
        }

        let escrow = self.get_escrow(escrow_id).await?;
        if escrow.has_payment(payment_id) {
            info!(escrow_id = %escrow_id, payment_id = %payment_id, "payment already counted in escrow");
            return Ok(FundOutcome::AlreadyFunded(escrow));
        }
        if escrow.status.accepts_funding() {
            return Err(AppError::concurrent_modification("escrow", escrow_id));
        }

        warn!(
            escrow_id = %escrow_id,
            payment_id = %payment_id,
            status = %escrow.status,
            amount,
            "payment settled after escrow closed, returning it to the payer"
        );
        self.refund_payment(&escrow, &payment, Some("escrow closed before settlement"))
            .await
            .map_err(|e| {
                e.with_context(format!(
                    "payment {} settled on {} escrow {} and needs a manual refund",
                    payment_id, escrow.status, escrow_id
                ))
            })?;
        Ok(FundOutcome::ReturnedToPayer(escrow))
    }

    /// Refunds every payment held by the escrow through its provider, then
    /// marks the escrow refunded. Rejected unless the escrow is funded,
    /// service-completed or disputed.
    pub async fn refund_escrow(
        &self,
        escrow_id: &str,
        actor_ref: &str,
        reason: Option<&str>,
    ) -> AppResult<Escrow> {
        let escrow = self.get_escrow(escrow_id).await?;
        if !escrow.status.is_refundable() {
            warn!(escrow_id = %escrow_id, status = %escrow.status, "escrow is not refundable");
            return Err(AppError::new(AppErrorKind::Domain(DomainError::EscrowNotRefundable {
                escrow_id: escrow_id.to_string(),
                status: escrow.status.to_string(),
            })));
        }

        let held: Vec<Payment> = self
            .payments
            .list_by_booking(&escrow.booking_id)
            .await?
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Confirmed && escrow.has_payment(&p.id))
            .collect();

        let mut failures = Vec::new();
        for payment in &held {
            if let Err(e) = self.refund_payment(&escrow, payment, reason).await {
                error!(
                    escrow_id = %escrow.id,
                    payment_id = %payment.id,
                    provider = %payment.provider,
                    error = %e.internal_message(),
                    "provider refund failed"
                );
                failures.push(e);
            }
        }
        if let Some(first) = failures.into_iter().next() {
            return Err(first.with_context(format!(
                "escrow {} stays {} for manual refund",
                escrow.id, escrow.status
            )));
        }

        let now = Utc::now();
        let mut refunded = escrow.clone();
        refunded.status = EscrowStatus::Refunded;
        refunded.refunded_at = Some(now);
        refunded.refund_actor = Some(actor_ref.to_string());
        refunded.refund_reason = reason.map(str::to_string);
        refunded.updated_at = now;

        match self.escrows.update_if_status(&refunded, &[escrow.status]).await? {
            Some(saved) => {
                info!(
                    escrow_id = %saved.id,
                    booking_id = %saved.booking_id,
                    actor = %actor_ref,
                    payments = held.len(),
                    "escrow refunded"
                );
                Ok(saved)
            }
            None => {
                let current = self.get_escrow(escrow_id).await?;
                Err(AppError::new(AppErrorKind::Domain(DomainError::EscrowNotRefundable {
                    escrow_id: escrow_id.to_string(),
                    status: current.status.to_string(),
                })))
            }
        }
    }

    async fn refund_payment(
        &self,
        escrow: &Escrow,
        payment: &Payment,
        reason: Option<&str>,
    ) -> AppResult<()> {
        let provider = self.providers.get_provider(payment.provider)?;
        let provider_payment_id = payment
            .provider_payment_id
            .clone()
            .ok_or_else(|| AppError::internal(format!("payment {} has no provider id", payment.id)))?;
        let key = refund_key(&escrow.id, &payment.id);
        let request = RefundRequest {
            reference: payment.reference.clone(),
            provider_payment_id,
            amount: payment.credited_amount(),
            currency: payment.currency.clone(),
            reason: reason.map(str::to_string),
            idempotency_key: key.clone(),
        };

        let outcome = self
            .idempotency
            .execute(&key, "escrow_refund", || async {
                provider.refund_payment(request).await.map_err(AppError::from)
            })
            .await?;

        let succeeded = match outcome {
            Idempotent::Executed(response) => response.state == RefundState::Succeeded,
            Idempotent::Duplicate(Some(previous)) => serde_json::from_value::<RefundResponse>(previous)
                .map(|r| r.state == RefundState::Succeeded)
                .unwrap_or(false),
            Idempotent::Duplicate(None) => {
                return Err(AppError::concurrent_modification("refund", key));
            }
        };

        if succeeded {
            let mut updated = payment.clone();
            updated.status = PaymentStatus::Refunded;
            updated.refunded_amount = Some(payment.credited_amount());
            updated.updated_at = Utc::now();
            if self
                .payments
                .update_if_status(&updated, &[PaymentStatus::Confirmed])
                .await?
                .is_none()
            {
                info!(payment_id = %payment.id, "payment already moved past confirmed");
            }
        }
        Ok(())
    }

    async fn transition<F>(&self, escrow: &Escrow, target: EscrowStatus, stamp: F) -> AppResult<Escrow>
    where
        F: FnOnce(&mut Escrow),
    {
        if !escrow.status.can_transition_to(target) {
            return Err(AppError::invalid_transition("escrow", &escrow.id, escrow.status, target));
        }
        let mut next = escrow.clone();
        next.status = target;
        next.updated_at = Utc::now();
        stamp(&mut next);

        let saved = self
            .escrows
            .update_if_status(&next, &[escrow.status])
            .await?
            .ok_or_else(|| AppError::concurrent_modification("escrow", &escrow.id))?;
        info!(escrow_id = %saved.id, from = %escrow.status, to = %target, "escrow transitioned");
        Ok(saved)
    }

    /// Starts the hold window that precedes release.
    pub async fn mark_service_completed(&self, escrow_id: &str, at: DateTime<Utc>) -> AppResult<Escrow> {
        let escrow = self.get_escrow(escrow_id).await?;
        self.transition(&escrow, EscrowStatus::ServiceCompleted, |e| {
            e.service_completed_at = Some(at)
        })
        .await
    }

    /// Only a service-completed escrow can be disputed; a funded one already
    /// sits outside the release path and is left alone.
    pub async fn mark_disputed(&self, escrow_id: &str) -> AppResult<Option<Escrow>> {
        let escrow = self.get_escrow(escrow_id).await?;
        if escrow.status != EscrowStatus::ServiceCompleted {
            info!(escrow_id = %escrow_id, status = %escrow.status, "escrow not in release window, dispute not recorded on it");
            return Ok(None);
        }
        self.transition(&escrow, EscrowStatus::Disputed, |_| {})
            .await
            .map(Some)
    }

    pub async fn release_escrow(&self, escrow_id: &str, actor_ref: &str) -> AppResult<Escrow> {
        let escrow = self.get_escrow(escrow_id).await?;
        let actor = actor_ref.to_string();
        let released = self
            .transition(&escrow, EscrowStatus::Released, move |e| {
                e.released_at = Some(e.updated_at);
                e.release_actor = Some(actor);
            })
            .await?;
        info!(escrow_id = %released.id, amount = released.funded_amount, actor = %actor_ref, "escrow released to supplier");
        Ok(released)
    }

    /// Releases escrows whose hold window ended before `now`, at most `limit`.
    pub async fn release_due(&self, now: DateTime<Utc>, hold: Duration, limit: i64) -> AppResult<ReleaseSummary> {
        let due = self.escrows.list_releasable(now - hold, limit).await?;
        let mut summary = ReleaseSummary::default();
        for escrow in due {
            match self.release_escrow(&escrow.id, "system:auto_release").await {
                Ok(_) => summary.released += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(escrow_id = %escrow.id, error = %e.internal_message(), "auto-release failed");
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryStore;
    use crate::error::ErrorCode;
    use crate::payments::testing::ScriptedProvider;
    use crate::payments::types::ProviderName;
    use crate::payments::PaymentProvider;

    struct Fixture {
        store: Arc<InMemoryStore>,
        provider: Arc<ScriptedProvider>,
        ledger: EscrowLedger,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(ScriptedProvider::new(ProviderName::MobileMoney));
        let registry =
            PaymentProviderRegistry::with_providers(vec![provider.clone() as Arc<dyn PaymentProvider>]);
        let ledger = EscrowLedger::new(
            store.clone(),
            store.clone(),
            registry,
            IdempotencyService::new(store.clone(), 3600),
        );
        Fixture {
            store,
            provider,
            ledger,
        }
    }

    async fn confirmed_payment(f: &Fixture, escrow: &Escrow, amount: i64) -> Payment {
        let mut payment = Payment::new(
            &escrow.booking_id,
            "client-1",
            ProviderName::MobileMoney,
            amount,
            "XAF",
            &escrow.id,
        );
        payment.status = PaymentStatus::Confirmed;
        payment.provider_payment_id = Some(format!("prov-{}", payment.reference));
        payment.settled_amount = Some(amount);
        PaymentRepository::insert(f.store.as_ref(), &payment).await.unwrap()
    }

    #[tokio::test]
    async fn create_is_get_or_create() {
        let f = fixture();
        let first = f.ledger.create_escrow_for_booking("b-1", 1000, "XAF").await.unwrap();
        let second = f.ledger.create_escrow_for_booking("b-1", 1000, "XAF").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.status, EscrowStatus::Pending);
    }

    #[tokio::test]
    async fn funding_twice_with_same_payment_is_a_noop() {
        let f = fixture();
        let escrow = f.ledger.create_escrow_for_booking("b-1", 150_000, "XAF").await.unwrap();
        let payment = confirmed_payment(&f, &escrow, 150_000).await;

        let first = f.ledger.fund_escrow(&escrow.id, &payment.id).await.unwrap();
        assert!(matches!(first, FundOutcome::Funded(_)));
        let second = f.ledger.fund_escrow(&escrow.id, &payment.id).await.unwrap();
        assert!(matches!(second, FundOutcome::AlreadyFunded(_)));

        let escrow = f.ledger.get_escrow(&escrow.id).await.unwrap();
        assert_eq!(escrow.status, EscrowStatus::Funded);
        assert_eq!(escrow.funded_amount, 150_000);
    }

    #[tokio::test]
    async fn payment_settling_on_refunded_escrow_is_returned() {
        let f = fixture();
        let escrow = f.ledger.create_escrow_for_booking("b-1", 2000, "XAF").await.unwrap();
        let first = confirmed_payment(&f, &escrow, 1000).await;
        f.ledger.fund_escrow(&escrow.id, &first.id).await.unwrap();
        f.ledger.refund_escrow(&escrow.id, "client:client-1", None).await.unwrap();
        assert_eq!(f.provider.refunds(), 1);

        let late = confirmed_payment(&f, &escrow, 1000).await;
        let outcome = f.ledger.fund_escrow(&escrow.id, &late.id).await.unwrap();
        assert!(matches!(outcome, FundOutcome::ReturnedToPayer(_)));
        assert_eq!(f.provider.refunds(), 2);

        let late = PaymentRepository::find_by_id(f.store.as_ref(), &late.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(late.status, PaymentStatus::Refunded);
        let escrow = f.ledger.get_escrow(&escrow.id).await.unwrap();
        assert_eq!(escrow.status, EscrowStatus::Refunded);
        assert_eq!(escrow.funded_amount, 1000);
    }

    #[tokio::test]
    async fn refund_rejected_outside_refundable_states() {
        let f = fixture();
        let escrow = f.ledger.create_escrow_for_booking("b-1", 1000, "XAF").await.unwrap();

        let err = f.ledger.refund_escrow(&escrow.id, "admin:a", None).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::FailedPrecondition);
        assert_eq!(f.provider.refunds(), 0);
    }

    #[tokio::test]
    async fn refund_moves_funded_escrow_once() {
        let f = fixture();
        let escrow = f.ledger.create_escrow_for_booking("b-1", 1000, "XAF").await.unwrap();
        let payment = confirmed_payment(&f, &escrow, 1000).await;
        f.ledger.fund_escrow(&escrow.id, &payment.id).await.unwrap();

        let refunded = f
            .ledger
            .refund_escrow(&escrow.id, "client:client-1", Some("client request"))
            .await
            .unwrap();
        assert_eq!(refunded.status, EscrowStatus::Refunded);
        assert_eq!(refunded.refund_actor.as_deref(), Some("client:client-1"));
        assert_eq!(f.provider.refunds(), 1);

        let payment = PaymentRepository::find_by_id(f.store.as_ref(), &payment.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Refunded);

        let err = f.ledger.refund_escrow(&escrow.id, "client:client-1", None).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::FailedPrecondition);
        assert_eq!(f.provider.refunds(), 1);
    }

    #[tokio::test]
    async fn failed_provider_refund_keeps_escrow_refundable() {
        let f = fixture();
        let escrow = f.ledger.create_escrow_for_booking("b-1", 1000, "XAF").await.unwrap();
        let payment = confirmed_payment(&f, &escrow, 1000).await;
        f.ledger.fund_escrow(&escrow.id, &payment.id).await.unwrap();
        f.provider.fail_refunds(true);

        assert!(f.ledger.refund_escrow(&escrow.id, "admin:a", None).await.is_err());
        assert_eq!(f.ledger.get_escrow(&escrow.id).await.unwrap().status, EscrowStatus::Funded);

        // The failed attempt does not block a later retry.
        f.provider.fail_refunds(false);
        let refunded = f.ledger.refund_escrow(&escrow.id, "admin:a", None).await.unwrap();
        assert_eq!(refunded.status, EscrowStatus::Refunded);
        assert_eq!(f.provider.refunds(), 2);
    }

    #[tokio::test]
    async fn release_after_hold_window() {
        let f = fixture();
        let escrow = f.ledger.create_escrow_for_booking("b-1", 1000, "XAF").await.unwrap();
        let payment = confirmed_payment(&f, &escrow, 1000).await;
        f.ledger.fund_escrow(&escrow.id, &payment.id).await.unwrap();
        let completed_at = Utc::now() - Duration::hours(49);
        f.ledger.mark_service_completed(&escrow.id, completed_at).await.unwrap();

        let summary = f.ledger.release_due(Utc::now(), Duration::hours(48), 10).await.unwrap();
        assert_eq!(summary, ReleaseSummary { released: 1, failed: 0 });
        let released = f.ledger.get_escrow(&escrow.id).await.unwrap();
        assert_eq!(released.status, EscrowStatus::Released);

        let err = f.ledger.release_escrow(&escrow.id, "admin:a").await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::FailedPrecondition);
    }

    #[tokio::test]
    async fn dispute_only_applies_in_release_window() {
        let f = fixture();
        let escrow = f.ledger.create_escrow_for_booking("b-1", 1000, "XAF").await.unwrap();
        let payment = confirmed_payment(&f, &escrow, 1000).await;
        f.ledger.fund_escrow(&escrow.id, &payment.id).await.unwrap();

        assert!(f.ledger.mark_disputed(&escrow.id).await.unwrap().is_none());
        f.ledger.mark_service_completed(&escrow.id, Utc::now()).await.unwrap();
        let disputed = f.ledger.mark_disputed(&escrow.id).await.unwrap().unwrap();
        assert_eq!(disputed.status, EscrowStatus::Disputed);
    }
}
