//! Applies provider-reported payment outcomes to the ledger.
//!
//! Shared by the webhook pipeline and the manual confirmation path. The
//! payment row is the primary transition; escrow funding, the booking credit
//! and the supplier notification follow as post-commit effects. Money that
//! lands on a booking cancelled in the meantime is refunded right after.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::repository::{BookingRepository, PaymentRepository};
use crate::error::{AppError, AppResult};
use crate::models::{ActorRole, BookingStatus, EscrowStatus, Payment, PaymentStatus};
use crate::services::effects::{EffectReport, PostCommitEffects};
use crate::services::escrow::EscrowLedger;

const LATE_SETTLEMENT_ACTOR: &str = "system:late_settlement";
use crate::services::notification::{NotificationService, NotificationType};

#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    Confirmed { payment: Payment, effects: EffectReport },
    AlreadyConfirmed(Payment),
    /// The payment is in a state a confirmation cannot move (refunded,
    /// expired).
    Ignored(Payment),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Applied(Payment),
    Unchanged(Payment),
}

pub struct SettlementService {
    bookings: Arc<dyn BookingRepository>,
    payments: Arc<dyn PaymentRepository>,
    ledger: Arc<EscrowLedger>,
    notifier: NotificationService,
}

impl SettlementService {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        payments: Arc<dyn PaymentRepository>,
        ledger: Arc<EscrowLedger>,
        notifier: NotificationService,
    ) -> Self {
        Self {
            bookings,
            payments,
            ledger,
            notifier,
        }
    }

    pub async fn confirm_payment(
        &self,
        payment: Payment,
        reported_amount: Option<i64>,
        provider_payment_id: Option<String>,
    ) -> AppResult<SettlementOutcome> {
        if payment.status == PaymentStatus::Confirmed {
            info!(payment_id = %payment.id, "payment already confirmed");
            return Ok(SettlementOutcome::AlreadyConfirmed(payment));
        }
        if !payment.status.confirmable() {
            warn!(payment_id = %payment.id, status = %payment.status, "confirmation ignored for settled payment");
            return Ok(SettlementOutcome::Ignored(payment));
        }

        let settled = reported_amount.unwrap_or(payment.amount);
        if settled != payment.amount {
            warn!(
                payment_id = %payment.id,
                expected = payment.amount,
                reported = settled,
                "provider reported a different amount; crediting the reported amount"
            );
        }

        let now = Utc::now();
        let mut confirmed = payment.clone();
        confirmed.status = PaymentStatus::Confirmed;
        confirmed.settled_amount = Some(settled);
        confirmed.confirmed_at = Some(now);
        confirmed.failure_reason = None;
        confirmed.updated_at = now;
        if confirmed.provider_payment_id.is_none() {
            confirmed.provider_payment_id = provider_payment_id;
        }

        let Some(confirmed) = self
            .payments
            .update_if_status(&confirmed, &[payment.status])
            .await?
        else {
            let current = self
                .payments
                .find_by_id(&payment.id)
                .await?
                .ok_or_else(|| AppError::payment_not_found(&payment.id))?;
            info!(payment_id = %payment.id, status = %current.status, "payment changed concurrently");
            return Ok(if current.status == PaymentStatus::Confirmed {
                SettlementOutcome::AlreadyConfirmed(current)
            } else {
                SettlementOutcome::Ignored(current)
            });
        };
        info!(
            payment_id = %confirmed.id,
            booking_id = %confirmed.booking_id,
            amount = settled,
            "payment confirmed"
        );

        let mut effects = PostCommitEffects::new(format!("payment:{}", confirmed.id));
        effects.push("fund_escrow", self.fund_escrow(&confirmed));
        effects.push("credit_booking", self.credit_booking(&confirmed));
        let mut report = effects.run().await;

        // Runs after funding so the escrow is refundable by now.
        let mut follow_up = PostCommitEffects::new(format!("payment:{}", confirmed.id));
        follow_up.push("refund_cancelled_booking", self.refund_if_cancelled(&confirmed));
        report.outcomes.extend(follow_up.run().await.outcomes);

        Ok(SettlementOutcome::Confirmed {
            payment: confirmed,
            effects: report,
        })
    }

    async fn fund_escrow(&self, payment: &Payment) -> AppResult<()> {
        let escrow_id = match payment.escrow_id() {
            Some(id) => id.to_string(),
            None => self
                .ledger
                .get_escrow_by_booking_id(&payment.booking_id)
                .await?
                .map(|e| e.id)
                .ok_or_else(|| AppError::escrow_not_found(format!("booking {}", payment.booking_id)))?,
        };
        self.ledger.fund_escrow(&escrow_id, &payment.id).await?;
        Ok(())
    }

    async fn credit_booking(&self, payment: &Payment) -> AppResult<()> {
        let amount = payment.credited_amount();
        let booking = self
            .bookings
            .credit_payment(&payment.booking_id, amount)
            .await?
            .ok_or_else(|| AppError::booking_not_found(&payment.booking_id))?;

        info!(booking_id = %booking.id, paid_amount = booking.paid_amount, status = %booking.status, "booking credited");

        self.notifier
            .send_notification(
                &booking.supplier_id,
                ActorRole::Supplier,
                NotificationType::PaymentReceived,
                Some(&booking.id),
                json!({ "amount": amount, "currency": payment.currency }),
            )
            .await
    }

    async fn refund_if_cancelled(&self, payment: &Payment) -> AppResult<()> {
        let booking = self
            .bookings
            .find_by_id(&payment.booking_id)
            .await?
            .ok_or_else(|| AppError::booking_not_found(&payment.booking_id))?;
        if !matches!(booking.status, BookingStatus::Cancelled | BookingStatus::Refunded) {
            return Ok(());
        }
        let Some(escrow) = self.ledger.get_escrow_by_booking_id(&booking.id).await? else {
            return Ok(());
        };
        if !escrow.status.is_refundable() {
            info!(booking_id = %booking.id, escrow_id = %escrow.id, status = %escrow.status, "no held funds on cancelled booking");
            return Ok(());
        }

        warn!(
            booking_id = %booking.id,
            payment_id = %payment.id,
            amount = payment.credited_amount(),
            "payment settled on a cancelled booking, refunding escrow"
        );
        if let Err(e) = self
            .ledger
            .refund_escrow(&escrow.id, LATE_SETTLEMENT_ACTOR, Some("booking cancelled before settlement"))
            .await
        {
            // The cancellation may have refunded it concurrently.
            if self.ledger.get_escrow(&escrow.id).await?.status != EscrowStatus::Refunded {
                return Err(e);
            }
        }
        Ok(())
    }

    /// `payment.failed` / `payment.expired`. No escrow or booking effects.
    pub async fn record_outcome(
        &self,
        payment: &Payment,
        status: PaymentStatus,
        reason: Option<String>,
    ) -> AppResult<StatusUpdate> {
        let expected: &[PaymentStatus] = match status {
            PaymentStatus::Failed => &[PaymentStatus::Pending],
            PaymentStatus::Expired => &[PaymentStatus::Pending, PaymentStatus::Failed],
            other => {
                return Err(AppError::internal(format!("{} is not a provider outcome", other)));
            }
        };
        if !expected.contains(&payment.status) {
            info!(payment_id = %payment.id, status = %payment.status, target = %status, "payment outcome ignored");
            return Ok(StatusUpdate::Unchanged(payment.clone()));
        }

        let mut updated = payment.clone();
        updated.status = status;
        updated.failure_reason = reason;
        updated.updated_at = Utc::now();
        Ok(match self.payments.update_if_status(&updated, expected).await? {
            Some(saved) => {
                info!(payment_id = %saved.id, status = %saved.status, "payment status updated");
                StatusUpdate::Applied(saved)
            }
            None => StatusUpdate::Unchanged(payment.clone()),
        })
    }

    /// `refund.succeeded`: records the refunded amount on a confirmed payment.
    pub async fn record_refund(&self, payment: &Payment, amount: Option<i64>) -> AppResult<StatusUpdate> {
        if payment.status != PaymentStatus::Confirmed {
            info!(payment_id = %payment.id, status = %payment.status, "refund event ignored");
            return Ok(StatusUpdate::Unchanged(payment.clone()));
        }
        let mut updated = payment.clone();
        updated.status = PaymentStatus::Refunded;
        updated.refunded_amount = Some(amount.unwrap_or_else(|| payment.credited_amount()));
        updated.updated_at = Utc::now();
        Ok(
            match self
                .payments
                .update_if_status(&updated, &[PaymentStatus::Confirmed])
                .await?
            {
                Some(saved) => {
                    info!(payment_id = %saved.id, refunded_amount = ?saved.refunded_amount, "payment refunded");
                    StatusUpdate::Applied(saved)
                }
                None => StatusUpdate::Unchanged(payment.clone()),
            },
        )
    }
}
