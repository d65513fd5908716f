//! Booking lifecycle.
//!
//! Each operation authorizes the caller, applies one transition from the
//! booking table with a compare-and-set (reloading and re-evaluating when a
//! concurrent writer wins), then runs its side effects after the commit.
//! Side-effect failures are logged and never undo the transition.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::repository::BookingRepository;
use crate::error::{AppError, AppResult};
use crate::models::{ActorRole, Booking, BookingStatus, CancellationStamp, EscrowStatus};
use crate::services::audit::AuditLogger;
use crate::services::authorization::{AuthorizationProvider, BookingAccess, Caller};
use crate::services::effects::{EffectReport, PostCommitEffects};
use crate::services::escrow::EscrowLedger;
use crate::services::feature_flags::{Feature, FeatureFlags};
use crate::services::notification::{NotificationService, NotificationType};

const MAX_CAS_ATTEMPTS: usize = 3;

const ANY_PARTY: &[ActorRole] = &[ActorRole::Client, ActorRole::Supplier, ActorRole::Admin];
const SUPPLIER_SIDE: &[ActorRole] = &[ActorRole::Supplier, ActorRole::Admin];
const BOOKING_PARTIES: &[ActorRole] = &[ActorRole::Client, ActorRole::Supplier];
const ADMIN_ONLY: &[ActorRole] = &[ActorRole::Admin];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBookingResult {
    pub success: bool,
    pub booking_id: String,
    pub previous_status: BookingStatus,
    #[serde(skip)]
    pub effects: EffectReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResult {
    pub success: bool,
    pub booking_id: String,
    pub previous_status: BookingStatus,
    pub status: BookingStatus,
    #[serde(skip)]
    pub effects: EffectReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputeOutcome {
    Refund,
    Complete,
}

pub struct BookingService {
    bookings: Arc<dyn BookingRepository>,
    auth: Arc<dyn AuthorizationProvider>,
    ledger: Arc<EscrowLedger>,
    flags: Arc<FeatureFlags>,
    audit: AuditLogger,
    notifier: NotificationService,
}

impl BookingService {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        auth: Arc<dyn AuthorizationProvider>,
        ledger: Arc<EscrowLedger>,
        flags: Arc<FeatureFlags>,
        audit: AuditLogger,
        notifier: NotificationService,
    ) -> Self {
        Self {
            bookings,
            auth,
            ledger,
            flags,
            audit,
            notifier,
        }
    }

    async fn load(&self, booking_id: &str) -> AppResult<Booking> {
        if booking_id.trim().is_empty() {
            return Err(AppError::missing_field("bookingId"));
        }
        self.bookings
            .find_by_id(booking_id)
            .await?
            .ok_or_else(|| AppError::booking_not_found(booking_id))
    }

    async fn authorize(
        &self,
        caller: &Caller,
        booking: &Booking,
        allowed: &[ActorRole],
    ) -> AppResult<ActorRole> {
        let access = BookingAccess::resolve(self.auth.as_ref(), caller, booking).await?;
        access.require(allowed, caller, &booking.id)
    }

    /// Writes `target` with a compare-and-set, reloading after a lost race.
    async fn commit<F>(
        &self,
        mut booking: Booking,
        target: BookingStatus,
        stamp: F,
    ) -> AppResult<(Booking, BookingStatus)>
    where
        F: Fn(&mut Booking),
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            if !booking.status.can_transition_to(target) {
                return Err(AppError::invalid_transition(
                    "booking",
                    &booking.id,
                    booking.status,
                    target,
                ));
            }
            let previous = booking.status;
            let mut next = booking.clone();
            next.status = target;
            next.updated_at = Utc::now();
            stamp(&mut next);

            match self.bookings.update_if_status(&next, &[previous]).await? {
                Some(saved) => {
                    info!(booking_id = %saved.id, from = %previous, to = %target, "booking transitioned");
                    return Ok((saved, previous));
                }
                None => {
                    warn!(booking_id = %booking.id, attempt, "booking changed concurrently, re-evaluating");
                    booking = self.load(&booking.id).await?;
                }
            }
        }
        Err(AppError::concurrent_modification("booking", &booking.id))
    }

    pub async fn cancel_booking(
        &self,
        caller: &Caller,
        booking_id: &str,
        reason: Option<String>,
    ) -> AppResult<CancelBookingResult> {
        self.flags.require_enabled(Feature::Bookings).await?;
        let mut booking = self.load(booking_id).await?;
        let role = self.authorize(caller, &booking, ANY_PARTY).await?;

        let mut committed = None;
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            if booking.status == BookingStatus::Cancelled {
                info!(booking_id = %booking.id, "booking already cancelled");
                return Ok(CancelBookingResult {
                    success: true,
                    booking_id: booking.id,
                    previous_status: BookingStatus::Cancelled,
                    effects: EffectReport::default(),
                });
            }
            if !booking.status.can_cancel() {
                return Err(AppError::invalid_transition(
                    "booking",
                    &booking.id,
                    booking.status,
                    BookingStatus::Cancelled,
                ));
            }

            let previous = booking.status;
            let mut next = booking.clone();
            next.apply_cancellation(&CancellationStamp {
                cancelled_at: Utc::now(),
                cancelled_by: caller.user_id.clone(),
                cancelled_by_role: role,
                cancellation_reason: reason.clone(),
            });
            match self.bookings.update_if_status(&next, &[previous]).await? {
                Some(saved) => {
                    committed = Some((saved, previous));
                    break;
                }
                None => {
                    warn!(booking_id = %booking.id, attempt, "booking changed during cancellation, re-evaluating");
                    booking = self.load(&booking.id).await?;
                }
            }
        }
        let Some((cancelled, previous)) = committed else {
            return Err(AppError::concurrent_modification("booking", &booking.id));
        };
        info!(
            booking_id = %cancelled.id,
            previous_status = %previous,
            cancelled_by = %caller.user_id,
            role = role.as_str(),
            "booking cancelled"
        );

        let actor_ref = role.actor_ref(&caller.user_id);
        let mut effects = PostCommitEffects::new(format!("booking:{}", cancelled.id));
        effects.push(
            "refund_escrow",
            self.refund_if_held(&cancelled, &actor_ref, reason.as_deref()),
        );
        effects.push(
            "audit",
            self.audit.booking_transition(
                "bookingCancelled",
                &caller.user_id,
                &cancelled,
                previous,
                json!({ "reason": reason, "role": role.as_str() }),
            ),
        );
        effects.push(
            "notify",
            self.notifier.notify_counterparty(
                &cancelled,
                role,
                NotificationType::BookingCancelled,
                json!({ "reason": reason }),
            ),
        );
        let report = effects.run().await;

        Ok(CancelBookingResult {
            success: true,
            booking_id: cancelled.id.clone(),
            previous_status: previous,
            effects: report,
        })
    }

    async fn refund_if_held(&self, booking: &Booking, actor_ref: &str, reason: Option<&str>) -> AppResult<()> {
        let Some(escrow) = self.ledger.get_escrow_by_booking_id(&booking.id).await? else {
            info!(booking_id = %booking.id, "no escrow to refund");
            return Ok(());
        };
        if !escrow.status.is_refundable() {
            info!(booking_id = %booking.id, escrow_id = %escrow.id, status = %escrow.status, "escrow holds no refundable funds");
            return Ok(());
        }
        self.ledger.refund_escrow(&escrow.id, actor_ref, reason).await?;
        Ok(())
    }

    pub async fn confirm_booking(&self, caller: &Caller, booking_id: &str) -> AppResult<TransitionResult> {
        self.flags.require_enabled(Feature::Bookings).await?;
        let booking = self.load(booking_id).await?;
        let role = self.authorize(caller, &booking, SUPPLIER_SIDE).await?;
        let (confirmed, previous) = self.commit(booking, BookingStatus::Confirmed, |_| {}).await?;

        let mut effects = PostCommitEffects::new(format!("booking:{}", confirmed.id));
        effects.push("open_escrow", async {
            self.ledger
                .create_escrow_for_booking(&confirmed.id, confirmed.total_price, &confirmed.currency)
                .await
                .map(|_| ())
        });
        effects.push(
            "audit",
            self.audit.booking_transition("bookingConfirmed", &caller.user_id, &confirmed, previous, json!({ "role": role.as_str() })),
        );
        effects.push(
            "notify",
            self.notifier.notify_counterparty(&confirmed, role, NotificationType::BookingConfirmed, json!({})),
        );
        let report = effects.run().await;
        Ok(transition_result(confirmed, previous, report))
    }

    pub async fn start_service(&self, caller: &Caller, booking_id: &str) -> AppResult<TransitionResult> {
        self.flags.require_enabled(Feature::Bookings).await?;
        let booking = self.load(booking_id).await?;
        let role = self.authorize(caller, &booking, SUPPLIER_SIDE).await?;
        let (started, previous) = self.commit(booking, BookingStatus::InProgress, |_| {}).await?;

        let mut effects = PostCommitEffects::new(format!("booking:{}", started.id));
        effects.push(
            "audit",
            self.audit.booking_transition("serviceStarted", &caller.user_id, &started, previous, json!({ "role": role.as_str() })),
        );
        effects.push(
            "notify",
            self.notifier.notify_counterparty(&started, role, NotificationType::ServiceStarted, json!({})),
        );
        let report = effects.run().await;
        Ok(transition_result(started, previous, report))
    }

    pub async fn complete_booking(&self, caller: &Caller, booking_id: &str) -> AppResult<TransitionResult> {
        self.flags.require_enabled(Feature::Bookings).await?;
        let booking = self.load(booking_id).await?;
        let role = self.authorize(caller, &booking, ANY_PARTY).await?;
        if booking.status == BookingStatus::Disputed {
            // Closing a dispute is an admin decision.
            return Err(AppError::invalid_transition("booking", &booking.id, booking.status, BookingStatus::Completed)
                .with_context("disputes are closed through resolve_dispute"));
        }
        let (completed, previous) = self.commit(booking, BookingStatus::Completed, |_| {}).await?;

        let mut effects = PostCommitEffects::new(format!("booking:{}", completed.id));
        effects.push("escrow_service_completed", self.start_hold_window(&completed));
        effects.push(
            "audit",
            self.audit.booking_transition("bookingCompleted", &caller.user_id, &completed, previous, json!({ "role": role.as_str() })),
        );
        effects.push(
            "notify",
            self.notifier.notify_counterparty(&completed, role, NotificationType::BookingCompleted, json!({})),
        );
        let report = effects.run().await;
        Ok(transition_result(completed, previous, report))
    }

    async fn start_hold_window(&self, booking: &Booking) -> AppResult<()> {
        match self.ledger.get_escrow_by_booking_id(&booking.id).await? {
            Some(escrow) if escrow.status == EscrowStatus::Funded => {
                self.ledger.mark_service_completed(&escrow.id, Utc::now()).await?;
                Ok(())
            }
            Some(escrow) => {
                info!(booking_id = %booking.id, escrow_id = %escrow.id, status = %escrow.status, "escrow not funded, hold window not started");
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub async fn open_dispute(
        &self,
        caller: &Caller,
        booking_id: &str,
        reason: Option<String>,
    ) -> AppResult<TransitionResult> {
        self.flags.require_enabled(Feature::Bookings).await?;
        let booking = self.load(booking_id).await?;
        let role = self.authorize(caller, &booking, BOOKING_PARTIES).await?;
        let (disputed, previous) = self.commit(booking, BookingStatus::Disputed, |_| {}).await?;

        let mut effects = PostCommitEffects::new(format!("booking:{}", disputed.id));
        effects.push("escrow_disputed", async {
            if let Some(escrow) = self.ledger.get_escrow_by_booking_id(&disputed.id).await? {
                self.ledger.mark_disputed(&escrow.id).await?;
            }
            Ok::<(), AppError>(())
        });
        effects.push(
            "audit",
            self.audit.booking_transition(
                "disputeOpened",
                &caller.user_id,
                &disputed,
                previous,
                json!({ "role": role.as_str(), "reason": reason }),
            ),
        );
        effects.push(
            "notify",
            self.notifier.notify_counterparty(&disputed, role, NotificationType::DisputeOpened, json!({ "reason": reason })),
        );
        let report = effects.run().await;
        Ok(transition_result(disputed, previous, report))
    }

    pub async fn resolve_dispute(
        &self,
        caller: &Caller,
        booking_id: &str,
        outcome: DisputeOutcome,
        note: Option<String>,
    ) -> AppResult<TransitionResult> {
        self.flags.require_enabled(Feature::Bookings).await?;
        let booking = self.load(booking_id).await?;
        let role = self.authorize(caller, &booking, ADMIN_ONLY).await?;
        let target = match outcome {
            DisputeOutcome::Refund => BookingStatus::Refunded,
            DisputeOutcome::Complete => BookingStatus::Completed,
        };
        if booking.status != BookingStatus::Disputed {
            return Err(AppError::invalid_transition("booking", &booking.id, booking.status, target));
        }
        let (resolved, previous) = self.commit(booking, target, |_| {}).await?;
        let actor_ref = role.actor_ref(&caller.user_id);

        let mut effects = PostCommitEffects::new(format!("booking:{}", resolved.id));
        match outcome {
            DisputeOutcome::Refund => effects.push(
                "refund_escrow",
                self.refund_if_held(&resolved, &actor_ref, note.as_deref().or(Some("dispute resolved in client's favour"))),
            ),
            DisputeOutcome::Complete => effects.push("settle_escrow", self.settle_for_supplier(&resolved, &actor_ref)),
        }
        effects.push(
            "audit",
            self.audit.booking_transition(
                "disputeResolved",
                &caller.user_id,
                &resolved,
                previous,
                json!({ "outcome": outcome, "note": note }),
            ),
        );
        effects.push(
            "notify_client",
            self.notifier.send_notification(
                &resolved.client_id,
                ActorRole::Client,
                NotificationType::DisputeResolved,
                Some(&resolved.id),
                json!({ "outcome": outcome }),
            ),
        );
        effects.push(
            "notify_supplier",
            self.notifier.send_notification(
                &resolved.supplier_id,
                ActorRole::Supplier,
                NotificationType::DisputeResolved,
                Some(&resolved.id),
                json!({ "outcome": outcome }),
            ),
        );
        let report = effects.run().await;
        Ok(transition_result(resolved, previous, report))
    }

    async fn settle_for_supplier(&self, booking: &Booking, actor_ref: &str) -> AppResult<()> {
        let Some(escrow) = self.ledger.get_escrow_by_booking_id(&booking.id).await? else {
            return Ok(());
        };
        match escrow.status {
            EscrowStatus::Disputed | EscrowStatus::ServiceCompleted => {
                self.ledger.release_escrow(&escrow.id, actor_ref).await?;
            }
            EscrowStatus::Funded => {
                self.ledger.mark_service_completed(&escrow.id, Utc::now()).await?;
            }
            other => {
                info!(escrow_id = %escrow.id, status = %other, "escrow left as is after dispute");
            }
        }
        Ok(())
    }

    /// Generic entry point: anything outside the transition table fails with
    /// `failed-precondition` and leaves the booking untouched.
    pub async fn transition_booking(
        &self,
        caller: &Caller,
        booking_id: &str,
        target: BookingStatus,
        reason: Option<String>,
    ) -> AppResult<TransitionResult> {
        let booking = self.load(booking_id).await?;
        let legal = booking.status.can_transition_to(target)
            || (target == BookingStatus::Cancelled && booking.status == BookingStatus::Cancelled);
        if !legal {
            return Err(AppError::invalid_transition("booking", &booking.id, booking.status, target));
        }

        match target {
            BookingStatus::Confirmed => self.confirm_booking(caller, booking_id).await,
            BookingStatus::InProgress => self.start_service(caller, booking_id).await,
            BookingStatus::Completed if booking.status == BookingStatus::Disputed => {
                self.resolve_dispute(caller, booking_id, DisputeOutcome::Complete, reason).await
            }
            BookingStatus::Completed => self.complete_booking(caller, booking_id).await,
            BookingStatus::Disputed => self.open_dispute(caller, booking_id, reason).await,
            BookingStatus::Refunded => {
                self.resolve_dispute(caller, booking_id, DisputeOutcome::Refund, reason).await
            }
            BookingStatus::Cancelled => {
                let cancelled = self.cancel_booking(caller, booking_id, reason).await?;
                Ok(TransitionResult {
                    success: cancelled.success,
                    booking_id: cancelled.booking_id,
                    previous_status: cancelled.previous_status,
                    status: BookingStatus::Cancelled,
                    effects: cancelled.effects,
                })
            }
            BookingStatus::Paid | BookingStatus::Pending => Err(AppError::invalid_transition(
                "booking",
                &booking.id,
                booking.status,
                target,
            )
            .with_context("bookings become paid through payment settlement")),
        }
    }
}

fn transition_result(booking: Booking, previous: BookingStatus, effects: EffectReport) -> TransitionResult {
    TransitionResult {
        success: true,
        status: booking.status,
        booking_id: booking.id,
        previous_status: previous,
        effects,
    }
}
