//! Payment intents and the manual confirmation path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database::repository::{BookingRepository, PaymentRepository};
use crate::error::{AppError, AppResult};
use crate::models::{BookingStatus, Payment, PaymentStatus};
use crate::payments::types::{
    ConfirmPaymentRequest, CustomerContact, PaymentIntentRequest, ProviderName, ProviderPaymentState,
};
use crate::payments::PaymentProviderRegistry;
use crate::services::authorization::{AuthorizationProvider, BookingAccess, Caller};
use crate::services::escrow::EscrowLedger;
use crate::services::feature_flags::{Feature, FeatureFlags};
use crate::services::rate_limiter::{actions, RateLimiter};
use crate::services::settlement::{SettlementOutcome, SettlementService, StatusUpdate};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub booking_id: String,
    pub provider: String,
    /// Defaults to the booking's outstanding balance.
    pub amount: Option<i64>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub return_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentResponse {
    pub payment_id: String,
    pub reference: String,
    pub provider: ProviderName,
    pub provider_payment_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub checkout_url: Option<String>,
    pub instructions: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualConfirmation {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub awaiting_webhook: bool,
}

pub struct PaymentService {
    bookings: Arc<dyn BookingRepository>,
    payments: Arc<dyn PaymentRepository>,
    providers: PaymentProviderRegistry,
    ledger: Arc<EscrowLedger>,
    settlement: Arc<SettlementService>,
    auth: Arc<dyn AuthorizationProvider>,
    rate_limiter: RateLimiter,
    flags: Arc<FeatureFlags>,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        payments: Arc<dyn PaymentRepository>,
        providers: PaymentProviderRegistry,
        ledger: Arc<EscrowLedger>,
        settlement: Arc<SettlementService>,
        auth: Arc<dyn AuthorizationProvider>,
        rate_limiter: RateLimiter,
        flags: Arc<FeatureFlags>,
    ) -> Self {
        Self {
            bookings,
            payments,
            providers,
            ledger,
            settlement,
            auth,
            rate_limiter,
            flags,
        }
    }

    pub async fn create_payment_intent(
        &self,
        caller: &Caller,
        request: CreateIntentRequest,
    ) -> AppResult<PaymentIntentResponse> {
        self.flags.require_enabled(Feature::Payments).await?;
        self.rate_limiter
            .enforce(&caller.user_id, actions::PAYMENT_INTENT)
            .await?;

        if request.booking_id.trim().is_empty() {
            return Err(AppError::missing_field("bookingId"));
        }
        let provider_name = ProviderName::from_str(&request.provider)
            .map_err(|e| AppError::invalid_value("provider", e.to_string()))?;
        let provider = self.providers.get_provider(provider_name)?;

        let booking = self
            .bookings
            .find_by_id(&request.booking_id)
            .await?
            .ok_or_else(|| AppError::booking_not_found(&request.booking_id))?;
        let access = BookingAccess::resolve(self.auth.as_ref(), caller, &booking).await?;
        if !access.is_client {
            return Err(AppError::permission_denied(
                &caller.user_id,
                format!("booking:{}", booking.id),
            ));
        }

        let payable = matches!(booking.status, BookingStatus::Confirmed | BookingStatus::Paid);
        if !payable || booking.outstanding_amount() == 0 {
            return Err(AppError::invalid_transition(
                "booking",
                &booking.id,
                booking.status,
                BookingStatus::Paid,
            )
            .with_context(format!("outstanding balance {}", booking.outstanding_amount())));
        }

        // Pending payments hold their amount until confirmed, failed or expired.
        let in_flight: i64 = self
            .payments
            .list_by_booking(&booking.id)
            .await?
            .iter()
            .filter(|p| p.status == PaymentStatus::Pending)
            .map(|p| p.amount)
            .sum();
        let outstanding = (booking.outstanding_amount() - in_flight).max(0);
        if outstanding == 0 {
            warn!(booking_id = %booking.id, in_flight, "payment intent refused, balance already covered by pending payments");
            return Err(AppError::invalid_transition(
                "booking",
                &booking.id,
                booking.status,
                BookingStatus::Paid,
            )
            .with_context(format!("{} already awaiting settlement", in_flight)));
        }
        let amount = request.amount.unwrap_or(outstanding);
        if amount <= 0 || amount > outstanding {
            return Err(AppError::invalid_value(
                "amount",
                format!("must be between 1 and {}", outstanding),
            ));
        }

        let escrow = self
            .ledger
            .create_escrow_for_booking(&booking.id, booking.total_price, &booking.currency)
            .await?;
        if !escrow.status.accepts_funding() {
            return Err(AppError::invalid_transition(
                "escrow",
                &escrow.id,
                escrow.status,
                "funded",
            ));
        }

        let payment = Payment::new(
            &booking.id,
            &caller.user_id,
            provider_name,
            amount,
            &booking.currency,
            &escrow.id,
        );
        let payment = PaymentRepository::insert(self.payments.as_ref(), &payment).await?;
        info!(
            payment_id = %payment.id,
            reference = %payment.reference,
            booking_id = %booking.id,
            provider = %provider_name,
            amount,
            "payment created"
        );

        let intent_request = PaymentIntentRequest {
            reference: payment.reference.clone(),
            booking_id: booking.id.clone(),
            amount,
            currency: booking.currency.clone(),
            customer: CustomerContact {
                email: request.email,
                phone: request.phone_number,
            },
            return_url: request.return_url,
            description: Some(format!("Booking {}", booking.id)),
        };
        let intent = match provider.create_payment_intent(intent_request).await {
            Ok(intent) => intent,
            Err(e) => {
                error!(payment_id = %payment.id, provider = %provider_name, error = %e, "payment intent failed");
                if let Err(mark_err) = self
                    .settlement
                    .record_outcome(&payment, PaymentStatus::Failed, Some(e.to_string()))
                    .await
                {
                    error!(payment_id = %payment.id, error = %mark_err, "could not mark payment failed");
                }
                return Err(e.into());
            }
        };

        let mut updated = payment.clone();
        updated.provider_payment_id = Some(intent.provider_payment_id.clone());
        updated.updated_at = Utc::now();
        let saved = match self
            .payments
            .update_if_status(&updated, &[PaymentStatus::Pending])
            .await?
        {
            Some(saved) => saved,
            None => self.reload_with_provider_id(&payment.id, &intent.provider_payment_id).await?,
        };

        // A fast provider may report the outcome before the webhook lands.
        let status = match intent.state {
            ProviderPaymentState::Confirmed => {
                match self
                    .settlement
                    .confirm_payment(saved.clone(), Some(amount), Some(intent.provider_payment_id.clone()))
                    .await?
                {
                    SettlementOutcome::Confirmed { payment, .. }
                    | SettlementOutcome::AlreadyConfirmed(payment)
                    | SettlementOutcome::Ignored(payment) => payment.status,
                }
            }
            _ => saved.status,
        };

        Ok(PaymentIntentResponse {
            payment_id: saved.id,
            reference: saved.reference,
            provider: provider_name,
            provider_payment_id: intent.provider_payment_id,
            amount,
            currency: saved.currency,
            status,
            checkout_url: intent.checkout_url,
            instructions: intent.instructions,
            expires_at: intent.expires_at,
        })
    }

    /// The payment moved on (typically a fast webhook) before the provider id
    /// was stored. Returns the current row, filling in the id if still unset.
    async fn reload_with_provider_id(&self, payment_id: &str, provider_payment_id: &str) -> AppResult<Payment> {
        let current = self
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::payment_not_found(payment_id))?;
        info!(payment_id = %payment_id, status = %current.status, "payment changed while the intent was created");
        if current.provider_payment_id.is_some() {
            return Ok(current);
        }

        let mut updated = current.clone();
        updated.provider_payment_id = Some(provider_payment_id.to_string());
        updated.updated_at = Utc::now();
        match self.payments.update_if_status(&updated, &[current.status]).await? {
            Some(saved) => Ok(saved),
            None => {
                warn!(payment_id = %payment_id, "provider payment id not stored, payment keeps changing");
                self.payments
                    .find_by_id(payment_id)
                    .await?
                    .ok_or_else(|| AppError::payment_not_found(payment_id))
            }
        }
    }

    /// Admin-only manual confirmation. Providers that settle only through
    /// webhooks report "awaiting webhook" and nothing changes.
    pub async fn confirm_payment(&self, caller: &Caller, payment_id: &str) -> AppResult<ManualConfirmation> {
        self.flags.require_enabled(Feature::Payments).await?;
        let role = self.auth.role_of(caller, None).await?;
        if !role.is_admin {
            return Err(AppError::permission_denied(
                &caller.user_id,
                format!("payment:{}", payment_id),
            ));
        }
        if payment_id.trim().is_empty() {
            return Err(AppError::missing_field("paymentId"));
        }

        let payment = self
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::payment_not_found(payment_id))?;
        let provider = self.providers.get_provider(payment.provider)?;
        let confirmation = provider
            .confirm_payment(ConfirmPaymentRequest {
                reference: payment.reference.clone(),
                provider_payment_id: payment.provider_payment_id.clone(),
            })
            .await?;

        if confirmation.awaiting_webhook {
            info!(payment_id = %payment.id, provider = %payment.provider, "provider settles through webhooks only");
            return Ok(ManualConfirmation {
                payment_id: payment.id,
                status: payment.status,
                awaiting_webhook: true,
            });
        }

        let status = match confirmation.state {
            ProviderPaymentState::Confirmed => {
                match self
                    .settlement
                    .confirm_payment(payment, confirmation.amount, confirmation.provider_payment_id)
                    .await?
                {
                    SettlementOutcome::Confirmed { payment, .. }
                    | SettlementOutcome::AlreadyConfirmed(payment)
                    | SettlementOutcome::Ignored(payment) => payment.status,
                }
            }
            ProviderPaymentState::Failed | ProviderPaymentState::Expired => {
                let target = if confirmation.state == ProviderPaymentState::Failed {
                    PaymentStatus::Failed
                } else {
                    PaymentStatus::Expired
                };
                match self
                    .settlement
                    .record_outcome(&payment, target, Some("reported by provider status query".to_string()))
                    .await?
                {
                    StatusUpdate::Applied(p) | StatusUpdate::Unchanged(p) => p.status,
                }
            }
            ProviderPaymentState::Pending => {
                warn!(payment_id = %payment.id, "provider still reports the payment as pending");
                payment.status
            }
        };

        Ok(ManualConfirmation {
            payment_id: payment_id.to_string(),
            status,
            awaiting_webhook: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::database::memory::InMemoryStore;
    use crate::error::ErrorCode;
    use crate::payments::error::PaymentResult;
    use crate::payments::testing::ScriptedProvider;
    use crate::payments::types::{
        PaymentConfirmation, PaymentIntent, RefundRequest, RefundResponse, WebhookEvent,
        WebhookVerificationResult,
    };
    use crate::payments::PaymentProvider;
    use crate::services::rate_limiter::RateLimit;
    use crate::services::testing::Harness;

    fn intent_for(booking_id: &str) -> CreateIntentRequest {
        CreateIntentRequest {
            booking_id: booking_id.to_string(),
            provider: "mobile_money".to_string(),
            amount: None,
            phone_number: Some("+237600000001".to_string()),
            email: None,
            return_url: None,
        }
    }

    async fn confirmed(h: &Harness, total: i64) -> String {
        let booking = h.pending_booking(total).await;
        h.services
            .bookings
            .confirm_booking(&Harness::supplier(), &booking.id)
            .await
            .unwrap();
        booking.id
    }

    #[tokio::test]
    async fn intent_defaults_to_the_outstanding_balance() {
        let h = Harness::new().await;
        let booking_id = confirmed(&h, 90_000).await;

        let intent = h
            .services
            .payments
            .create_payment_intent(&Harness::client(), intent_for(&booking_id))
            .await
            .unwrap();

        assert_eq!(intent.amount, 90_000);
        assert_eq!(intent.status, PaymentStatus::Pending);
        assert!(intent.reference.starts_with("PAY-"));
        let payment = h.payment(&intent.payment_id).await;
        assert_eq!(payment.provider_payment_id.as_deref(), Some(intent.provider_payment_id.as_str()));
        let escrow = h
            .services
            .ledger
            .get_escrow_by_booking_id(&booking_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.escrow_id(), Some(escrow.id.as_str()));
    }

    #[tokio::test]
    async fn only_the_client_pays_a_confirmed_booking() {
        let h = Harness::new().await;
        let pending = h.pending_booking(10_000).await;

        let err = h
            .services
            .payments
            .create_payment_intent(&Harness::client(), intent_for(&pending.id))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::FailedPrecondition);

        let booking_id = confirmed(&h, 10_000).await;
        let err = h
            .services
            .payments
            .create_payment_intent(&Harness::supplier(), intent_for(&booking_id))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::PermissionDenied);

        let mut too_much = intent_for(&booking_id);
        too_much.amount = Some(10_001);
        let err = h
            .services
            .payments
            .create_payment_intent(&Harness::client(), too_much)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn pending_payments_reserve_their_share_of_the_balance() {
        let h = Harness::new().await;
        let booking_id = confirmed(&h, 100_000).await;

        let mut partial = intent_for(&booking_id);
        partial.amount = Some(40_000);
        let first = h
            .services
            .payments
            .create_payment_intent(&Harness::client(), partial)
            .await
            .unwrap();
        let rest = h
            .services
            .payments
            .create_payment_intent(&Harness::client(), intent_for(&booking_id))
            .await
            .unwrap();
        assert_eq!(rest.amount, 60_000);

        let err = h
            .services
            .payments
            .create_payment_intent(&Harness::client(), intent_for(&booking_id))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::FailedPrecondition);

        // An expired attempt frees its share.
        let first = h.payment(&first.payment_id).await;
        h.services
            .settlement
            .record_outcome(&first, PaymentStatus::Expired, None)
            .await
            .unwrap();
        let retry = h
            .services
            .payments
            .create_payment_intent(&Harness::client(), intent_for(&booking_id))
            .await
            .unwrap();
        assert_eq!(retry.amount, 40_000);
    }

    /// Settles the payment as if its webhook arrived while the intent call
    /// was still in flight.
    struct SettlesDuringIntent {
        inner: ScriptedProvider,
        store: Arc<InMemoryStore>,
        settlement: Arc<SettlementService>,
    }

    #[async_trait]
    impl PaymentProvider for SettlesDuringIntent {
        fn name(&self) -> ProviderName {
            ProviderName::MobileMoney
        }

        fn signature_header(&self) -> &'static str {
            self.inner.signature_header()
        }

        fn supports_refunds(&self) -> bool {
            true
        }

        async fn create_payment_intent(&self, request: PaymentIntentRequest) -> PaymentResult<PaymentIntent> {
            let payment = PaymentRepository::find_by_reference(self.store.as_ref(), &request.reference)
                .await
                .unwrap()
                .unwrap();
            self.settlement.confirm_payment(payment, None, None).await.unwrap();
            Ok(PaymentIntent {
                provider_payment_id: "prov-race".to_string(),
                state: ProviderPaymentState::Pending,
                checkout_url: None,
                instructions: None,
                expires_at: None,
                provider_data: None,
            })
        }

        async fn confirm_payment(&self, request: ConfirmPaymentRequest) -> PaymentResult<PaymentConfirmation> {
            self.inner.confirm_payment(request).await
        }

        async fn refund_payment(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
            self.inner.refund_payment(request).await
        }

        fn verify_webhook(&self, payload: &[u8], signature: &str) -> WebhookVerificationResult {
            self.inner.verify_webhook(payload, signature)
        }

        fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
            self.inner.parse_webhook_event(payload)
        }
    }

    #[tokio::test]
    async fn intent_reports_a_payment_settled_while_it_was_created() {
        let mut h = Harness::new().await;
        let racing = Arc::new(SettlesDuringIntent {
            inner: ScriptedProvider::new(ProviderName::MobileMoney),
            store: h.store.clone(),
            settlement: h.services.settlement.clone(),
        });
        h.services.payments = Arc::new(PaymentService::new(
            h.store.clone(),
            h.store.clone(),
            PaymentProviderRegistry::with_providers(vec![racing as Arc<dyn PaymentProvider>]),
            h.services.ledger.clone(),
            h.services.settlement.clone(),
            h.services.auth.clone(),
            h.services.rate_limiter.clone(),
            h.services.flags.clone(),
        ));
        let booking_id = confirmed(&h, 20_000).await;

        let intent = h
            .services
            .payments
            .create_payment_intent(&Harness::client(), intent_for(&booking_id))
            .await
            .unwrap();

        assert_eq!(intent.status, PaymentStatus::Confirmed);
        let payment = h.payment(&intent.payment_id).await;
        assert_eq!(payment.status, PaymentStatus::Confirmed);
        assert_eq!(payment.provider_payment_id.as_deref(), Some("prov-race"));
    }

    #[tokio::test]
    async fn provider_failure_marks_the_payment_failed() {
        let h = Harness::new().await;
        let booking_id = confirmed(&h, 20_000).await;
        h.provider.fail_intents(true);

        let err = h
            .services
            .payments
            .create_payment_intent(&Harness::client(), intent_for(&booking_id))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::FailedPrecondition);

        let payments = PaymentRepository::list_by_booking(h.store.as_ref(), &booking_id)
            .await
            .unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn payments_kill_switch_blocks_intents() {
        let h = Harness::with_flags(|f| f.with_override(Feature::Payments, false)).await;
        let booking_id = confirmed(&h, 20_000).await;

        let err = h
            .services
            .payments
            .create_payment_intent(&Harness::client(), intent_for(&booking_id))
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), ErrorCode::Unavailable);
        assert_eq!(h.provider.intent_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn intents_are_rate_limited_per_caller() {
        let mut h = Harness::new().await;
        let limiter = h
            .services
            .rate_limiter
            .clone()
            .with_limit(actions::PAYMENT_INTENT, RateLimit { limit: 1, window_secs: 3600 });
        h.services.payments = Arc::new(PaymentService::new(
            h.store.clone(),
            h.store.clone(),
            PaymentProviderRegistry::with_providers(vec![h.provider.clone() as Arc<dyn PaymentProvider>]),
            h.services.ledger.clone(),
            h.services.settlement.clone(),
            h.services.auth.clone(),
            limiter,
            h.services.flags.clone(),
        ));
        let booking_id = confirmed(&h, 20_000).await;

        let mut first = intent_for(&booking_id);
        first.amount = Some(5_000);
        h.services
            .payments
            .create_payment_intent(&Harness::client(), first.clone())
            .await
            .unwrap();
        let err = h
            .services
            .payments
            .create_payment_intent(&Harness::client(), first)
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), ErrorCode::ResourceExhausted);
        assert!(err.retry_after().is_some());
    }

    #[tokio::test]
    async fn manual_confirmation_waits_for_webhook_rails() {
        let h = Harness::new().await;
        let (booking, payment) = h.confirmed_booking_with_pending_payment(30_000).await;

        let err = h
            .services
            .payments
            .confirm_payment(&Harness::client(), &payment.id)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::PermissionDenied);

        let waiting = h
            .services
            .payments
            .confirm_payment(&Harness::admin(), &payment.id)
            .await
            .unwrap();
        assert!(waiting.awaiting_webhook);
        assert_eq!(h.payment(&payment.id).await.status, PaymentStatus::Pending);

        h.provider.confirm_with(PaymentConfirmation {
            state: ProviderPaymentState::Confirmed,
            provider_payment_id: payment.provider_payment_id.clone(),
            amount: Some(30_000),
            awaiting_webhook: false,
        });
        let confirmed = h
            .services
            .payments
            .confirm_payment(&Harness::admin(), &payment.id)
            .await
            .unwrap();

        assert_eq!(confirmed.status, PaymentStatus::Confirmed);
        let booking = h.booking(&booking.id).await;
        assert_eq!(booking.status, BookingStatus::Paid);
        assert_eq!(booking.paid_amount, 30_000);
    }
}
