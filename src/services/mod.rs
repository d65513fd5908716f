//! Services module for business logic and integrations

pub mod audit;
pub mod authorization;
pub mod bookings;
pub mod effects;
pub mod escrow;
pub mod feature_flags;
pub mod idempotency;
pub mod notification;
pub mod payments;
pub mod rate_limiter;
pub mod settlement;
pub mod webhook_processor;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::Repositories;
use crate::payments::PaymentProviderRegistry;

use self::audit::AuditLogger;
use self::authorization::{AuthorizationProvider, DirectoryAuthorization};
use self::bookings::BookingService;
use self::escrow::EscrowLedger;
use self::feature_flags::FeatureFlags;
use self::idempotency::{IdempotencyService, DEFAULT_TTL_SECS};
use self::notification::NotificationService;
use self::payments::PaymentService;
use self::rate_limiter::RateLimiter;
use self::settlement::SettlementService;
use self::webhook_processor::WebhookProcessor;

pub use self::authorization::Caller;
pub use self::feature_flags::Feature;

#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub idempotency_ttl_secs: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            idempotency_ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

impl From<&AppConfig> for ServiceSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            idempotency_ttl_secs: config.idempotency.ttl_secs,
        }
    }
}

/// Every service wired against one set of repositories.
#[derive(Clone)]
pub struct Services {
    pub flags: Arc<FeatureFlags>,
    pub idempotency: IdempotencyService,
    pub rate_limiter: RateLimiter,
    pub auth: Arc<dyn AuthorizationProvider>,
    pub ledger: Arc<EscrowLedger>,
    pub settlement: Arc<SettlementService>,
    pub bookings: Arc<BookingService>,
    pub payments: Arc<PaymentService>,
    pub webhooks: Arc<WebhookProcessor>,
}

impl Services {
    pub fn build(
        repos: &Repositories,
        providers: PaymentProviderRegistry,
        flags: Arc<FeatureFlags>,
        settings: ServiceSettings,
    ) -> Self {
        let idempotency = IdempotencyService::new(repos.idempotency.clone(), settings.idempotency_ttl_secs);
        let rate_limiter = RateLimiter::new(repos.rate_limits.clone());
        let auth: Arc<dyn AuthorizationProvider> =
            Arc::new(DirectoryAuthorization::new(repos.users.clone()));
        let audit = AuditLogger::new(repos.audit.clone());
        let notifier = NotificationService::new(repos.notifications.clone(), flags.clone());

        let ledger = Arc::new(EscrowLedger::new(
            repos.escrows.clone(),
            repos.payments.clone(),
            providers.clone(),
            idempotency.clone(),
        ));
        let settlement = Arc::new(SettlementService::new(
            repos.bookings.clone(),
            repos.payments.clone(),
            ledger.clone(),
            notifier.clone(),
        ));
        let bookings = Arc::new(BookingService::new(
            repos.bookings.clone(),
            auth.clone(),
            ledger.clone(),
            flags.clone(),
            audit,
            notifier,
        ));
        let payments = Arc::new(PaymentService::new(
            repos.bookings.clone(),
            repos.payments.clone(),
            providers.clone(),
            ledger.clone(),
            settlement.clone(),
            auth.clone(),
            rate_limiter.clone(),
            flags.clone(),
        ));
        let webhooks = Arc::new(WebhookProcessor::new(
            flags.clone(),
            providers,
            idempotency.clone(),
            repos.payments.clone(),
            settlement.clone(),
        ));

        Self {
            flags,
            idempotency,
            rate_limiter,
            auth,
            ledger,
            settlement,
            bookings,
            payments,
            webhooks,
        }
    }
}
