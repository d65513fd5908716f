//! Fully wired services over an in-memory store, for unit tests.

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::database::memory::InMemoryStore;
use crate::database::repository::{BookingRepository, PaymentRepository};
use crate::database::Repositories;
use crate::models::{Booking, Payment};
use crate::payments::testing::ScriptedProvider;
use crate::payments::types::ProviderName;
use crate::payments::{PaymentProvider, PaymentProviderRegistry};
use crate::services::authorization::Caller;
use crate::services::feature_flags::FeatureFlags;
use crate::services::payments::CreateIntentRequest;
use crate::services::{ServiceSettings, Services};

pub const CLIENT: &str = "client-1";
pub const SUPPLIER: &str = "supplier-1";
pub const SUPPLIER_OWNER: &str = "owner-1";
pub const ADMIN: &str = "admin-1";

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub provider: Arc<ScriptedProvider>,
    pub services: Services,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_flags(|flags| flags).await
    }

    pub async fn with_flags(configure: impl FnOnce(FeatureFlags) -> FeatureFlags) -> Self {
        let store = Arc::new(InMemoryStore::new());
        store.seed_user(CLIENT, "client").unwrap();
        store.seed_user(SUPPLIER_OWNER, "supplier").unwrap();
        store.seed_user(ADMIN, "admin").unwrap();
        store.seed_supplier(SUPPLIER, SUPPLIER_OWNER).unwrap();

        let provider = Arc::new(ScriptedProvider::new(ProviderName::MobileMoney));
        let registry =
            PaymentProviderRegistry::with_providers(vec![provider.clone() as Arc<dyn PaymentProvider>]);
        let repos = Repositories::in_memory(store.clone());
        let flags = Arc::new(configure(FeatureFlags::new(repos.feature_flags.clone(), 60)));
        let services = Services::build(&repos, registry, flags, ServiceSettings::default());

        Self {
            store,
            provider,
            services,
        }
    }

    pub fn client() -> Caller {
        Caller::new(CLIENT)
    }

    pub fn supplier() -> Caller {
        Caller::new(SUPPLIER_OWNER)
    }

    pub fn admin() -> Caller {
        Caller::new(ADMIN)
    }

    pub async fn pending_booking(&self, total_price: i64) -> Booking {
        let booking = Booking::new(
            CLIENT,
            SUPPLIER,
            "package-1",
            total_price,
            "XAF",
            Utc::now() + Duration::days(30),
        );
        BookingRepository::insert(self.store.as_ref(), &booking)
            .await
            .unwrap()
    }

    pub async fn booking(&self, id: &str) -> Booking {
        BookingRepository::find_by_id(self.store.as_ref(), id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn payment(&self, id: &str) -> Payment {
        PaymentRepository::find_by_id(self.store.as_ref(), id)
            .await
            .unwrap()
            .unwrap()
    }

    /// A supplier-confirmed booking with one pending payment for the full
    /// price.
    pub async fn confirmed_booking_with_pending_payment(&self, total_price: i64) -> (Booking, Payment) {
        let booking = self.pending_booking(total_price).await;
        self.services
            .bookings
            .confirm_booking(&Self::supplier(), &booking.id)
            .await
            .unwrap();
        let intent = self
            .services
            .payments
            .create_payment_intent(
                &Self::client(),
                CreateIntentRequest {
                    booking_id: booking.id.clone(),
                    provider: "mobile_money".to_string(),
                    amount: None,
                    phone_number: Some("+237600000000".to_string()),
                    email: None,
                    return_url: None,
                },
            )
            .await
            .unwrap();
        (self.booking(&booking.id).await, self.payment(&intent.payment_id).await)
    }

    /// Same as above with the payment confirmed through settlement.
    pub async fn paid_booking(&self, total_price: i64) -> (Booking, Payment) {
        let (booking, payment) = self.confirmed_booking_with_pending_payment(total_price).await;
        self.services
            .settlement
            .confirm_payment(payment.clone(), Some(total_price), None)
            .await
            .unwrap();
        (self.booking(&booking.id).await, self.payment(&payment.id).await)
    }
}
