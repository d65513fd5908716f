#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

use eventhub_backend::api::{self, AppState};
use eventhub_backend::database::memory::InMemoryStore;
use eventhub_backend::database::repository::{BookingRepository, PaymentRepository};
use eventhub_backend::database::Repositories;
use eventhub_backend::health::HealthChecker;
use eventhub_backend::models::{Booking, Payment};
use eventhub_backend::payments::error::{PaymentError, PaymentResult};
use eventhub_backend::payments::providers::{MobileMoneyConfig, MobileMoneyProvider};
use eventhub_backend::payments::types::{
    ConfirmPaymentRequest, PaymentConfirmation, PaymentIntent, PaymentIntentRequest,
    ProviderName, ProviderPaymentState, RefundRequest, RefundResponse, RefundState, WebhookEvent,
    WebhookVerificationResult,
};
use eventhub_backend::payments::utils::hmac_sha256_base64;
use eventhub_backend::payments::{PaymentProvider, PaymentProviderRegistry};
use eventhub_backend::services::feature_flags::FeatureFlags;
use eventhub_backend::services::{ServiceSettings, Services};

pub const CLIENT: &str = "client-1";
pub const SUPPLIER: &str = "supplier-1";
pub const SUPPLIER_OWNER: &str = "owner-1";
pub const ADMIN: &str = "admin-1";
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Mobile-money rail with the real webhook signature and payload handling
/// and scripted outbound calls.
pub struct StubMobileMoney {
    webhooks: MobileMoneyProvider,
    pub fail_refunds: AtomicBool,
    pub refund_calls: AtomicUsize,
}

impl StubMobileMoney {
    pub fn new() -> Self {
        let webhooks = MobileMoneyProvider::new(MobileMoneyConfig {
            api_key: "mm_test".to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            max_retries: 0,
        })
        .expect("provider init");
        Self {
            webhooks,
            fail_refunds: AtomicBool::new(false),
            refund_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PaymentProvider for StubMobileMoney {
    fn name(&self) -> ProviderName {
        ProviderName::MobileMoney
    }

    fn signature_header(&self) -> &'static str {
        self.webhooks.signature_header()
    }

    fn supports_refunds(&self) -> bool {
        true
    }

    async fn create_payment_intent(&self, request: PaymentIntentRequest) -> PaymentResult<PaymentIntent> {
        Ok(PaymentIntent {
            provider_payment_id: format!("mm_{}", request.reference),
            state: ProviderPaymentState::Pending,
            checkout_url: None,
            instructions: Some("Approve the prompt".to_string()),
            expires_at: None,
            provider_data: None,
        })
    }

    async fn confirm_payment(&self, _request: ConfirmPaymentRequest) -> PaymentResult<PaymentConfirmation> {
        Ok(PaymentConfirmation::awaiting_webhook())
    }

    async fn refund_payment(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(PaymentError::provider("mobile_money", "refund declined", false));
        }
        Ok(RefundResponse {
            provider_refund_id: format!("rf_{}", request.provider_payment_id),
            state: RefundState::Succeeded,
        })
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> WebhookVerificationResult {
        self.webhooks.verify_webhook(payload, signature)
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        self.webhooks.parse_webhook_event(payload)
    }
}

pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub provider: Arc<StubMobileMoney>,
    pub services: Services,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(|repos| repos, |flags| flags)
    }

    pub fn build(
        configure_repos: impl FnOnce(Repositories) -> Repositories,
        configure_flags: impl FnOnce(FeatureFlags) -> FeatureFlags,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        store.seed_user(CLIENT, "client").unwrap();
        store.seed_user(SUPPLIER_OWNER, "supplier").unwrap();
        store.seed_user(ADMIN, "admin").unwrap();
        store.seed_supplier(SUPPLIER, SUPPLIER_OWNER).unwrap();

        let provider = Arc::new(StubMobileMoney::new());
        let registry =
            PaymentProviderRegistry::with_providers(vec![provider.clone() as Arc<dyn PaymentProvider>]);
        let repos = configure_repos(Repositories::in_memory(store.clone()));
        let flags = Arc::new(configure_flags(FeatureFlags::new(repos.feature_flags.clone(), 60)));
        let services = Services::build(&repos, registry, flags, ServiceSettings::default());
        let router = api::router(AppState {
            services: services.clone(),
            health: HealthChecker::in_memory(),
        });

        Self {
            store,
            provider,
            services,
            router,
        }
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

    /// JSON call as `uid`; returns the status and the parsed body.
    pub async fn call(&self, method: &str, uri: &str, uid: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(uid) = uid {
            request = request.header("x-auth-uid", uid);
        }
        let request = request.body(Body::from(body.to_string())).unwrap();
        self.send(request).await
    }

    pub async fn post_webhook(&self, payload: &Value, signature: Option<&str>) -> (StatusCode, Value) {
        let raw = payload.to_string();
        let computed = hmac_sha256_base64(raw.as_bytes(), WEBHOOK_SECRET).unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/mobile_money")
            .header("content-type", "application/json")
            .header("x-signature", signature.unwrap_or(&computed))
            .body(Body::from(raw))
            .unwrap();
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    /// Supplier confirms, client opens an intent; returns the intent body.
    pub async fn confirmed_with_intent(&self, total_price: i64) -> (Booking, Value) {
        let booking = self.pending_booking(total_price).await;
        let (status, _) = self
            .call(
                "POST",
                "/v1/bookings/confirm",
                Some(SUPPLIER_OWNER),
                serde_json::json!({ "bookingId": booking.id }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, intent) = self
            .call(
                "POST",
                "/v1/payments/intents",
                Some(CLIENT),
                serde_json::json!({
                    "bookingId": booking.id,
                    "provider": "mobile_money",
                    "phoneNumber": "+237600000000"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "intent failed: {}", intent);
        (booking, intent)
    }
}

pub fn collection_succeeded(event_id: &str, intent: &Value, amount: i64) -> Value {
    provider_event("collection.succeeded", event_id, intent, amount)
}

/// Mobile-money event of kind `event` about the payment behind `intent`.
pub fn provider_event(event: &str, event_id: &str, intent: &Value, amount: i64) -> Value {
    serde_json::json!({
        "id": event_id,
        "event": event,
        "created_at": "2026-05-01T10:00:00Z",
        "data": {
            "id": intent["providerPaymentId"],
            "reference": intent["reference"],
            "amount": amount,
            "currency": "XAF"
        }
    })
}
