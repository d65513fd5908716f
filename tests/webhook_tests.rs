mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::future::join_all;
use serde_json::json;

use common::{collection_succeeded, provider_event, TestApp};
use eventhub_backend::models::{BookingStatus, EscrowStatus, PaymentStatus};
use eventhub_backend::services::Feature;

#[tokio::test]
async fn confirmed_collection_settles_the_booking_once() {
    let app = TestApp::new();
    let (booking, intent) = app.confirmed_with_intent(150_000).await;

    let event = collection_succeeded("evt-1", &intent, 150_000);
    let (status, body) = app.post_webhook(&event, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(body["eventId"], "evt-1");
    assert!(body.get("skipped").is_none());

    let paid = app.booking(&booking.id).await;
    assert_eq!(paid.status, BookingStatus::Paid);
    assert_eq!(paid.paid_amount, 150_000);

    let escrow = app
        .services
        .ledger
        .get_escrow_by_booking_id(&booking.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(escrow.status, EscrowStatus::Funded);
    assert_eq!(escrow.funded_amount, 150_000);

    // The provider re-delivers the same event.
    let (status, body) = app.post_webhook(&event, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["skipped"], true);
    assert_eq!(body["reason"], "duplicate");
    assert_eq!(app.booking(&booking.id).await.paid_amount, 150_000);
}

#[tokio::test]
async fn bad_signature_is_rejected_without_side_effects() {
    let app = TestApp::new();
    let (booking, intent) = app.confirmed_with_intent(50_000).await;

    let event = collection_succeeded("evt-forged", &intent, 50_000);
    let (status, body) = app.post_webhook(&event, Some("not-a-signature")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["received"], false);

    assert_eq!(app.booking(&booking.id).await.status, BookingStatus::Confirmed);
    assert!(app
        .store
        .idempotency_record("webhook:mobile_money:payment.confirmed:evt-forged")
        .unwrap()
        .is_none());

    // The genuine delivery is still processed afterwards.
    let (status, body) = app.post_webhook(&event, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("skipped").is_none());
}

#[tokio::test]
async fn missing_signature_header_is_rejected() {
    let app = TestApp::new();
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/mobile_money")
        .body(Body::from(r#"{"id":"evt-x","event":"collection.succeeded"}"#))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn kill_switch_acknowledges_without_processing() {
    let app = TestApp::build(|repos| repos, |flags| flags.with_override(Feature::Webhooks, false));
    let (booking, intent) = app.confirmed_with_intent(50_000).await;

    let (status, body) = app
        .post_webhook(&collection_succeeded("evt-2", &intent, 50_000), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["skipped"], true);
    assert_eq!(body["reason"], "kill_switch");
    assert_eq!(app.booking(&booking.id).await.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn payments_switch_also_pauses_webhooks() {
    let app = TestApp::new();
    let (booking, intent) = app.confirmed_with_intent(50_000).await;
    app.services.flags.set_flag(Feature::Payments, false, "ops").await.unwrap();

    let (status, body) = app
        .post_webhook(&collection_succeeded("evt-3", &intent, 50_000), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reason"], "kill_switch");
    assert_eq!(app.booking(&booking.id).await.paid_amount, 0);
    assert!(app
        .store
        .idempotency_record("webhook:mobile_money:payment.confirmed:evt-3")
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn non_post_methods_are_refused() {
    let app = TestApp::new();
    let request = Request::builder()
        .method("GET")
        .uri("/webhooks/mobile_money")
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unknown_provider_is_acknowledged() {
    let app = TestApp::new();
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/carrier-pigeon")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reason"], "provider_unavailable");
}

#[tokio::test]
async fn event_for_unknown_payment_can_be_redelivered() {
    let app = TestApp::new();
    let event = json!({
        "id": "evt-orphan",
        "event": "collection.succeeded",
        "data": { "id": "mm_nobody", "reference": "PAY-NOBODY", "amount": 1000, "currency": "XAF" }
    });

    for _ in 0..2 {
        let (status, body) = app.post_webhook(&event, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reason"], "payment_not_found");
    }
}

#[tokio::test]
async fn concurrent_redeliveries_fund_the_escrow_once() {
    let app = TestApp::new();
    let (booking, intent) = app.confirmed_with_intent(80_000).await;
    let event = collection_succeeded("evt-burst", &intent, 80_000);

    let responses = join_all((0..6).map(|_| app.post_webhook(&event, None))).await;
    assert!(responses.iter().all(|(status, _)| *status == StatusCode::OK));
    let processed = responses
        .iter()
        .filter(|(_, body)| body.get("skipped").is_none())
        .count();
    assert_eq!(processed, 1);

    assert_eq!(app.booking(&booking.id).await.paid_amount, 80_000);
    let escrow = app
        .services
        .ledger
        .get_escrow_by_booking_id(&booking.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(escrow.funded_amount, 80_000);
    assert_eq!(escrow.payment_ids.len(), 1);
}

#[tokio::test]
async fn expired_collection_is_not_settled_later() {
    let app = TestApp::new();
    let (booking, intent) = app.confirmed_with_intent(30_000).await;
    let payment_id = intent["paymentId"].as_str().unwrap();

    let (status, body) = app
        .post_webhook(&provider_event("collection.expired", "evt-exp", &intent, 30_000), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["eventType"], "payment.expired");
    assert_eq!(app.payment(payment_id).await.status, PaymentStatus::Expired);

    let (status, _) = app
        .post_webhook(&collection_succeeded("evt-after-exp", &intent, 30_000), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.payment(payment_id).await.status, PaymentStatus::Expired);
    let booking = app.booking(&booking.id).await;
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.paid_amount, 0);
}

#[tokio::test]
async fn refund_events_update_the_payment() {
    let app = TestApp::new();
    let (_, intent) = app.confirmed_with_intent(45_000).await;
    let payment_id = intent["paymentId"].as_str().unwrap();
    app.post_webhook(&collection_succeeded("evt-paid", &intent, 45_000), None)
        .await;

    let (status, body) = app
        .post_webhook(&provider_event("refund.failed", "evt-rf-1", &intent, 45_000), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["eventType"], "refund.failed");
    assert_eq!(app.payment(payment_id).await.status, PaymentStatus::Confirmed);

    let (status, body) = app
        .post_webhook(&provider_event("refund.succeeded", "evt-rf-2", &intent, 20_000), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["eventType"], "refund.succeeded");
    let payment = app.payment(payment_id).await;
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(payment.refunded_amount, Some(20_000));
}
