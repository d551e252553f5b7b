mod common;

use common::{TestApp, intent_event, session_event, test_config};
use estore::domain::event::CheckoutSessionObject;
use estore::domain::order::OrderStatus;
use estore::domain::payment::PaymentStatus;
use serde_json::json;
use std::collections::HashMap;

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let app = TestApp::start().await;
    let (order_id, session_id) = app.checked_out().await;
    app.stores.payments.find.fail_times(2);

    app.deliver(&intent_event("evt_1", "payment_intent.succeeded", "pi_1", order_id))
        .unwrap();

    let TestApp { backend, stores } = app;
    backend.shutdown().await;
    assert!(!stores.payments.find.trips());
    assert_eq!(
        stores.payment(&session_id).await.unwrap().status,
        PaymentStatus::Success
    );
    assert_eq!(stores.order(order_id).await.unwrap().status, OrderStatus::Paid);
    assert!(stores.dead_letters().await.is_empty());
}

#[tokio::test]
async fn test_exhausted_job_is_dead_lettered() {
    let app = TestApp::start().await;
    let (order_id, session_id) = app.checked_out().await;
    app.stores.payments.find.fail_always();

    app.deliver(&intent_event("evt_1", "payment_intent.succeeded", "pi_1", order_id))
        .unwrap();

    let TestApp { backend, stores } = app;
    backend.shutdown().await;
    let letters = stores.dead_letters().await;
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].attempts, 3);
    assert_eq!(letters[0].job.event_id(), "evt_1");
    assert!(letters[0].last_error.contains("injected failure"));

    stores.payments.find.heal();
    assert_eq!(
        stores.payment(&session_id).await.unwrap().status,
        PaymentStatus::Intended
    );
}

#[tokio::test]
async fn test_permanent_failure_is_dead_lettered_at_once() {
    let app = TestApp::start().await;
    let (_, session_id) = app.checked_out().await;
    app.stores
        .gateway
        .inner
        .put_session(CheckoutSessionObject {
            id: session_id.clone(),
            status: Some("complete".to_string()),
            payment_status: None,
            customer_details: None,
            payment_intent: None,
            metadata: HashMap::new(),
        })
        .await;

    app.deliver(&session_event("evt_1", json!({ "id": session_id })))
        .unwrap();

    let TestApp { backend, stores } = app;
    backend.shutdown().await;
    let letters = stores.dead_letters().await;
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].attempts, 1);
    assert_eq!(letters[0].job.kind(), "completed_session");
}

#[tokio::test]
async fn test_panicking_attempt_is_retried() {
    let app = TestApp::start().await;
    let (order_id, _) = app.checked_out().await;
    app.stores.payments.panic_on_find.fail_times(1);

    app.deliver(&intent_event("evt_1", "payment_intent.succeeded", "pi_1", order_id))
        .unwrap();

    let TestApp { backend, stores } = app;
    backend.shutdown().await;
    assert_eq!(stores.order(order_id).await.unwrap().status, OrderStatus::Paid);
    assert!(stores.dead_letters().await.is_empty());
}

#[tokio::test]
async fn test_order_write_is_retried_inside_saga() {
    let app = TestApp::start().await;
    let (order_id, _) = app.checked_out().await;
    app.stores.orders.set_status.fail_times(1);

    app.deliver(&intent_event("evt_1", "payment_intent.succeeded", "pi_1", order_id))
        .unwrap();

    let TestApp { backend, stores } = app;
    backend.shutdown().await;
    assert_eq!(stores.order(order_id).await.unwrap().status, OrderStatus::Paid);
    assert!(stores.dead_letters().await.is_empty());
}

#[tokio::test]
async fn test_sweep_repairs_divergent_order() {
    let mut config = test_config();
    config.reconcile.order_write_attempts = 2;
    config.reconcile.max_attempts = 2;
    let app = TestApp::with_config(config).await;
    let (order_id, session_id) = app.checked_out().await;
    app.stores.orders.set_status.fail_always();

    app.deliver(&intent_event("evt_1", "payment_intent.succeeded", "pi_1", order_id))
        .unwrap();

    let TestApp { backend, stores } = app;
    let engine = backend.engine.clone();
    backend.shutdown().await;

    let letters = stores.dead_letters().await;
    assert_eq!(letters.len(), 1);
    assert!(letters[0].last_error.contains("is not"));
    assert_eq!(
        stores.payment(&session_id).await.unwrap().status,
        PaymentStatus::Success
    );
    assert_eq!(stores.order(order_id).await.unwrap().status, OrderStatus::Created);

    stores.orders.set_status.heal();
    let report = engine.sweep().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.corrected, 1);
    assert_eq!(stores.order(order_id).await.unwrap().status, OrderStatus::Paid);

    let again = engine.sweep().await.unwrap();
    assert_eq!(again.corrected, 0);
}
