#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use estore::application::Backend;
use estore::config::AppConfig;
use estore::domain::checkout::{CreateSession, OpenedSession};
use estore::domain::event::CheckoutSessionObject;
use estore::domain::money::{Price, Quantity};
use estore::domain::order::{LineItem, Order, OrderId, OrderStatus, OrderedProduct};
use estore::domain::payment::Payment;
use estore::application::webhook::WebhookAck;
use estore::domain::job::DeadLetter;
use estore::domain::order::OrderDraft;
use estore::domain::ports::{CheckoutGateway, DeadLetterStore, OrderStore, PaymentStore, Ports};
use estore::domain::principal::Principal;
use estore::domain::product::Product;
use estore::error::{Result, ServiceError};
use estore::infrastructure::in_memory::{
    InMemoryCatalog, InMemoryCheckoutGateway, InMemoryDeadLetterStore, InMemoryOrderStore,
    InMemoryPaymentStore,
};
use estore::infrastructure::stripe::signature::WebhookVerifier;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Number of upcoming calls that should fail. `u32::MAX` fails forever.
#[derive(Default)]
pub struct Fault(AtomicU32);

impl Fault {
    pub fn fail_times(&self, times: u32) {
        self.0.store(times, Ordering::SeqCst);
    }

    pub fn fail_always(&self) {
        self.fail_times(u32::MAX);
    }

    pub fn heal(&self) {
        self.fail_times(0);
    }

    pub fn trips(&self) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                u32::MAX => Some(left),
                n => Some(n - 1),
            })
            .is_ok()
    }

    pub fn check(&self, what: &str) -> Result<()> {
        if self.trips() {
            return Err(ServiceError::Persistence(format!("injected failure: {what}")));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FlakyOrderStore {
    pub inner: InMemoryOrderStore,
    pub insert_lines: Fault,
    pub delete_lines: Fault,
    pub delete_order: Fault,
    pub set_status: Fault,
}

#[async_trait]
impl OrderStore for FlakyOrderStore {
    async fn insert_order(&self, order: Order) -> Result<Order> {
        self.inner.insert_order(order).await
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        self.inner.update_order(order).await
    }

    async fn set_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.set_status.check("set_order_status")?;
        self.inner.set_order_status(order_id, status, updated_at).await
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.inner.get_order(order_id).await
    }

    async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        self.delete_order.check("delete_order")?;
        self.inner.delete_order(order_id).await
    }

    async fn insert_lines(&self, lines: Vec<OrderedProduct>) -> Result<Vec<OrderedProduct>> {
        self.insert_lines.check("insert_lines")?;
        self.inner.insert_lines(lines).await
    }

    async fn delete_lines(&self, order_id: OrderId) -> Result<()> {
        self.delete_lines.check("delete_lines")?;
        self.inner.delete_lines(order_id).await
    }

    async fn lines(&self, order_id: OrderId) -> Result<Vec<OrderedProduct>> {
        self.inner.lines(order_id).await
    }
}

#[derive(Default)]
pub struct FlakyPaymentStore {
    pub inner: InMemoryPaymentStore,
    pub insert: Fault,
    pub find: Fault,
    /// Panics instead of failing.
    pub panic_on_find: Fault,
}

#[async_trait]
impl PaymentStore for FlakyPaymentStore {
    async fn insert_payment(&self, payment: Payment) -> Result<Payment> {
        self.insert.check("insert_payment")?;
        self.inner.insert_payment(payment).await
    }

    async fn update_payment(&self, payment: &Payment) -> Result<()> {
        self.inner.update_payment(payment).await
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<Payment>> {
        if self.panic_on_find.trips() {
            panic!("injected panic looking up {session_id}");
        }
        self.find.check("find_by_session")?;
        self.inner.find_by_session(session_id).await
    }

    async fn find_by_intent(&self, payment_intent_id: &str) -> Result<Option<Payment>> {
        self.inner.find_by_intent(payment_intent_id).await
    }

    async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        self.inner.payments_for_order(order_id).await
    }

    async fn all_payments(&self) -> Result<Vec<Payment>> {
        self.inner.all_payments().await
    }
}

#[derive(Default)]
pub struct FlakyGateway {
    pub inner: InMemoryCheckoutGateway,
    pub create: Fault,
}

#[async_trait]
impl CheckoutGateway for FlakyGateway {
    async fn create_session(&self, request: CreateSession) -> Result<OpenedSession> {
        if self.create.trips() {
            return Err(ServiceError::Gateway("injected provider outage".into()));
        }
        self.inner.create_session(request).await
    }

    async fn retrieve_session(
        &self,
        session_id: &str,
        expand_payment_intent: bool,
    ) -> Result<CheckoutSessionObject> {
        self.inner
            .retrieve_session(session_id, expand_payment_intent)
            .await
    }

    async fn session_for_intent(&self, payment_intent_id: &str) -> Result<Option<String>> {
        self.inner.session_for_intent(payment_intent_id).await
    }
}

/// The adapters behind a running backend, kept for inspection.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<FlakyOrderStore>,
    pub payments: Arc<FlakyPaymentStore>,
    pub catalog: InMemoryCatalog,
    pub dead_letters: InMemoryDeadLetterStore,
    pub gateway: Arc<FlakyGateway>,
}

impl Stores {
    pub async fn order(&self, order_id: OrderId) -> Option<Order> {
        self.orders.inner.get_order(order_id).await.unwrap()
    }

    pub async fn payment(&self, session_id: &str) -> Option<Payment> {
        self.payments.inner.find_by_session(session_id).await.unwrap()
    }

    pub async fn payment_count(&self) -> usize {
        self.payments.inner.all_payments().await.unwrap().len()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.all().await.unwrap()
    }
}

pub struct TestApp {
    pub backend: Backend,
    pub stores: Stores,
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.stripe.webhook_secret = SecretString::from(WEBHOOK_SECRET.to_string());
    config.reconcile.workers = 2;
    config.reconcile.max_attempts = 3;
    config.reconcile.base_backoff_ms = 1;
    config
}

/// Products 1 (10.00, in stock), 2 (25.50, sold out) and 3 (3.33, in stock).
pub async fn seeded_catalog() -> InMemoryCatalog {
    InMemoryCatalog::with_products([
        product(1, "Green tea", Price::new(dec!(10.00)), Some(4)),
        product(2, "Teapot", Price::new(dec!(25.50)), Some(0)),
        product(3, "Sugar", Price::new(dec!(3.33)), Some(10)),
    ])
    .await
}

pub fn product(id: i64, title: &str, price: Price, stock: Option<i64>) -> Product {
    Product {
        id,
        title: title.to_string(),
        price,
        number_in_stock: stock,
    }
}

pub fn line(product_id: i64, quantity: i64) -> LineItem {
    LineItem::new(product_id, Quantity::new(quantity).unwrap())
}

impl TestApp {
    pub async fn start() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let stores = Stores {
            orders: Arc::new(FlakyOrderStore::default()),
            payments: Arc::new(FlakyPaymentStore::default()),
            catalog: seeded_catalog().await,
            dead_letters: InMemoryDeadLetterStore::new(),
            gateway: Arc::new(FlakyGateway::default()),
        };
        let ports = Ports {
            orders: stores.orders.clone(),
            payments: stores.payments.clone(),
            catalog: Arc::new(stores.catalog.clone()),
            dead_letters: Arc::new(stores.dead_letters.clone()),
            gateway: stores.gateway.clone(),
        };
        let backend = Backend::start(Arc::new(config), ports);
        Self { backend, stores }
    }

    /// Creates an order for user 7 (two green teas), opens a session for it
    /// and links payment intent `pi_1` to that session.
    pub async fn checked_out(&self) -> (OrderId, String) {
        let caller = Principal::private(7);
        let order = self
            .backend
            .orders
            .create_order(&caller, OrderDraft::new(vec![line(1, 2)]))
            .await
            .unwrap();
        let opened = self
            .backend
            .checkout
            .create_session(&caller, order.id)
            .await
            .unwrap();
        self.stores
            .gateway
            .inner
            .attach_intent(&opened.id, "pi_1")
            .await
            .unwrap();
        (order.id, opened.id)
    }

    /// Opens one more session for an existing order of user 7.
    pub async fn open_session(&self, order_id: OrderId) -> String {
        self.backend
            .checkout
            .create_session(&Principal::private(7), order_id)
            .await
            .unwrap()
            .id
    }

    /// Delivers `body` with a valid signature.
    pub fn deliver(&self, body: &str) -> Result<WebhookAck> {
        self.backend.webhooks.process(body.as_bytes(), &sign(body))
    }
}

/// A `Stripe-Signature` header for `body`, signed now with the test secret.
pub fn sign(body: &str) -> String {
    WebhookVerifier::new(SecretString::from(WEBHOOK_SECRET.to_string()), 300)
        .sign(body.as_bytes(), Utc::now().timestamp())
        .unwrap()
}

pub fn intent_event(event_id: &str, event_type: &str, intent_id: &str, order_id: OrderId) -> String {
    json!({
        "id": event_id,
        "type": event_type,
        "data": {
            "object": {
                "id": intent_id,
                "object": "payment_intent",
                "status": event_type.trim_start_matches("payment_intent."),
                "metadata": { "order_id": order_id.to_string() }
            }
        }
    })
    .to_string()
}

pub fn session_event(event_id: &str, session: serde_json::Value) -> String {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "object": session }
    })
    .to_string()
}
