use crate::domain::checkout::{CreateSession, OpenedSession};
use crate::domain::event::{
    CheckoutSessionObject, Expandable, ORDER_ID_METADATA_KEY, PaymentIntentObject,
};
use crate::domain::job::DeadLetter;
use crate::domain::order::{LineId, Order, OrderId, OrderStatus, OrderedProduct};
use crate::domain::payment::{Payment, PaymentId};
use crate::domain::ports::{Catalog, CheckoutGateway, DeadLetterStore, OrderStore, PaymentStore};
use crate::domain::product::{Product, ProductId};
use crate::error::{Result, ServiceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

/// A thread-safe in-memory store for order headers and lines.
///
/// Headers and lines live in separate maps, like the two tables they model.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<BTreeMap<OrderId, Order>>>,
    lines: Arc<RwLock<BTreeMap<LineId, OrderedProduct>>>,
    order_seq: Arc<AtomicI64>,
    line_seq: Arc<AtomicI64>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert_order(&self, mut order: Order) -> Result<Order> {
        order.id = self.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
        order.products.clear();
        let mut orders = self.orders.write().await;
        orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        let stored = orders
            .get_mut(&order.id)
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order.id)))?;
        stored.user_id = order.user_id;
        stored.total_price = order.total_price;
        stored.delivery_info = order.delivery_info.clone();
        stored.updated_at = order.updated_at;
        Ok(())
    }

    async fn set_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut orders = self.orders.write().await;
        let stored = orders
            .get_mut(&order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))?;
        stored.status = status;
        stored.updated_at = updated_at;
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.get(&order_id).cloned())
    }

    async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        let mut orders = self.orders.write().await;
        orders.remove(&order_id);
        Ok(())
    }

    async fn insert_lines(&self, lines: Vec<OrderedProduct>) -> Result<Vec<OrderedProduct>> {
        let mut stored = self.lines.write().await;
        let mut inserted = Vec::with_capacity(lines.len());
        for mut line in lines {
            line.id = self.line_seq.fetch_add(1, Ordering::SeqCst) + 1;
            stored.insert(line.id, line.clone());
            inserted.push(line);
        }
        Ok(inserted)
    }

    async fn delete_lines(&self, order_id: OrderId) -> Result<()> {
        let mut stored = self.lines.write().await;
        stored.retain(|_, line| line.order_id != order_id);
        Ok(())
    }

    async fn lines(&self, order_id: OrderId) -> Result<Vec<OrderedProduct>> {
        let stored = self.lines.read().await;
        Ok(stored
            .values()
            .filter(|line| line.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct PaymentTable {
    rows: BTreeMap<PaymentId, Payment>,
    by_session: HashMap<String, PaymentId>,
}

/// A thread-safe in-memory payment store with a unique checkout-session index.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    table: Arc<RwLock<PaymentTable>>,
    seq: Arc<AtomicI64>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert_payment(&self, mut payment: Payment) -> Result<Payment> {
        let mut table = self.table.write().await;
        if table.by_session.contains_key(&payment.checkout_session_id) {
            return Err(ServiceError::Persistence(format!(
                "duplicate checkout session id {}",
                payment.checkout_session_id
            )));
        }
        payment.id = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        table
            .by_session
            .insert(payment.checkout_session_id.clone(), payment.id);
        table.rows.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn update_payment(&self, payment: &Payment) -> Result<()> {
        let mut table = self.table.write().await;
        let stored = table
            .rows
            .get_mut(&payment.id)
            .ok_or_else(|| ServiceError::NotFound(format!("payment {}", payment.id)))?;
        if stored.checkout_session_id != payment.checkout_session_id {
            return Err(ServiceError::Persistence(format!(
                "checkout session id of payment {} is immutable",
                payment.id
            )));
        }
        *stored = payment.clone();
        Ok(())
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<Payment>> {
        let table = self.table.read().await;
        Ok(table
            .by_session
            .get(session_id)
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn find_by_intent(&self, payment_intent_id: &str) -> Result<Option<Payment>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .find(|p| p.payment_intent_id.as_deref() == Some(payment_intent_id))
            .cloned())
    }

    async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn all_payments(&self) -> Result<Vec<Payment>> {
        let table = self.table.read().await;
        Ok(table.rows.values().cloned().collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryCatalog {
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let catalog = Self::new();
        {
            let mut map = catalog.products.write().await;
            for product in products {
                map.insert(product.id, product);
            }
        }
        catalog
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn products(&self, ids: &[ProductId]) -> Result<Vec<Product>> {
        let map = self.products.read().await;
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }

    async fn put_product(&self, product: Product) -> Result<()> {
        let mut map = self.products.write().await;
        map.insert(product.id, product);
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryDeadLetterStore {
    letters: Arc<RwLock<Vec<DeadLetter>>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn push(&self, letter: DeadLetter) -> Result<()> {
        self.letters.write().await.push(letter);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.letters.read().await.clone())
    }
}

/// A checkout gateway that keeps sessions in process memory.
///
/// Sessions open with no payment intent; [`InMemoryCheckoutGateway::complete`]
/// plays the part of the customer finishing the hosted flow.
#[derive(Default, Clone)]
pub struct InMemoryCheckoutGateway {
    sessions: Arc<RwLock<HashMap<String, CheckoutSessionObject>>>,
    requests: Arc<RwLock<Vec<CreateSession>>>,
}

impl InMemoryCheckoutGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every session request received so far, oldest first.
    pub async fn requests(&self) -> Vec<CreateSession> {
        self.requests.read().await.clone()
    }

    /// Marks a session complete with an attached payment intent.
    pub async fn complete(
        &self,
        session_id: &str,
        payment_intent_id: &str,
        intent_status: &str,
    ) -> Result<CheckoutSessionObject> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ServiceError::NotFound(format!("checkout session {session_id}")))?;
        session.status = Some("complete".to_string());
        session.payment_status = Some(
            match intent_status {
                "succeeded" => "paid",
                _ => "unpaid",
            }
            .to_string(),
        );
        session.payment_intent = Some(Expandable::Object(PaymentIntentObject {
            id: payment_intent_id.to_string(),
            status: Some(intent_status.to_string()),
            metadata: session.metadata.clone(),
        }));
        Ok(session.clone())
    }

    /// Links a payment intent to an open session, as the provider does once
    /// the customer starts paying.
    pub async fn attach_intent(&self, session_id: &str, payment_intent_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ServiceError::NotFound(format!("checkout session {session_id}")))?;
        session.payment_intent = Some(Expandable::Object(PaymentIntentObject {
            id: payment_intent_id.to_string(),
            status: Some("requires_payment_method".to_string()),
            metadata: session.metadata.clone(),
        }));
        Ok(())
    }

    /// Replaces a stored session wholesale.
    pub async fn put_session(&self, session: CheckoutSessionObject) {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
    }
}

#[async_trait]
impl CheckoutGateway for InMemoryCheckoutGateway {
    async fn create_session(&self, request: CreateSession) -> Result<OpenedSession> {
        let id = format!("cs_test_{}", uuid::Uuid::new_v4().simple());
        let client_secret = format!("{id}_secret_{}", uuid::Uuid::new_v4().simple());
        let session = CheckoutSessionObject {
            id: id.clone(),
            status: Some("open".to_string()),
            payment_status: Some("unpaid".to_string()),
            customer_details: None,
            payment_intent: None,
            metadata: HashMap::from([(
                ORDER_ID_METADATA_KEY.to_string(),
                request.order_id.to_string(),
            )]),
        };
        self.sessions.write().await.insert(id.clone(), session);
        self.requests.write().await.push(request);
        Ok(OpenedSession { id, client_secret })
    }

    async fn retrieve_session(
        &self,
        session_id: &str,
        expand_payment_intent: bool,
    ) -> Result<CheckoutSessionObject> {
        let sessions = self.sessions.read().await;
        let mut session = sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("checkout session {session_id}")))?;
        if !expand_payment_intent
            && let Some(Expandable::Object(intent)) = &session.payment_intent
        {
            session.payment_intent = Some(Expandable::Id(intent.id.clone()));
        }
        Ok(session)
    }

    async fn session_for_intent(&self, payment_intent_id: &str) -> Result<Option<String>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .find(|session| session.payment_intent_id().as_deref() == Some(payment_intent_id))
            .map(|session| session.id.clone()))
    }
}
