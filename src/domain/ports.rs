use super::checkout::{CreateSession, OpenedSession};
use super::event::CheckoutSessionObject;
use super::job::DeadLetter;
use super::order::{Order, OrderId, OrderStatus, OrderedProduct};
use super::payment::Payment;
use super::product::{Product, ProductId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Order headers and their lines. No operation spans more than one row set.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a header and returns it with the assigned id.
    async fn insert_order(&self, order: Order) -> Result<Order>;
    /// Overwrites owner, total, delivery info and `updated_at`; status and
    /// `created_at` keep their stored values.
    async fn update_order(&self, order: &Order) -> Result<()>;
    async fn set_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;
    async fn delete_order(&self, order_id: OrderId) -> Result<()>;
    /// Inserts lines in order and returns them with assigned ids.
    async fn insert_lines(&self, lines: Vec<OrderedProduct>) -> Result<Vec<OrderedProduct>>;
    async fn delete_lines(&self, order_id: OrderId) -> Result<()>;
    async fn lines(&self, order_id: OrderId) -> Result<Vec<OrderedProduct>>;
}

/// Payment records with a unique checkout-session index.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Fails when a payment for the same checkout session already exists.
    async fn insert_payment(&self, payment: Payment) -> Result<Payment>;
    async fn update_payment(&self, payment: &Payment) -> Result<()>;
    async fn find_by_session(&self, session_id: &str) -> Result<Option<Payment>>;
    async fn find_by_intent(&self, payment_intent_id: &str) -> Result<Option<Payment>>;
    async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>>;
    async fn all_payments(&self) -> Result<Vec<Payment>>;
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Batched lookup; ids that do not exist are simply absent from the result.
    async fn products(&self, ids: &[ProductId]) -> Result<Vec<Product>>;
    async fn put_product(&self, product: Product) -> Result<()>;
}

#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn push(&self, letter: DeadLetter) -> Result<()>;
    async fn all(&self) -> Result<Vec<DeadLetter>>;
}

/// The hosted checkout provider.
#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    async fn create_session(&self, request: CreateSession) -> Result<OpenedSession>;
    async fn retrieve_session(
        &self,
        session_id: &str,
        expand_payment_intent: bool,
    ) -> Result<CheckoutSessionObject>;
    /// The session that owns a payment intent, once the provider has linked them.
    async fn session_for_intent(&self, payment_intent_id: &str) -> Result<Option<String>>;
}

pub type SharedOrderStore = Arc<dyn OrderStore>;
pub type SharedPaymentStore = Arc<dyn PaymentStore>;
pub type SharedCatalog = Arc<dyn Catalog>;
pub type SharedDeadLetterStore = Arc<dyn DeadLetterStore>;
pub type SharedCheckoutGateway = Arc<dyn CheckoutGateway>;

/// Every adapter the application layer needs, bundled for wiring.
#[derive(Clone)]
pub struct Ports {
    pub orders: SharedOrderStore,
    pub payments: SharedPaymentStore,
    pub catalog: SharedCatalog,
    pub dead_letters: SharedDeadLetterStore,
    pub gateway: SharedCheckoutGateway,
}
