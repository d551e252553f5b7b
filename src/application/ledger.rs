use crate::domain::order::{Order, OrderId, OrderStatus};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::SharedPaymentStore;
use crate::domain::principal::UserId;
use crate::error::{Result, ServiceError};
use chrono::Utc;
use std::collections::BTreeMap;

/// Payment records keyed by checkout-session id, with intent id and order id
/// as secondary lookups.
#[derive(Clone)]
pub struct PaymentLedger {
    payments: SharedPaymentStore,
}

impl PaymentLedger {
    pub fn new(payments: SharedPaymentStore) -> Self {
        Self { payments }
    }

    /// Records a fresh `intended` payment for the full order total.
    pub async fn record_intended(
        &self,
        order: &Order,
        user_id: UserId,
        checkout_session_id: &str,
    ) -> Result<Payment> {
        let payment = Payment::intended(order, user_id, checkout_session_id, Utc::now());
        self.payments.insert_payment(payment).await
    }

    pub async fn by_session(&self, session_id: &str) -> Result<Payment> {
        self.payments
            .find_by_session(session_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment for checkout session {session_id}")))
    }

    pub async fn by_intent(&self, payment_intent_id: &str) -> Result<Option<Payment>> {
        self.payments.find_by_intent(payment_intent_id).await
    }

    pub async fn for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        self.payments.payments_for_order(order_id).await
    }

    /// The order status settled by the order's canonical payment, if any.
    pub async fn settled_order_status(&self, order_id: OrderId) -> Result<Option<OrderStatus>> {
        let payments = self.for_order(order_id).await?;
        Ok(canonical(&payments).and_then(|payment| payment.status.implied_order_status()))
    }

    pub async fn save(&self, payment: &Payment) -> Result<()> {
        self.payments.update_payment(payment).await
    }

    /// All payments grouped by order id.
    pub async fn by_order(&self) -> Result<BTreeMap<OrderId, Vec<Payment>>> {
        let mut grouped: BTreeMap<OrderId, Vec<Payment>> = BTreeMap::new();
        for payment in self.payments.all_payments().await? {
            grouped.entry(payment.order_id).or_default().push(payment);
        }
        Ok(grouped)
    }
}

/// The payment whose status decides an order's status: a successful one if
/// any, otherwise the most recent.
pub fn canonical(payments: &[Payment]) -> Option<&Payment> {
    payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Success)
        .max_by_key(|p| (p.updated_at, p.id))
        .or_else(|| payments.iter().max_by_key(|p| (p.created_at, p.id)))
}
