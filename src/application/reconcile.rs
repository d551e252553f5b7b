//! Propagation of provider payment status into local Payment and Order rows.
//!
//! Every reconciliation for a checkout session runs under that session's lock:
//! the Payment is written first, then the Order. The Order write is retried
//! with a status re-derived from the order's canonical Payment before the job is
//! reported as inconsistent.

use super::dispatch::backoff_delay;
use super::keyed_mutex::KeyedMutex;
use super::ledger::{PaymentLedger, canonical};
use super::orders::OrderService;
use crate::config::ReconcileConfig;
use crate::domain::event::{CheckoutSessionObject, PaymentIntentObject, StatusUpdate};
use crate::domain::job::ReconcileJob;
use crate::domain::order::{OrderId, OrderStatus};
use crate::domain::ports::SharedCheckoutGateway;
use crate::error::{Result, ServiceError};
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Orders that have at least one payment.
    pub examined: usize,
    /// Orders whose status was rewritten.
    pub corrected: usize,
}

pub struct ReconciliationEngine {
    ledger: PaymentLedger,
    orders: OrderService,
    gateway: SharedCheckoutGateway,
    locks: KeyedMutex,
    order_write_attempts: u32,
    base_backoff: Duration,
}

impl ReconciliationEngine {
    pub fn new(
        ledger: PaymentLedger,
        orders: OrderService,
        gateway: SharedCheckoutGateway,
        config: &ReconcileConfig,
    ) -> Self {
        Self {
            ledger,
            orders,
            gateway,
            locks: KeyedMutex::new(),
            order_write_attempts: config.order_write_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
        }
    }

    pub async fn run(&self, job: &ReconcileJob) -> Result<()> {
        match job {
            ReconcileJob::ByIntent { intent, update, .. } => {
                self.reconcile_by_intent(intent, update).await
            }
            ReconcileJob::CompletedSession { session, .. } => {
                self.reconcile_completed_session(session).await
            }
        }
    }

    /// Correlates an intent event to its checkout session, then reconciles by
    /// that session.
    ///
    /// The session comes from the Payment already carrying the intent id, or
    /// else from the provider's own intent-to-session link. `NotFound` means
    /// neither knows the intent yet; the job is retried.
    #[tracing::instrument(skip(self, intent, update), fields(intent_id = %intent.id))]
    pub async fn reconcile_by_intent(
        &self,
        intent: &PaymentIntentObject,
        update: &StatusUpdate,
    ) -> Result<()> {
        let session_id = match self.ledger.by_intent(&intent.id).await? {
            Some(payment) => payment.checkout_session_id,
            None => self
                .gateway
                .session_for_intent(&intent.id)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "checkout session for intent {} (order {:?})",
                        intent.id,
                        intent.order_id()
                    ))
                })?,
        };
        self.reconcile_by_session(&session_id, update, Some(intent.id.clone()))
            .await
    }

    /// Reconciles a completed session, re-fetching it with the intent expanded
    /// when the event payload carries no usable status.
    #[tracing::instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn reconcile_completed_session(&self, session: &CheckoutSessionObject) -> Result<()> {
        let (update, intent_id) = match session.status_update() {
            Some(update) => (update, session.payment_intent_id()),
            None => {
                tracing::debug!("Session event has no payment status, fetching expanded session");
                let fresh = self.gateway.retrieve_session(&session.id, true).await?;
                let update = fresh.status_update().ok_or_else(|| {
                    ServiceError::Validation(format!(
                        "checkout session {} carries no payment status",
                        session.id
                    ))
                })?;
                (update, fresh.payment_intent_id().or(session.payment_intent_id()))
            }
        };
        self.reconcile_by_session(&session.id, &update, intent_id).await
    }

    /// Applies `update` to the Payment of `session_id`, then to its Order.
    ///
    /// Idempotent by value. A terminal Payment is never moved back. Once any
    /// Payment of the order settles it (see [`canonical`]), the Order follows
    /// that Payment instead of the event, so a late event for another session
    /// cannot unsettle a paid order.
    #[tracing::instrument(skip(self, update), fields(payment_status = %update.payment))]
    pub async fn reconcile_by_session(
        &self,
        session_id: &str,
        update: &StatusUpdate,
        payment_intent_id: Option<String>,
    ) -> Result<()> {
        let _guard = self.locks.lock(session_id).await;

        let mut payment = self.ledger.by_session(session_id).await?;
        let previous = payment.status;
        if !payment.apply(update.payment, payment_intent_id, Utc::now()) {
            tracing::warn!(
                current = %previous,
                reported = %update.payment,
                "Stale event for terminal payment skipped"
            );
        }
        self.ledger.save(&payment).await.map_err(|err| match err {
            ServiceError::Persistence(_) => err,
            other => ServiceError::Persistence(other.to_string()),
        })?;

        let order_status = match self.ledger.settled_order_status(payment.order_id).await? {
            Some(settled) => Some(settled),
            None if payment.status == update.payment => update.order.clone(),
            None => payment.status.implied_order_status(),
        };

        let Some(order_status) = order_status else {
            tracing::debug!(order_id = payment.order_id, "Order status left unchanged");
            return Ok(());
        };
        self.write_order_status(session_id, payment.order_id, order_status)
            .await?;
        tracing::info!(
            order_id = payment.order_id,
            payment_status = %payment.status,
            "Payment reconciled"
        );
        Ok(())
    }

    /// The second saga step. Must be called with the session lock held.
    async fn write_order_status(
        &self,
        session_id: &str,
        order_id: OrderId,
        mut status: OrderStatus,
    ) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.orders.set_status(order_id, status.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt >= self.order_write_attempts => {
                    tracing::error!(
                        order_id,
                        attempt,
                        error = %err,
                        "Order write failed after payment was updated"
                    );
                    return Err(ServiceError::Inconsistency(format!(
                        "payment for session {session_id} updated but order {order_id} is not: {err}"
                    )));
                }
                Err(err) => {
                    tracing::warn!(order_id, attempt, error = %err, "Order write failed, retrying");
                    tokio::time::sleep(backoff_delay(self.base_backoff, attempt)).await;
                    attempt += 1;
                    if let Ok(Some(settled)) = self.ledger.settled_order_status(order_id).await {
                        status = settled;
                    }
                }
            }
        }
    }

    /// Re-derives every paid-for order's status from its canonical payment and
    /// rewrites the ones that diverge.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        for (order_id, payments) in self.ledger.by_order().await? {
            report.examined += 1;
            let Some(canonical) = canonical(&payments) else {
                continue;
            };
            let Some(expected) = canonical.status.implied_order_status() else {
                continue;
            };

            let _guard = self.locks.lock(&canonical.checkout_session_id).await;
            let order = match self.orders.get_order_unrestricted(order_id).await {
                Ok(order) => order,
                Err(ServiceError::NotFound(_)) => {
                    tracing::warn!(order_id, "Payments reference a missing order");
                    continue;
                }
                Err(err) => return Err(err),
            };
            if order.status != expected {
                tracing::info!(
                    order_id,
                    from = %order.status,
                    to = %expected,
                    "Sweep corrected order status"
                );
                self.orders.set_status(order_id, expected).await?;
                report.corrected += 1;
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Price, Quantity};
    use crate::domain::order::{LineItem, OrderDraft};
    use crate::domain::payment::PaymentStatus;
    use crate::domain::ports::{OrderStore, PaymentStore};
    use crate::domain::principal::Principal;
    use crate::domain::product::Product;
    use crate::infrastructure::in_memory::{
        InMemoryCatalog, InMemoryCheckoutGateway, InMemoryOrderStore, InMemoryPaymentStore,
    };
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct Fixture {
        engine: ReconciliationEngine,
        orders: InMemoryOrderStore,
        payments: InMemoryPaymentStore,
        ledger: PaymentLedger,
        gateway: InMemoryCheckoutGateway,
        order_id: OrderId,
    }

    fn open_session(id: &str, order_id: OrderId) -> CheckoutSessionObject {
        CheckoutSessionObject {
            id: id.to_string(),
            status: Some("open".into()),
            payment_status: Some("unpaid".into()),
            customer_details: None,
            payment_intent: None,
            metadata: HashMap::from([("order_id".to_string(), order_id.to_string())]),
        }
    }

    async fn fixture() -> Fixture {
        let orders = InMemoryOrderStore::new();
        let payments = InMemoryPaymentStore::new();
        let catalog = InMemoryCatalog::with_products([Product {
            id: 1,
            title: "Tea".into(),
            price: Price::new(dec!(10.00)),
            number_in_stock: Some(1),
        }])
        .await;
        let order_service = OrderService::new(Arc::new(orders.clone()), Arc::new(catalog));
        let ledger = PaymentLedger::new(Arc::new(payments.clone()));
        let order = order_service
            .create_order(
                &Principal::private(7),
                OrderDraft::new(vec![LineItem::new(1, Quantity::new(1).unwrap())]),
            )
            .await
            .unwrap();
        ledger.record_intended(&order, 7, "cs_1").await.unwrap();
        let gateway = InMemoryCheckoutGateway::new();
        gateway.put_session(open_session("cs_1", order.id)).await;

        let config = ReconcileConfig {
            base_backoff_ms: 1,
            ..ReconcileConfig::default()
        };
        let engine = ReconciliationEngine::new(
            ledger.clone(),
            order_service,
            Arc::new(gateway.clone()),
            &config,
        );
        Fixture {
            engine,
            orders,
            payments,
            ledger,
            gateway,
            order_id: order.id,
        }
    }

    fn intent(id: &str, order_id: Option<OrderId>) -> PaymentIntentObject {
        let mut metadata = HashMap::new();
        if let Some(order_id) = order_id {
            metadata.insert("order_id".to_string(), order_id.to_string());
        }
        PaymentIntentObject {
            id: id.to_string(),
            status: None,
            metadata,
        }
    }

    async fn order_status(f: &Fixture) -> OrderStatus {
        f.orders.get_order(f.order_id).await.unwrap().unwrap().status
    }

    /// Records a second session for the fixture order.
    async fn second_session(f: &Fixture) {
        let order = f.orders.get_order(f.order_id).await.unwrap().unwrap();
        f.ledger.record_intended(&order, 7, "cs_2").await.unwrap();
        f.gateway.put_session(open_session("cs_2", f.order_id)).await;
    }

    #[tokio::test]
    async fn test_success_marks_payment_and_order() {
        let f = fixture().await;
        let update = StatusUpdate::for_intent_event("payment_intent.succeeded").unwrap();
        f.engine
            .reconcile_by_session("cs_1", &update, Some("pi_1".into()))
            .await
            .unwrap();

        let payment = f.ledger.by_session("cs_1").await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payment.payment_intent_id.as_deref(), Some("pi_1"));
        assert_eq!(order_status(&f).await, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_stale_created_does_not_regress() {
        let f = fixture().await;
        let succeeded = StatusUpdate::for_intent_event("payment_intent.succeeded").unwrap();
        let created = StatusUpdate::for_intent_event("payment_intent.created").unwrap();
        f.engine
            .reconcile_by_session("cs_1", &succeeded, Some("pi_1".into()))
            .await
            .unwrap();
        f.engine
            .reconcile_by_intent(&intent("pi_1", Some(f.order_id)), &created)
            .await
            .unwrap();

        assert_eq!(
            f.ledger.by_session("cs_1").await.unwrap().status,
            PaymentStatus::Success
        );
        assert_eq!(order_status(&f).await, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_intent_correlates_through_provider_session() {
        let f = fixture().await;
        second_session(&f).await;
        f.gateway.attach_intent("cs_1", "pi_9").await.unwrap();

        let succeeded = StatusUpdate::for_intent_event("payment_intent.succeeded").unwrap();
        f.engine
            .reconcile_by_intent(&intent("pi_9", Some(f.order_id)), &succeeded)
            .await
            .unwrap();

        let first = f.ledger.by_session("cs_1").await.unwrap();
        assert_eq!(first.status, PaymentStatus::Success);
        assert_eq!(first.payment_intent_id.as_deref(), Some("pi_9"));
        let second = f.ledger.by_session("cs_2").await.unwrap();
        assert_eq!(second.status, PaymentStatus::Intended);
        assert_eq!(second.payment_intent_id, None);
        assert_eq!(order_status(&f).await, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_created_event_sets_intended_order_status() {
        let f = fixture().await;
        f.gateway.attach_intent("cs_1", "pi_9").await.unwrap();
        let created = StatusUpdate::for_intent_event("payment_intent.created").unwrap();
        f.engine
            .reconcile_by_intent(&intent("pi_9", Some(f.order_id)), &created)
            .await
            .unwrap();

        let payment = f.ledger.by_session("cs_1").await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Created);
        assert_eq!(order_status(&f).await, OrderStatus::Other("intended".into()));
    }

    #[tokio::test]
    async fn test_event_for_newer_session_keeps_paid_order() {
        let f = fixture().await;
        let succeeded = StatusUpdate::for_intent_event("payment_intent.succeeded").unwrap();
        f.engine
            .reconcile_by_session("cs_1", &succeeded, Some("pi_1".into()))
            .await
            .unwrap();
        second_session(&f).await;

        let created = StatusUpdate::for_intent_event("payment_intent.created").unwrap();
        f.engine
            .reconcile_by_session("cs_2", &created, Some("pi_2".into()))
            .await
            .unwrap();

        assert_eq!(
            f.ledger.by_session("cs_2").await.unwrap().status,
            PaymentStatus::Created
        );
        assert_eq!(order_status(&f).await, OrderStatus::Paid);
        assert_eq!(f.engine.sweep().await.unwrap().corrected, 0);
    }

    #[tokio::test]
    async fn test_unknown_intent_is_retryable_not_found() {
        let f = fixture().await;
        let update = StatusUpdate::for_intent_event("payment_intent.succeeded").unwrap();
        let err = f
            .engine
            .reconcile_by_intent(&intent("pi_x", Some(f.order_id)), &update)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(err.is_retryable());
        assert_eq!(
            f.ledger.by_session("cs_1").await.unwrap().status,
            PaymentStatus::Intended
        );
    }

    #[tokio::test]
    async fn test_non_settling_status_leaves_order_alone() {
        let f = fixture().await;
        let update = StatusUpdate::for_intent_event("payment_intent.processing").unwrap();
        f.engine
            .reconcile_by_session("cs_1", &update, None)
            .await
            .unwrap();
        assert_eq!(
            f.ledger.by_session("cs_1").await.unwrap().status,
            PaymentStatus::Processing
        );
        assert_eq!(order_status(&f).await, OrderStatus::Created);
    }

    #[tokio::test]
    async fn test_sweep_repairs_diverged_order() {
        let f = fixture().await;
        let mut payment = f.ledger.by_session("cs_1").await.unwrap();
        payment.apply(PaymentStatus::Success, Some("pi_1".into()), Utc::now());
        f.payments.update_payment(&payment).await.unwrap();

        let report = f.engine.sweep().await.unwrap();
        assert_eq!(report, SweepReport { examined: 1, corrected: 1 });
        assert_eq!(order_status(&f).await, OrderStatus::Paid);

        let again = f.engine.sweep().await.unwrap();
        assert_eq!(again.corrected, 0);
    }
}
