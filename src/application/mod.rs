//! Application layer: order, checkout and reconciliation services.
//!
//! [`Backend`] wires them over a set of [`Ports`] and owns the background
//! reconciliation workers.

pub mod checkout;
pub mod dispatch;
pub mod keyed_mutex;
pub mod ledger;
pub mod orders;
pub mod pricing;
pub mod reconcile;
pub mod webhook;

use crate::config::AppConfig;
use crate::domain::ports::Ports;
use crate::infrastructure::stripe::signature::WebhookVerifier;
use checkout::CheckoutService;
use dispatch::ReconcileQueue;
use ledger::PaymentLedger;
use orders::OrderService;
use reconcile::ReconciliationEngine;
use std::sync::Arc;
use webhook::WebhookProcessor;

pub struct Backend {
    pub orders: OrderService,
    pub checkout: CheckoutService,
    pub webhooks: WebhookProcessor,
    pub engine: Arc<ReconciliationEngine>,
    pub ports: Ports,
    queue: ReconcileQueue,
}

impl Backend {
    /// Builds every service and starts the reconciliation workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: Arc<AppConfig>, ports: Ports) -> Self {
        let orders = OrderService::new(Arc::clone(&ports.orders), Arc::clone(&ports.catalog));
        let ledger = PaymentLedger::new(Arc::clone(&ports.payments));
        let checkout = CheckoutService::new(
            orders.clone(),
            ledger.clone(),
            Arc::clone(&ports.gateway),
            Arc::clone(&config),
        );
        let engine = Arc::new(ReconciliationEngine::new(
            ledger,
            orders.clone(),
            Arc::clone(&ports.gateway),
            &config.reconcile,
        ));
        let queue = ReconcileQueue::start(
            Arc::clone(&engine),
            Arc::clone(&ports.dead_letters),
            &config.reconcile,
        );
        let verifier = WebhookVerifier::new(
            config.stripe.webhook_secret.clone(),
            config.stripe.signature_tolerance_secs,
        );
        let webhooks = WebhookProcessor::new(verifier, queue.handle());

        Self {
            orders,
            checkout,
            webhooks,
            engine,
            ports,
            queue,
        }
    }

    /// Stops accepting webhooks and waits for queued reconciliations to finish.
    pub async fn shutdown(self) {
        drop(self.webhooks);
        self.queue.shutdown().await;
    }
}
