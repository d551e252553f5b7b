use super::ledger::PaymentLedger;
use super::orders::OrderService;
use crate::config::AppConfig;
use crate::domain::checkout::{CheckoutSessionView, CreateSession, OpenedSession, SessionLineItem};
use crate::domain::order::{OrderId, OrderedProduct};
use crate::domain::ports::SharedCheckoutGateway;
use crate::domain::principal::Principal;
use crate::error::{Result, ServiceError};
use std::sync::Arc;

/// Opens hosted checkout sessions for orders and records the matching Payment.
#[derive(Clone)]
pub struct CheckoutService {
    orders: OrderService,
    ledger: PaymentLedger,
    gateway: SharedCheckoutGateway,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        orders: OrderService,
        ledger: PaymentLedger,
        gateway: SharedCheckoutGateway,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            orders,
            ledger,
            gateway,
            config,
        }
    }

    /// Opens a session for the persisted order total and records an
    /// `intended` Payment for it.
    ///
    /// The provider call and the Payment write are not atomic. If the write
    /// fails the session still exists upstream and the call returns
    /// [`ServiceError::Inconsistency`].
    #[tracing::instrument(skip(self, principal), fields(user_id = principal.user_id))]
    pub async fn create_session(
        &self,
        principal: &Principal,
        order_id: OrderId,
    ) -> Result<OpenedSession> {
        let order = self.orders.get_order(principal, order_id).await?;

        let line_items: Vec<SessionLineItem> = order
            .products
            .iter()
            .filter_map(|line| session_line(line).transpose())
            .collect::<Result<_>>()?;
        if line_items.is_empty() {
            return Err(ServiceError::Validation(format!(
                "order {order_id} has no priced lines to check out"
            )));
        }

        let opened = self
            .gateway
            .create_session(CreateSession {
                order_id,
                line_items,
                return_url: self.config.checkout_return_url(),
            })
            .await
            .map_err(|err| match err {
                ServiceError::Gateway(_) => err,
                other => ServiceError::Gateway(other.to_string()),
            })?;

        if let Err(err) = self
            .ledger
            .record_intended(&order, principal.user_id, &opened.id)
            .await
        {
            tracing::error!(
                order_id,
                session_id = %opened.id,
                error = %err,
                "Checkout session exists upstream with no local payment record"
            );
            return Err(ServiceError::Inconsistency(format!(
                "checkout session {} for order {order_id} has no payment record: {err}",
                opened.id
            )));
        }

        tracing::info!(order_id, session_id = %opened.id, total = %order.total_price, "Checkout session opened");
        Ok(opened)
    }

    /// Reads the provider's view of a session. Never touches local state.
    pub async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSessionView> {
        let session = self.gateway.retrieve_session(session_id, false).await?;
        Ok(CheckoutSessionView::from(&session))
    }
}

/// Unresolved lines are left out, matching how the order total is computed.
fn session_line(line: &OrderedProduct) -> Result<Option<SessionLineItem>> {
    let Some(total) = line.total_price else {
        return Ok(None);
    };
    Ok(Some(SessionLineItem {
        name: line
            .product_name
            .clone()
            .unwrap_or_else(|| format!("Product {}", line.product_id)),
        unit_amount_minor: total.unit_minor_amount(line.quantity)?,
        quantity: line.quantity.get(),
    }))
}
