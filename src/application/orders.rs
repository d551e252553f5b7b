use super::pricing::PriceSnapshotCalculator;
use crate::domain::order::{Order, OrderDraft, OrderId, OrderStatus, OrderedProduct};
use crate::domain::ports::{SharedCatalog, SharedOrderStore};
use crate::domain::principal::Principal;
use crate::error::{Result, ServiceError};
use chrono::Utc;
use std::collections::HashMap;

/// Order create/replace/delete/fetch over a store without multi-table
/// transactions.
///
/// Every write is a sequence of independent row operations. Readers may see
/// an order with no lines while an update is in flight.
#[derive(Clone)]
pub struct OrderService {
    orders: SharedOrderStore,
    catalog: SharedCatalog,
}

impl OrderService {
    pub fn new(orders: SharedOrderStore, catalog: SharedCatalog) -> Self {
        Self { orders, catalog }
    }

    /// Creates an order owned by the caller (or, for admins, by `draft.user_id`).
    ///
    /// If anything fails after the header is inserted, the header is deleted
    /// again. A failed deletion is reported as [`ServiceError::Inconsistency`].
    #[tracing::instrument(skip(self, principal, draft), fields(user_id = principal.user_id))]
    pub async fn create_order(&self, principal: &Principal, draft: OrderDraft) -> Result<Order> {
        draft.validate()?;
        let owner = principal.resolve_owner(draft.user_id)?;

        let header = self
            .orders
            .insert_order(Order::new(owner, draft.delivery_info.clone(), Utc::now()))
            .await?;
        let order_id = header.id;

        match self.fill_lines(header, &draft).await {
            Ok(order) => {
                tracing::info!(order_id, total = %order.total_price, "Order created");
                Ok(order)
            }
            Err(err) => Err(self.compensate_create(order_id, err).await),
        }
    }

    async fn fill_lines(&self, mut order: Order, draft: &OrderDraft) -> Result<Order> {
        let snapshot =
            PriceSnapshotCalculator::compute(self.catalog.as_ref(), order.id, &draft.lines).await?;
        let lines = self.orders.insert_lines(snapshot.lines).await?;
        order.total_price = snapshot.total;
        order.updated_at = Utc::now();
        self.orders.update_order(&order).await?;
        order.products = lines;
        Ok(order)
    }

    async fn compensate_create(&self, order_id: OrderId, cause: ServiceError) -> ServiceError {
        tracing::warn!(order_id, error = %cause, "Order creation failed, removing header");
        if let Err(err) = self.orders.delete_lines(order_id).await {
            tracing::warn!(order_id, error = %err, "Could not remove partial order lines");
        }
        match self.orders.delete_order(order_id).await {
            Ok(()) => cause,
            Err(err) => {
                tracing::error!(
                    order_id,
                    error = %err,
                    cause = %cause,
                    "Compensating delete failed, orphan order header left behind"
                );
                ServiceError::Inconsistency(format!(
                    "order {order_id} orphaned after failed creation ({cause}); delete failed: {err}"
                ))
            }
        }
    }

    /// Replaces all lines of an order and its owner and delivery info.
    ///
    /// Status and `created_at` are never touched here. If the old lines cannot
    /// be deleted the update stops with [`ServiceError::Persistence`].
    #[tracing::instrument(skip(self, principal, draft), fields(user_id = principal.user_id))]
    pub async fn update_order(
        &self,
        principal: &Principal,
        order_id: OrderId,
        draft: OrderDraft,
    ) -> Result<Order> {
        draft.validate()?;
        let mut order = self.load_owned(principal, order_id).await?;
        let owner = principal.resolve_owner(draft.user_id)?;

        let snapshot =
            PriceSnapshotCalculator::compute(self.catalog.as_ref(), order_id, &draft.lines).await?;

        // Nothing is written yet, so a failed delete leaves the order untouched.
        if let Err(err) = self.orders.delete_lines(order_id).await {
            tracing::warn!(order_id, error = %err, "Could not delete old order lines");
            return Err(match err {
                ServiceError::Persistence(_) => err,
                other => ServiceError::Persistence(other.to_string()),
            });
        }
        let lines = self.orders.insert_lines(snapshot.lines).await?;

        order.user_id = owner;
        order.total_price = snapshot.total;
        order.delivery_info = draft.delivery_info;
        order.updated_at = Utc::now();
        self.orders.update_order(&order).await?;

        order.products = lines;
        tracing::info!(order_id, total = %order.total_price, "Order updated");
        Ok(order)
    }

    #[tracing::instrument(skip(self, principal), fields(user_id = principal.user_id))]
    pub async fn delete_order(&self, principal: &Principal, order_id: OrderId) -> Result<()> {
        self.load_owned(principal, order_id).await?;

        if let Err(err) = self.orders.delete_lines(order_id).await {
            tracing::warn!(order_id, error = %err, "Could not delete order lines");
        }
        self.orders.delete_order(order_id).await?;
        tracing::info!(order_id, "Order deleted");
        Ok(())
    }

    /// Fetches an order with its lines, decorated with live catalog titles and
    /// stock flags.
    #[tracing::instrument(skip(self, principal), fields(user_id = principal.user_id))]
    pub async fn get_order(&self, principal: &Principal, order_id: OrderId) -> Result<Order> {
        let mut order = self.load_owned(principal, order_id).await?;
        order.products = self.orders.lines(order_id).await?;
        self.decorate(&mut order.products).await;
        Ok(order)
    }

    /// Fetches header and lines without any ownership check.
    pub async fn get_order_unrestricted(&self, order_id: OrderId) -> Result<Order> {
        let mut order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))?;
        order.products = self.orders.lines(order_id).await?;
        Ok(order)
    }

    pub async fn set_status(&self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        self.orders
            .set_order_status(order_id, status, Utc::now())
            .await
    }

    async fn load_owned(&self, principal: &Principal, order_id: OrderId) -> Result<Order> {
        principal.ensure_registered()?;
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))?;
        principal.ensure_can_access(order.user_id)?;
        Ok(order)
    }

    async fn decorate(&self, lines: &mut [OrderedProduct]) {
        if lines.is_empty() {
            return;
        }
        let mut ids: Vec<_> = lines.iter().map(|line| line.product_id).collect();
        ids.sort_unstable();
        ids.dedup();
        match self.catalog.products(&ids).await {
            Ok(products) => {
                let by_id: HashMap<_, _> = products.into_iter().map(|p| (p.id, p)).collect();
                for line in lines.iter_mut() {
                    if let Some(product) = by_id.get(&line.product_id) {
                        line.product_name = Some(product.title.clone());
                        line.in_stock = Some(product.in_stock());
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "Catalog unavailable, order lines left undecorated");
            }
        }
    }
}
