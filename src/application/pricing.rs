//! Price snapshots of order lines against the live catalog.

use crate::domain::money::Price;
use crate::domain::order::{LineItem, OrderId, OrderedProduct};
use crate::domain::ports::Catalog;
use crate::domain::product::{Product, ProductId};
use crate::error::Result;
use std::collections::HashMap;

/// Computed lines plus their total. Unresolved lines carry no price and do
/// not contribute to the total.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    pub lines: Vec<OrderedProduct>,
    pub total: Price,
}

/// Prices `lines` with the given products. Pure; line ids are left at zero.
///
/// Fails only when a line total or the order total is out of range.
pub fn snapshot(
    order_id: OrderId,
    lines: &[LineItem],
    products: &[Product],
) -> Result<PriceSnapshot> {
    let by_id: HashMap<ProductId, &Product> = products.iter().map(|p| (p.id, p)).collect();

    let lines = lines
        .iter()
        .map(|item| {
            let product = by_id.get(&item.product_id);
            Ok(OrderedProduct {
                id: 0,
                order_id,
                product_id: item.product_id,
                quantity: item.quantity,
                total_price: product.map(|p| p.price.times(item.quantity)).transpose()?,
                product_name: product.map(|p| p.title.clone()),
                in_stock: product.map(|p| p.in_stock()),
            })
        })
        .collect::<Result<Vec<OrderedProduct>>>()?;
    let total = Price::try_sum(lines.iter().filter_map(|line| line.total_price))?;

    Ok(PriceSnapshot { lines, total })
}

pub struct PriceSnapshotCalculator;

impl PriceSnapshotCalculator {
    /// Resolves all lines with a single batched catalog call.
    pub async fn compute(
        catalog: &dyn Catalog,
        order_id: OrderId,
        lines: &[LineItem],
    ) -> Result<PriceSnapshot> {
        let mut ids: Vec<ProductId> = lines.iter().map(|item| item.product_id).collect();
        ids.sort_unstable();
        ids.dedup();

        let products = catalog.products(&ids).await?;
        if products.len() < ids.len() {
            tracing::debug!(
                order_id,
                requested = ids.len(),
                resolved = products.len(),
                "Some order lines did not resolve against the catalog"
            );
        }
        snapshot(order_id, lines, &products)
    }
}
