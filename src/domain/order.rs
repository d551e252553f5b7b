use super::money::{Price, Quantity};
use super::principal::UserId;
use super::product::ProductId;
use crate::error::{Result, ServiceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type OrderId = i64;
pub type LineId = i64;

/// Lifecycle status of an order.
///
/// Besides the statuses the store sets itself, the provider may report raw
/// values (e.g. `intended`, `unpaid`) that are stored as they are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderStatus {
    Created,
    Paid,
    NotPaid,
    Other(String),
}

impl OrderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Paid => "paid",
            OrderStatus::NotPaid => "not_paid",
            OrderStatus::Other(raw) => raw,
        }
    }
}

impl From<String> for OrderStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "created" => OrderStatus::Created,
            "paid" => OrderStatus::Paid,
            "not_paid" => OrderStatus::NotPaid,
            _ => OrderStatus::Other(raw),
        }
    }
}

impl From<&str> for OrderStatus {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested `(product, quantity)` pair. Clients never supply prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: Quantity,
}

impl LineItem {
    pub fn new(product_id: ProductId, quantity: Quantity) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// One persisted line of an order with its price snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedProduct {
    pub id: LineId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: Quantity,
    /// `None` when the product did not resolve against the catalog.
    pub total_price: Option<Price>,
    /// Live catalog title, filled on fetch for display only.
    #[serde(skip)]
    pub product_name: Option<String>,
    /// Live catalog stock flag, filled on fetch for display only.
    #[serde(skip)]
    pub in_stock: Option<bool>,
}

/// An order header plus its current lines.
///
/// Lines are stored separately from the header and are never serialized with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total_price: Price,
    #[serde(default)]
    pub delivery_info: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub products: Vec<OrderedProduct>,
}

impl Order {
    /// A fresh header in `created` status; the store assigns the id.
    pub fn new(user_id: UserId, delivery_info: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            user_id,
            status: OrderStatus::Created,
            total_price: Price::ZERO,
            delivery_info,
            created_at: now,
            updated_at: now,
            products: Vec::new(),
        }
    }
}

/// Client input for creating or replacing an order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderDraft {
    /// Owner of the order; defaults to the caller.
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub delivery_info: Option<String>,
    pub lines: Vec<LineItem>,
}

impl OrderDraft {
    pub fn new(lines: Vec<LineItem>) -> Self {
        Self {
            lines,
            ..Self::default()
        }
    }

    pub fn for_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.lines.is_empty() {
            return Err(ServiceError::Validation(
                "Order product list cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_passthrough() {
        assert_eq!(OrderStatus::from("paid"), OrderStatus::Paid);
        assert_eq!(OrderStatus::from("not_paid"), OrderStatus::NotPaid);
        assert_eq!(
            OrderStatus::from("intended"),
            OrderStatus::Other("intended".to_string())
        );
        assert_eq!(OrderStatus::Other("unpaid".into()).as_str(), "unpaid");
    }

    #[test]
    fn test_status_serializes_as_plain_string() {
        let json = serde_json::to_string(&OrderStatus::NotPaid).unwrap();
        assert_eq!(json, "\"not_paid\"");
        let back: OrderStatus = serde_json::from_str("\"created\"").unwrap();
        assert_eq!(back, OrderStatus::Created);
    }

    #[test]
    fn test_empty_draft_is_rejected() {
        assert!(matches!(
            OrderDraft::default().validate(),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn test_header_serialization_skips_lines() {
        let mut order = Order::new(1, None, Utc::now());
        order.products.push(OrderedProduct {
            id: 1,
            order_id: 1,
            product_id: 1,
            quantity: Quantity::new(1).unwrap(),
            total_price: None,
            product_name: None,
            in_stock: None,
        });
        let json = serde_json::to_value(&order).unwrap();
        assert!(json.get("products").is_none());
        assert_eq!(json["status"], "created");
    }
}
