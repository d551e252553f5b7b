use super::event::CheckoutSessionObject;
use super::order::OrderId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Request to open a hosted checkout session for one order.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSession {
    pub order_id: OrderId,
    pub line_items: Vec<SessionLineItem>,
    pub return_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionLineItem {
    pub name: String,
    /// Unit price in minor currency units, possibly fractional.
    pub unit_amount_minor: Decimal,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenedSession {
    pub id: String,
    pub client_secret: String,
}

/// What a client learns when polling a session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckoutSessionView {
    pub status: Option<String>,
    pub customer_email: Option<String>,
}

impl From<&CheckoutSessionObject> for CheckoutSessionView {
    fn from(session: &CheckoutSessionObject) -> Self {
        Self {
            status: session.status.clone(),
            customer_email: session.customer_email(),
        }
    }
}
