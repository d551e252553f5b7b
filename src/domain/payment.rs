use super::money::Price;
use super::order::{Order, OrderId, OrderStatus};
use super::principal::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type PaymentId = i64;

/// Payment status, mirroring the provider's intent and session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Intended,
    Created,
    Processing,
    RequiresAction,
    RequiresCapture,
    RequiresConfirmation,
    RequiresPaymentMethod,
    Success,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Intended => "intended",
            PaymentStatus::Created => "created",
            PaymentStatus::Processing => "processing",
            PaymentStatus::RequiresAction => "requires_action",
            PaymentStatus::RequiresCapture => "requires_capture",
            PaymentStatus::RequiresConfirmation => "requires_confirmation",
            PaymentStatus::RequiresPaymentMethod => "requires_payment_method",
            PaymentStatus::Success => "success",
            PaymentStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Canceled)
    }

    /// Maps a raw provider payment-intent status.
    pub fn from_intent_status(raw: &str) -> Option<Self> {
        let status = match raw {
            "created" => PaymentStatus::Created,
            "processing" => PaymentStatus::Processing,
            "requires_action" => PaymentStatus::RequiresAction,
            "requires_capture" => PaymentStatus::RequiresCapture,
            "requires_confirmation" => PaymentStatus::RequiresConfirmation,
            "requires_payment_method" => PaymentStatus::RequiresPaymentMethod,
            "succeeded" => PaymentStatus::Success,
            "canceled" => PaymentStatus::Canceled,
            _ => return None,
        };
        Some(status)
    }

    /// Order status this payment status settles, if it settles one.
    pub fn implied_order_status(self) -> Option<OrderStatus> {
        match self {
            PaymentStatus::Success => Some(OrderStatus::Paid),
            PaymentStatus::Canceled => Some(OrderStatus::NotPaid),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment attempt for one checkout session.
///
/// The checkout-session id is unique across payments and is the key every
/// later reconciliation uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Price,
    pub status: PaymentStatus,
    pub checkout_session_id: String,
    #[serde(default)]
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// A new payment in `intended` status for the full order total.
    pub fn intended(
        order: &Order,
        user_id: UserId,
        checkout_session_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            order_id: order.id,
            user_id,
            amount: order.total_price,
            status: PaymentStatus::Intended,
            checkout_session_id: checkout_session_id.into(),
            payment_intent_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a provider-reported status.
    ///
    /// A terminal payment never moves back to a non-terminal status; such a
    /// stale update only fills a missing intent id. Returns `false` when the
    /// status was not applied.
    pub fn apply(
        &mut self,
        status: PaymentStatus,
        payment_intent_id: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.status.is_terminal() && !status.is_terminal() {
            if self.payment_intent_id.is_none() && payment_intent_id.is_some() {
                self.payment_intent_id = payment_intent_id;
                self.updated_at = now;
            }
            return false;
        }
        self.status = status;
        if payment_intent_id.is_some() {
            self.payment_intent_id = payment_intent_id;
        }
        self.updated_at = now;
        true
    }
}
