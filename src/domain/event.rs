//! Provider event payloads and the status pairs they imply.

use super::job::ReconcileJob;
use super::order::{OrderId, OrderStatus};
use super::payment::PaymentStatus;
use crate::error::{Result, ServiceError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key carrying the local order id on sessions and intents.
pub const ORDER_ID_METADATA_KEY: &str = "order_id";

/// The outer shape of every webhook delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// Either a bare id or the expanded object, as the provider returns them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(T),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PaymentIntentObject {
    pub fn order_id(&self) -> Option<OrderId> {
        order_id_from(&self.metadata)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub payment_intent: Option<Expandable<PaymentIntentObject>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSessionObject {
    pub fn payment_intent_id(&self) -> Option<String> {
        match &self.payment_intent {
            Some(Expandable::Id(id)) => Some(id.clone()),
            Some(Expandable::Object(intent)) => Some(intent.id.clone()),
            None => None,
        }
    }

    pub fn customer_email(&self) -> Option<String> {
        self.customer_details
            .as_ref()
            .and_then(|details| details.email.clone())
    }

    /// Derives the status pair from the session itself.
    ///
    /// The session's `payment_status` wins; an embedded intent status is the
    /// fallback. `None` means the caller has to re-fetch the session with the
    /// intent expanded.
    pub fn status_update(&self) -> Option<StatusUpdate> {
        if let Some(update) = self
            .payment_status
            .as_deref()
            .and_then(StatusUpdate::from_session_payment_status)
        {
            return Some(update);
        }
        match &self.payment_intent {
            Some(Expandable::Object(intent)) => intent
                .status
                .as_deref()
                .and_then(StatusUpdate::from_intent_status),
            _ => None,
        }
    }
}

/// A `(payment status, order status)` pair to apply during reconciliation.
///
/// `order: None` leaves the order status untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub payment: PaymentStatus,
    #[serde(default)]
    pub order: Option<OrderStatus>,
}

impl StatusUpdate {
    pub fn new(payment: PaymentStatus, order: Option<OrderStatus>) -> Self {
        Self { payment, order }
    }

    /// The pair implied by a `payment_intent.*` event type.
    pub fn for_intent_event(event_type: &str) -> Option<Self> {
        let suffix = event_type.strip_prefix("payment_intent.")?;
        match suffix {
            "created" => Some(Self::new(
                PaymentStatus::Created,
                Some(OrderStatus::Other(PaymentStatus::Intended.as_str().to_string())),
            )),
            "succeeded" => Some(Self::new(PaymentStatus::Success, Some(OrderStatus::Paid))),
            "canceled" => Some(Self::new(PaymentStatus::Canceled, Some(OrderStatus::NotPaid))),
            "processing"
            | "requires_action"
            | "requires_capture"
            | "requires_confirmation"
            | "requires_payment_method" => {
                PaymentStatus::from_intent_status(suffix).map(|status| Self::new(status, None))
            }
            _ => None,
        }
    }

    pub fn from_intent_status(raw: &str) -> Option<Self> {
        let payment = PaymentStatus::from_intent_status(raw)?;
        Some(Self::new(payment, payment.implied_order_status()))
    }

    pub fn from_session_payment_status(raw: &str) -> Option<Self> {
        match raw {
            "paid" | "no_payment_required" => {
                Some(Self::new(PaymentStatus::Success, Some(OrderStatus::Paid)))
            }
            "unpaid" => Some(Self::new(
                PaymentStatus::Processing,
                Some(OrderStatus::Other("unpaid".to_string())),
            )),
            _ => None,
        }
    }
}

impl EventEnvelope {
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| ServiceError::Parse(e.to_string()))
    }

    /// Classifies the event. `Ok(None)` means it is acknowledged and ignored.
    pub fn into_job(self) -> Result<Option<ReconcileJob>> {
        let event_id = self.id;
        if let Some(update) = StatusUpdate::for_intent_event(&self.event_type) {
            let intent: PaymentIntentObject = serde_json::from_value(self.data.object)
                .map_err(|e| ServiceError::Parse(format!("payment intent: {e}")))?;
            return Ok(Some(ReconcileJob::ByIntent {
                event_id,
                intent,
                update,
            }));
        }
        if self.event_type == "checkout.session.completed" {
            let session: CheckoutSessionObject = serde_json::from_value(self.data.object)
                .map_err(|e| ServiceError::Parse(format!("checkout session: {e}")))?;
            return Ok(Some(ReconcileJob::CompletedSession { event_id, session }));
        }
        Ok(None)
    }
}

fn order_id_from(metadata: &HashMap<String, String>) -> Option<OrderId> {
    metadata
        .get(ORDER_ID_METADATA_KEY)
        .and_then(|raw| raw.trim().parse().ok())
}
