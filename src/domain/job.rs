use super::event::{CheckoutSessionObject, PaymentIntentObject, StatusUpdate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of background reconciliation work produced by one webhook event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcileJob {
    /// A `payment_intent.*` event, correlated to a Payment by intent id or order metadata.
    ByIntent {
        event_id: String,
        intent: PaymentIntentObject,
        update: StatusUpdate,
    },
    /// A `checkout.session.completed` event, keyed directly by the session id.
    CompletedSession {
        event_id: String,
        session: CheckoutSessionObject,
    },
}

impl ReconcileJob {
    pub fn event_id(&self) -> &str {
        match self {
            ReconcileJob::ByIntent { event_id, .. } => event_id,
            ReconcileJob::CompletedSession { event_id, .. } => event_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileJob::ByIntent { .. } => "by_intent",
            ReconcileJob::CompletedSession { .. } => "completed_session",
        }
    }
}

/// A job parked after it exhausted its attempts or failed permanently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job: ReconcileJob,
    pub attempts: u32,
    pub last_error: String,
    pub dead_lettered_at: DateTime<Utc>,
}
