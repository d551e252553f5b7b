use super::dispatch::QueueHandle;
use crate::domain::event::EventEnvelope;
use crate::error::Result;
use crate::infrastructure::stripe::signature::WebhookVerifier;
use serde::Serialize;

/// What the webhook endpoint answers once a delivery has been accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "ack", rename_all = "snake_case")]
pub enum WebhookAck {
    /// Queued for background reconciliation.
    Dispatched { event_id: String, kind: String },
    /// A valid event this service does not act on.
    Ignored { event_id: String, event_type: String },
}

/// Verifies, classifies and enqueues provider deliveries.
///
/// Returns as soon as the job is queued; reconciliation outcomes only reach
/// the logs and the dead-letter store.
#[derive(Clone)]
pub struct WebhookProcessor {
    verifier: WebhookVerifier,
    queue: QueueHandle,
}

impl WebhookProcessor {
    pub fn new(verifier: WebhookVerifier, queue: QueueHandle) -> Self {
        Self { verifier, queue }
    }

    #[tracing::instrument(skip_all, fields(body_len = body.len()))]
    pub fn process(&self, body: &[u8], signature_header: &str) -> Result<WebhookAck> {
        self.verifier.verify(body, signature_header)?;
        let envelope = EventEnvelope::parse(body)?;
        let event_id = envelope.id.clone();
        let event_type = envelope.event_type.clone();

        match envelope.into_job()? {
            Some(job) => {
                let kind = job.kind().to_string();
                self.queue.enqueue(job)?;
                tracing::info!(event_id = %event_id, event_type = %event_type, "Webhook event dispatched");
                Ok(WebhookAck::Dispatched { event_id, kind })
            }
            None => {
                tracing::debug!(event_id = %event_id, event_type = %event_type, "Webhook event ignored");
                Ok(WebhookAck::Ignored {
                    event_id,
                    event_type,
                })
            }
        }
    }
}
