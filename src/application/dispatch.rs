//! Bounded reconciliation queue with a supervised worker pool.
//!
//! Jobs are delivered at least once. Each attempt runs in its own task, so a
//! panicking reconciliation counts as a failed attempt and the worker keeps
//! going. Retryable failures back off exponentially. A job that keeps failing,
//! or fails permanently, lands in the dead-letter store.

use super::reconcile::ReconciliationEngine;
use crate::config::ReconcileConfig;
use crate::domain::job::{DeadLetter, ReconcileJob};
use crate::domain::ports::SharedDeadLetterStore;
use crate::error::{Result, ServiceError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// `base × 2^(attempt-1)`, saturating.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    base.saturating_mul(1u32 << exponent)
}

/// Cheap, cloneable producer side of the queue.
#[derive(Clone)]
pub struct QueueHandle {
    sender: mpsc::Sender<ReconcileJob>,
}

impl QueueHandle {
    /// Enqueues without waiting. A full queue is reported to the caller so the
    /// provider can redeliver later.
    pub fn enqueue(&self, job: ReconcileJob) -> Result<()> {
        self.sender.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(job) => {
                tracing::warn!(event_id = job.event_id(), "Reconciliation queue full");
                ServiceError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => ServiceError::QueueClosed,
        })
    }
}

struct WorkerContext {
    engine: Arc<ReconciliationEngine>,
    dead_letters: SharedDeadLetterStore,
    max_attempts: u32,
    base_backoff: Duration,
}

pub struct ReconcileQueue {
    handle: QueueHandle,
    workers: Vec<JoinHandle<()>>,
}

impl ReconcileQueue {
    /// Starts `config.workers` workers draining a channel of
    /// `config.queue_capacity` jobs.
    #[tracing::instrument(name = "reconcile_queue", skip_all, fields(workers = config.workers))]
    pub fn start(
        engine: Arc<ReconciliationEngine>,
        dead_letters: SharedDeadLetterStore,
        config: &ReconcileConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let context = Arc::new(WorkerContext {
            engine,
            dead_letters,
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
        });

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    Arc::clone(&receiver),
                    Arc::clone(&context),
                ))
            })
            .collect();
        tracing::info!("Reconciliation workers started");

        Self {
            handle: QueueHandle { sender },
            workers,
        }
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    /// Closes the queue and waits until every accepted job has finished.
    ///
    /// Jobs still held by other [`QueueHandle`]s' owners keep the channel open,
    /// so drop those first.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(self) {
        drop(self.handle);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = ?e, "Reconciliation worker ended abnormally");
            }
        }
        tracing::info!("Reconciliation queue drained");
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<ReconcileJob>>>,
    context: Arc<WorkerContext>,
) {
    loop {
        let next = { receiver.lock().await.recv().await };
        let Some(job) = next else {
            tracing::debug!(worker, "Reconciliation worker stopping");
            return;
        };
        process(worker, &context, job).await;
    }
}

async fn process(worker: usize, context: &WorkerContext, job: ReconcileJob) {
    let mut attempt = 1;
    loop {
        let engine = Arc::clone(&context.engine);
        let task_job = job.clone();
        let outcome = tokio::spawn(async move { engine.run(&task_job).await }).await;

        let (error, retryable) = match outcome {
            Ok(Ok(())) => {
                tracing::debug!(worker, event_id = job.event_id(), attempt, "Job reconciled");
                return;
            }
            Ok(Err(err)) => {
                let retryable = err.is_retryable();
                (err.to_string(), retryable)
            }
            Err(join_error) => (format!("reconciliation task failed: {join_error}"), true),
        };

        if !retryable || attempt >= context.max_attempts {
            dead_letter(context, job, attempt, error).await;
            return;
        }

        let delay = backoff_delay(context.base_backoff, attempt);
        tracing::warn!(
            worker,
            event_id = job.event_id(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Reconciliation failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

async fn dead_letter(context: &WorkerContext, job: ReconcileJob, attempts: u32, last_error: String) {
    tracing::error!(
        event_id = job.event_id(),
        kind = job.kind(),
        attempts,
        error = %last_error,
        "Reconciliation job dead-lettered"
    );
    let letter = DeadLetter {
        job,
        attempts,
        last_error,
        dead_lettered_at: Utc::now(),
    };
    if let Err(err) = context.dead_letters.push(letter).await {
        tracing::error!(error = %err, "Could not persist dead letter");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(800));
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_saturates() {
        let huge = backoff_delay(Duration::from_secs(u64::MAX / 2), 30);
        assert_eq!(huge, Duration::MAX);
    }
}
