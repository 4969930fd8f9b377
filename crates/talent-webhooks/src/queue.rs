//! Delivery queue and deferred retry timers.
//!
//! Producers are the dispatcher, manual retries and retry timers; the
//! consumer is the worker pool. Timers are tracked per subscription so that
//! deleting a subscription can abort its pending retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::error::WebhookError;

/// A unit of work for the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryJob {
    pub delivery_id: Uuid,
    /// Operator-triggered single attempt; never schedules further retries.
    pub manual: bool,
}

impl DeliveryJob {
    #[must_use]
    pub fn new(delivery_id: Uuid) -> Self {
        Self {
            delivery_id,
            manual: false,
        }
    }

    #[must_use]
    pub fn manual(delivery_id: Uuid) -> Self {
        Self {
            delivery_id,
            manual: true,
        }
    }
}

/// Sending half of the delivery queue.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    sender: mpsc::UnboundedSender<DeliveryJob>,
}

/// Receiving half, owned by the worker.
pub type DeliveryReceiver = mpsc::UnboundedReceiver<DeliveryJob>;

impl DeliveryQueue {
    /// Create a connected queue pair.
    #[must_use]
    pub fn channel() -> (Self, DeliveryReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Enqueue a job without blocking.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::QueueClosed` once the worker has stopped.
    pub fn enqueue(&self, job: DeliveryJob) -> Result<(), WebhookError> {
        self.sender.send(job).map_err(|_| WebhookError::QueueClosed)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Debug)]
struct ScheduledRetry {
    subscription_id: Uuid,
    handle: AbortHandle,
}

/// Cancellable deferred re-enqueue of deliveries.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    queue: DeliveryQueue,
    timers: Arc<Mutex<HashMap<Uuid, ScheduledRetry>>>,
}

impl RetryScheduler {
    #[must_use]
    pub fn new(queue: DeliveryQueue) -> Self {
        Self {
            queue,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Re-enqueue `delivery_id` after `delay`. Replaces any timer already
    /// scheduled for the same delivery.
    pub fn schedule(&self, delivery_id: Uuid, subscription_id: Uuid, delay: Duration) {
        let queue = self.queue.clone();
        let timers = Arc::clone(&self.timers);

        // Holding the lock across spawn keeps the timer from firing and
        // removing its entry before it is registered.
        let mut guard = self.timers.lock();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            timers.lock().remove(&delivery_id);
            if queue.enqueue(DeliveryJob::new(delivery_id)).is_err() {
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery_id,
                    "Retry timer fired after queue closed"
                );
            }
        });

        if let Some(previous) = guard.insert(
            delivery_id,
            ScheduledRetry {
                subscription_id,
                handle: task.abort_handle(),
            },
        ) {
            previous.handle.abort();
        }
    }

    /// Abort every pending retry of a subscription. Returns the affected delivery ids.
    pub fn cancel_for_subscription(&self, subscription_id: Uuid) -> Vec<Uuid> {
        let mut timers = self.timers.lock();
        let cancelled: Vec<Uuid> = timers
            .iter()
            .filter(|(_, t)| t.subscription_id == subscription_id)
            .map(|(id, _)| *id)
            .collect();

        for id in &cancelled {
            if let Some(timer) = timers.remove(id) {
                timer.handle.abort();
            }
        }
        cancelled
    }

    /// Abort all pending retries.
    pub fn cancel_all(&self) {
        for (_, timer) in self.timers.lock().drain() {
            timer.handle.abort();
        }
    }

    /// Number of retries waiting on a timer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.timers.lock().len()
    }
}
