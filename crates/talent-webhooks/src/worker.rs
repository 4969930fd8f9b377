//! Webhook delivery worker.
//!
//! Background worker that drains the delivery queue with bounded
//! concurrency and runs the per-attempt state machine:
//!
//! ```text
//! pending -> attempt -> success
//!                    -> retrying -> attempt -> success | retrying | failed
//! ```
//!
//! A delivery id is owned by at most one task at a time. Failed attempts are
//! re-enqueued by a cancellable timer after `backoff_unit * backoff_base^n`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::models::{DeliveryStatus, WebhookDelivery};
use crate::queue::{DeliveryJob, DeliveryReceiver, RetryScheduler};
use crate::services::delivery_service::{AttemptOutcome, DeliveryRequest, DeliveryService};
use crate::services::ledger_service::DeliveryLedger;
use crate::services::subscription_service::SubscriptionRegistry;

/// Error recorded when the target subscription disappeared before an attempt.
pub const SUBSCRIPTION_DELETED: &str = "subscription deleted";

/// Error recorded when the target subscription was deactivated before an attempt.
pub const SUBSCRIPTION_INACTIVE: &str = "subscription inactive";

/// Runs single delivery jobs against shared state.
pub(crate) struct DeliveryExecutor {
    pub(crate) registry: Arc<SubscriptionRegistry>,
    pub(crate) ledger: Arc<DeliveryLedger>,
    pub(crate) transport: DeliveryService,
    pub(crate) scheduler: RetryScheduler,
    pub(crate) config: Arc<WebhookConfig>,
    in_flight: Mutex<HashSet<Uuid>>,
}

/// Exclusive claim on a delivery id; released on drop.
struct InFlightClaim<'a> {
    executor: &'a DeliveryExecutor,
    delivery_id: Uuid,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.executor.in_flight.lock().remove(&self.delivery_id);
    }
}

impl DeliveryExecutor {
    pub(crate) fn new(
        registry: Arc<SubscriptionRegistry>,
        ledger: Arc<DeliveryLedger>,
        transport: DeliveryService,
        scheduler: RetryScheduler,
        config: Arc<WebhookConfig>,
    ) -> Self {
        Self {
            registry,
            ledger,
            transport,
            scheduler,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, delivery_id: Uuid) -> Option<InFlightClaim<'_>> {
        if self.in_flight.lock().insert(delivery_id) {
            Some(InFlightClaim {
                executor: self,
                delivery_id,
            })
        } else {
            None
        }
    }

    /// Run one job to the end of its current attempt.
    #[tracing::instrument(
        name = "webhook_attempt",
        skip(self),
        fields(delivery_id = %job.delivery_id, manual = job.manual)
    )]
    pub(crate) async fn process(&self, job: DeliveryJob) {
        let Some(claim) = self.claim(job.delivery_id) else {
            tracing::debug!(
                target: "webhook_worker",
                delivery_id = %job.delivery_id,
                "Delivery already in flight, dropping duplicate job"
            );
            return;
        };

        let delivery = match self.ledger.get(job.delivery_id) {
            Ok(d) => d,
            Err(_) => {
                tracing::warn!(
                    target: "webhook_worker",
                    delivery_id = %job.delivery_id,
                    "Delivery record missing, skipping job"
                );
                return;
            }
        };

        if delivery.status.is_terminal() {
            tracing::debug!(
                target: "webhook_worker",
                delivery_id = %delivery.id,
                status = %delivery.status,
                "Delivery already terminal, skipping job"
            );
            return;
        }

        // Existence and activation are checked right before the attempt so a
        // revoked endpoint is never contacted.
        let secret = match self.registry.signing_target(delivery.subscription_id) {
            Some(target) if target.is_active => target.secret,
            Some(_) => {
                self.abandon(&delivery, SUBSCRIPTION_INACTIVE);
                return;
            }
            None => {
                self.abandon(&delivery, SUBSCRIPTION_DELETED);
                return;
            }
        };

        let body = match delivery.payload.to_bytes() {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    error = %e,
                    "Failed to serialize webhook payload"
                );
                self.abandon(&delivery, &format!("Failed to serialize payload: {e}"));
                return;
            }
        };

        let attempts = match self.ledger.update(delivery.id, |d| {
            d.attempts += 1;
            d.last_attempt_at = Some(Utc::now());
            d.next_attempt_at = None;
        }) {
            Ok(d) => d.attempts,
            Err(_) => return,
        };

        let outcome = self
            .transport
            .send(DeliveryRequest {
                delivery_id: delivery.id,
                event: delivery.event,
                url: &delivery.url,
                body: &body,
                secret: secret.as_ref(),
            })
            .await;

        if outcome.success {
            self.handle_success(&delivery, attempts, outcome);
            return;
        }

        let retry_delay = self.handle_failure(&delivery, attempts, outcome, job.manual);
        // The timer may fire immediately; it must find the id unclaimed.
        drop(claim);
        if let Some(delay) = retry_delay {
            self.scheduler
                .schedule(delivery.id, delivery.subscription_id, delay);
        }
    }

    fn handle_success(&self, delivery: &WebhookDelivery, attempts: u32, outcome: AttemptOutcome) {
        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            subscription_id = %delivery.subscription_id,
            organization_id = %delivery.payload.organization_id,
            event = %delivery.event,
            attempt = attempts,
            status = ?outcome.response_status,
            latency_ms = outcome.latency_ms,
            "Webhook delivery succeeded"
        );

        // Counter first: a terminal ledger entry implies the outcome is recorded.
        self.registry.record_outcome(delivery.subscription_id, true);
        let _ = self.ledger.update(delivery.id, |d| {
            d.status = DeliveryStatus::Success;
            d.completed_at = Some(Utc::now());
            apply_outcome(d, outcome);
        });
        self.forget_if_deleted(delivery.subscription_id);
    }

    fn handle_failure(
        &self,
        delivery: &WebhookDelivery,
        attempts: u32,
        outcome: AttemptOutcome,
        manual: bool,
    ) -> Option<std::time::Duration> {
        let retry_delay = if manual {
            None
        } else {
            self.config.next_retry_delay(attempts)
        };

        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            subscription_id = %delivery.subscription_id,
            organization_id = %delivery.payload.organization_id,
            event = %delivery.event,
            attempt = attempts,
            status = ?outcome.response_status,
            error = outcome.error.as_deref().unwrap_or_default(),
            latency_ms = outcome.latency_ms,
            has_next_retry = retry_delay.is_some(),
            "Webhook delivery failed"
        );

        match retry_delay {
            Some(delay) => {
                let next_attempt_at = chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|d| Utc::now().checked_add_signed(d));
                let _ = self.ledger.update(delivery.id, |d| {
                    d.status = DeliveryStatus::Retrying;
                    d.next_attempt_at = next_attempt_at;
                    apply_outcome(d, outcome);
                });
            }
            None => {
                self.registry
                    .record_outcome(delivery.subscription_id, false);
                let _ = self.ledger.update(delivery.id, |d| {
                    d.status = DeliveryStatus::Failed;
                    d.completed_at = Some(Utc::now());
                    apply_outcome(d, outcome);
                });
                self.forget_if_deleted(delivery.subscription_id);
            }
        }

        retry_delay
    }

    /// Close a delivery without attempting it.
    fn abandon(&self, delivery: &WebhookDelivery, reason: &str) {
        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            subscription_id = %delivery.subscription_id,
            reason,
            "Abandoning delivery before attempt"
        );
        let _ = self.ledger.update(delivery.id, |d| {
            d.status = DeliveryStatus::Failed;
            d.error = Some(reason.to_string());
            d.next_attempt_at = None;
            d.completed_at = Some(Utc::now());
        });
        self.forget_if_deleted(delivery.subscription_id);
    }

    /// Drop the records of a subscription deleted while its deliveries were
    /// still open.
    fn forget_if_deleted(&self, subscription_id: Uuid) {
        if self.registry.signing_target(subscription_id).is_some() {
            return;
        }
        let pruned = self.ledger.remove_subscription(subscription_id);
        if pruned > 0 {
            tracing::debug!(
                target: "webhook_worker",
                subscription_id = %subscription_id,
                pruned,
                "Pruned deliveries of deleted subscription"
            );
        }
    }
}

fn apply_outcome(delivery: &mut WebhookDelivery, outcome: AttemptOutcome) {
    delivery.response_status = outcome.response_status;
    delivery.response_body = outcome.response_body;
    delivery.error = outcome.error;
    delivery.latency_ms = Some(outcome.latency_ms);
}

/// Webhook worker that drains the delivery queue.
pub struct WebhookWorker {
    receiver: DeliveryReceiver,
    executor: Arc<DeliveryExecutor>,
    concurrency: usize,
    shutdown: watch::Receiver<bool>,
}

impl WebhookWorker {
    pub(crate) fn new(
        receiver: DeliveryReceiver,
        executor: Arc<DeliveryExecutor>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let concurrency = executor.config.worker_concurrency.max(1);
        Self {
            receiver,
            executor,
            concurrency,
            shutdown,
        }
    }

    /// Run until shutdown is requested or every queue producer is gone.
    ///
    /// On exit, waits for in-flight attempts and aborts pending retry timers.
    pub async fn run(mut self) {
        tracing::info!(
            target: "webhook_worker",
            concurrency = self.concurrency,
            "Starting webhook worker"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!(
                            target: "webhook_worker",
                            "Worker shutdown requested, stopping queue loop"
                        );
                        break;
                    }
                }
                job = self.receiver.recv() => {
                    let Some(job) = job else {
                        tracing::info!(
                            target: "webhook_worker",
                            "Delivery queue closed, stopping queue loop"
                        );
                        break;
                    };

                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                        break;
                    };
                    let executor = Arc::clone(&self.executor);
                    tokio::spawn(async move {
                        executor.process(job).await;
                        drop(permit);
                    });
                }
            }
        }

        self.receiver.close();

        // Wait for in-flight attempts to finish
        let permits = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        let _ = semaphore.acquire_many(permits).await;

        let pending = self.executor.scheduler.pending();
        self.executor.scheduler.cancel_all();

        tracing::info!(
            target: "webhook_worker",
            abandoned_retries = pending,
            "Webhook worker stopped"
        );
    }
}
