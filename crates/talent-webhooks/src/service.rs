//! Webhook service.
//!
//! The single object built at startup that owns the registry, the ledger,
//! the dispatcher and the retry scheduler. Domain producers and the HTTP
//! handlers both go through it.
//!
//! With a state path configured, construction restores the last snapshot
//! and puts its open deliveries back on the queue or the retry timers.
//! Subscription secrets in the snapshot are encrypted with the configured
//! secret key.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::crypto::SecretKey;
use crate::error::WebhookError;
use crate::models::{
    CreatedWebhookSubscription, DeliveryStatus, SubscriptionPatch, WebhookDelivery,
    WebhookEventType, WebhookPayload, WebhookSubscription,
};
use crate::queue::{DeliveryJob, DeliveryQueue, RetryScheduler};
use crate::services::delivery_service::{DeliveryRequest, DeliveryService};
use crate::services::dispatcher::EventDispatcher;
use crate::services::ledger_service::DeliveryLedger;
use crate::services::subscription_service::SubscriptionRegistry;
use crate::store::{SnapshotStore, StateSnapshot};
use crate::worker::{DeliveryExecutor, WebhookWorker, SUBSCRIPTION_DELETED};

/// Event used by `test_webhook` when a subscription listens to nothing.
pub const DEFAULT_TEST_EVENT: WebhookEventType = WebhookEventType::ApplicationCreated;

/// Webhook subsystem facade.
pub struct WebhookService {
    config: Arc<WebhookConfig>,
    registry: Arc<SubscriptionRegistry>,
    ledger: Arc<DeliveryLedger>,
    dispatcher: EventDispatcher,
    queue: DeliveryQueue,
    scheduler: RetryScheduler,
    transport: DeliveryService,
    store: Option<(SnapshotStore, SecretKey)>,
    /// Serializes snapshot writes; they share one temp file.
    persist_lock: Mutex<()>,
    shutdown: watch::Sender<bool>,
}

impl WebhookService {
    /// Build the service and its worker. The worker must be spawned by the caller.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built,
    /// `WebhookError::Storage` if a state path has no secret key or an
    /// existing snapshot cannot be read, or `WebhookError::EncryptionFailed`
    /// if its secrets do not decrypt with the key.
    pub fn new(config: WebhookConfig) -> Result<(Self, WebhookWorker), WebhookError> {
        let config = Arc::new(config);
        let registry = Arc::new(
            SubscriptionRegistry::new()
                .with_failure_threshold(config.failure_suspend_threshold)
                .with_allow_private_hosts(config.allow_private_hosts),
        );
        let ledger = Arc::new(DeliveryLedger::new(config.history_retention));
        let transport = DeliveryService::new(&config)?;

        let (queue, receiver) = DeliveryQueue::channel();
        let scheduler = RetryScheduler::new(queue.clone());
        let dispatcher =
            EventDispatcher::new(Arc::clone(&registry), Arc::clone(&ledger), queue.clone());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let executor = Arc::new(DeliveryExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            transport.clone(),
            scheduler.clone(),
            Arc::clone(&config),
        ));
        let worker = WebhookWorker::new(receiver, executor, shutdown_rx);

        let store = match (&config.state_path, &config.secret_key) {
            (Some(path), Some(key)) => Some((SnapshotStore::new(path.clone()), key.clone())),
            (Some(_), None) => {
                return Err(WebhookError::Storage(
                    "A secret key is required to persist state".to_string(),
                ))
            }
            (None, _) => None,
        };

        let service = Self {
            config,
            registry,
            ledger,
            dispatcher,
            queue,
            scheduler,
            transport,
            store,
            persist_lock: Mutex::new(()),
            shutdown,
        };

        if let Some((store, key)) = &service.store {
            if let Some(snapshot) = store.load()? {
                service.restore(snapshot, key)?;
            }
        }

        Ok((service, worker))
    }

    /// Load a snapshot and resume its open deliveries.
    fn restore(&self, snapshot: StateSnapshot, key: &SecretKey) -> Result<(), WebhookError> {
        let subscriptions = self.registry.restore(snapshot.subscriptions, key.as_ref())?;

        let now = Utc::now();
        let mut resumed = 0usize;
        for delivery in snapshot.deliveries {
            let (id, subscription_id, status) =
                (delivery.id, delivery.subscription_id, delivery.status);
            let due = delivery.next_attempt_at;
            self.ledger.insert(delivery);

            match status {
                DeliveryStatus::Pending => {
                    let _ = self.queue.enqueue(DeliveryJob::new(id));
                    resumed += 1;
                }
                DeliveryStatus::Retrying => {
                    let delay = due
                        .and_then(|at| (at - now).to_std().ok())
                        .unwrap_or_default();
                    self.scheduler.schedule(id, subscription_id, delay);
                    resumed += 1;
                }
                DeliveryStatus::Success | DeliveryStatus::Failed => {}
            }
        }

        tracing::info!(
            target: "webhook_registry",
            subscriptions,
            deliveries = self.ledger.len(),
            resumed,
            saved_at = %snapshot.saved_at,
            "Restored webhook state from snapshot"
        );
        Ok(())
    }

    /// Current registry and ledger contents, secrets encrypted under `key`.
    pub fn snapshot(&self, key: &SecretKey) -> Result<StateSnapshot, WebhookError> {
        Ok(StateSnapshot::new(
            self.registry.export(key.as_ref())?,
            self.ledger.export(),
        ))
    }

    /// Write the snapshot to the configured state path. No-op without one.
    ///
    /// Blocks on file I/O; async callers use [`Self::persist_in_background`].
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Storage` if the file cannot be written.
    pub fn persist(&self) -> Result<(), WebhookError> {
        let Some((store, key)) = &self.store else {
            return Ok(());
        };

        let _guard = self.persist_lock.lock();
        let snapshot = self.snapshot(key)?;
        store.save(&snapshot)?;

        tracing::debug!(
            target: "webhook_registry",
            path = %store.path().display(),
            subscriptions = snapshot.subscriptions.len(),
            deliveries = snapshot.deliveries.len(),
            "Webhook state persisted"
        );
        Ok(())
    }

    /// [`Self::persist`] on the blocking thread pool.
    pub async fn persist_in_background(self: Arc<Self>) -> Result<(), WebhookError> {
        tokio::task::spawn_blocking(move || self.persist())
            .await
            .map_err(|e| WebhookError::Internal(format!("Snapshot task failed: {e}")))?
    }

    // --- Subscriptions ---

    /// Register a subscription. The returned value carries the secret; no
    /// later call exposes it again.
    pub fn create_subscription(
        &self,
        organization_id: Uuid,
        url: &str,
        events: Vec<WebhookEventType>,
    ) -> Result<CreatedWebhookSubscription, WebhookError> {
        self.registry.create(organization_id, url, events)
    }

    pub fn update_subscription(
        &self,
        id: Uuid,
        patch: SubscriptionPatch,
    ) -> Result<WebhookSubscription, WebhookError> {
        self.registry.update(id, patch)
    }

    /// Remove a subscription, abort its scheduled retries and drop its
    /// finished delivery records. Idempotent.
    pub fn delete_subscription(&self, id: Uuid) {
        if !self.registry.delete(id) {
            return;
        }

        let cancelled = self.scheduler.cancel_for_subscription(id);
        for delivery_id in &cancelled {
            let _ = self.ledger.update(*delivery_id, |d| {
                d.status = DeliveryStatus::Failed;
                d.error = Some(SUBSCRIPTION_DELETED.to_string());
                d.next_attempt_at = None;
                d.completed_at = Some(Utc::now());
            });
        }

        let pruned = self.ledger.remove_subscription(id);

        tracing::info!(
            target: "webhook_registry",
            subscription_id = %id,
            cancelled_retries = cancelled.len(),
            pruned_deliveries = pruned,
            "Cleaned up deleted subscription"
        );
    }

    pub fn get_subscription(&self, id: Uuid) -> Result<WebhookSubscription, WebhookError> {
        self.registry.get(id)
    }

    pub fn list_subscriptions(&self, organization_id: Uuid) -> Vec<WebhookSubscription> {
        self.registry.list_by_organization(organization_id)
    }

    // --- Dispatch ---

    /// Fan an event out to matching subscriptions. Never blocks on network I/O
    /// and never fails; returns the number of deliveries enqueued.
    pub fn trigger_webhook(
        &self,
        organization_id: Uuid,
        event: WebhookEventType,
        data: serde_json::Value,
        metadata: Option<serde_json::Value>,
    ) -> usize {
        self.dispatcher
            .trigger(organization_id, event, data, metadata)
    }

    /// Send one synthetic delivery right now and report whether it got a 2xx.
    ///
    /// Not queued, not retried, not recorded, and does not touch the
    /// subscription's failure counter.
    pub async fn test_webhook(&self, id: Uuid) -> Result<bool, WebhookError> {
        let subscription = self.registry.get(id)?;
        let target = self
            .registry
            .signing_target(id)
            .ok_or(WebhookError::SubscriptionNotFound)?;

        // Events are kept in catalogue order, so this is the earliest kind
        // in the catalogue the subscription listens to.
        let event = subscription
            .events
            .first()
            .copied()
            .unwrap_or(DEFAULT_TEST_EVENT);
        let payload = WebhookPayload::new(
            subscription.organization_id,
            event,
            serde_json::json!({
                "message": "This is a test webhook delivery",
                "subscription_id": subscription.id,
            }),
            Some(serde_json::json!({ "test": true })),
        );
        let body = payload
            .to_bytes()
            .map_err(|e| WebhookError::Internal(format!("Failed to serialize payload: {e}")))?;

        let delivery_id = Uuid::new_v4();
        let outcome = self
            .transport
            .send(DeliveryRequest {
                delivery_id,
                event,
                url: &subscription.url,
                body: &body,
                secret: target.secret.as_ref(),
            })
            .await;

        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery_id,
            subscription_id = %id,
            success = outcome.success,
            status = ?outcome.response_status,
            latency_ms = outcome.latency_ms,
            "Test webhook sent"
        );

        Ok(outcome.success)
    }

    // --- Ledger ---

    /// Deliveries of a subscription, most recent first.
    pub fn get_delivery_history(
        &self,
        subscription_id: Uuid,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        self.registry.get(subscription_id)?;
        Ok(self.ledger.history(subscription_id, limit))
    }

    pub fn get_delivery(&self, id: Uuid) -> Result<WebhookDelivery, WebhookError> {
        self.ledger.get(id)
    }

    /// Queue one more attempt of a terminally failed delivery.
    ///
    /// The attempt counter keeps growing from where it stopped. If the attempt
    /// fails the delivery goes back to `failed` without further retries.
    pub fn retry_delivery(&self, id: Uuid) -> Result<WebhookDelivery, WebhookError> {
        let delivery = self.ledger.get(id)?;
        if delivery.status != DeliveryStatus::Failed {
            return Err(WebhookError::DeliveryNotRetryable {
                status: delivery.status,
            });
        }

        let subscription = self.registry.get(delivery.subscription_id)?;
        if !subscription.is_active {
            return Err(WebhookError::SubscriptionInactive);
        }

        // Re-checked under the ledger lock; concurrent retries race here.
        let mut previous = DeliveryStatus::Failed;
        let queued = self.ledger.update(id, |d| {
            previous = d.status;
            if d.status == DeliveryStatus::Failed {
                d.status = DeliveryStatus::Pending;
                d.completed_at = None;
            }
        })?;
        if previous != DeliveryStatus::Failed {
            return Err(WebhookError::DeliveryNotRetryable { status: previous });
        }

        if let Err(e) = self.queue.enqueue(DeliveryJob::manual(id)) {
            let _ = self.ledger.update(id, |d| {
                d.status = DeliveryStatus::Failed;
                d.completed_at = Some(Utc::now());
            });
            return Err(e);
        }

        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %id,
            subscription_id = %queued.subscription_id,
            attempts = queued.attempts,
            "Manual delivery retry queued"
        );

        Ok(queued)
    }

    // --- Lifecycle ---

    /// Ask the worker to stop taking jobs. It finishes in-flight attempts first.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    #[must_use]
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Retries currently waiting on a backoff timer.
    #[must_use]
    pub fn pending_retries(&self) -> usize {
        self.scheduler.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (WebhookService, WebhookWorker) {
        WebhookService::new(WebhookConfig::default()).unwrap()
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (service, _worker) = service();
        let id = service
            .create_subscription(Uuid::new_v4(), "https://ok.example/hook", vec![])
            .unwrap()
            .subscription
            .id;
        service.delete_subscription(id);
        service.delete_subscription(id);
        assert!(matches!(
            service.get_subscription(id),
            Err(WebhookError::SubscriptionNotFound)
        ));
    }

    #[test]
    fn test_delete_prunes_finished_history() {
        let (service, _worker) = service();
        let org = Uuid::new_v4();
        for _ in 0..50 {
            let sub = service
                .create_subscription(org, "https://ok.example/hook", vec![WebhookEventType::OfferSent])
                .unwrap()
                .subscription;
            service.trigger_webhook(org, WebhookEventType::OfferSent, serde_json::json!({}), None);
            let delivery = &service.ledger.history(sub.id, 1)[0];
            service
                .ledger
                .update(delivery.id, |d| d.status = DeliveryStatus::Success)
                .unwrap();
            service.delete_subscription(sub.id);
        }

        assert!(service.list_subscriptions(org).is_empty());
        assert!(service.ledger.is_empty());
        assert!(service.ledger.export().is_empty());
    }

    #[test]
    fn test_state_path_requires_secret_key() {
        let config = WebhookConfig::default().with_state_path("/tmp/unused-state.json");
        assert!(matches!(
            WebhookService::new(config),
            Err(WebhookError::Storage(_))
        ));
    }

    #[test]
    fn test_history_of_unknown_subscription() {
        assert!(matches!(
            service().0.get_delivery_history(Uuid::new_v4(), 10),
            Err(WebhookError::SubscriptionNotFound)
        ));
    }

    #[test]
    fn test_retry_rejects_pending() {
        let (service, _worker) = service();
        let org = Uuid::new_v4();
        let sub = service
            .create_subscription(org, "https://ok.example/hook", vec![WebhookEventType::OfferSent])
            .unwrap()
            .subscription;
        service.trigger_webhook(org, WebhookEventType::OfferSent, serde_json::json!({}), None);
        let delivery = &service.get_delivery_history(sub.id, 1).unwrap()[0];

        assert!(matches!(
            service.retry_delivery(delivery.id),
            Err(WebhookError::DeliveryNotRetryable {
                status: DeliveryStatus::Pending
            })
        ));
    }

    #[test]
    fn test_retry_unknown_delivery() {
        assert!(matches!(
            service().0.retry_delivery(Uuid::new_v4()),
            Err(WebhookError::DeliveryNotFound)
        ));
    }

    #[tokio::test]
    async fn test_webhook_unknown_subscription() {
        assert!(matches!(
            service().0.test_webhook(Uuid::new_v4()).await,
            Err(WebhookError::SubscriptionNotFound)
        ));
    }
}
