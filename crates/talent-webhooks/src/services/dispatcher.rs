//! Event dispatcher.
//!
//! Entry point for domain producers. Resolves matching subscriptions and
//! enqueues one delivery per match. Never performs network I/O and never
//! reports delivery problems back to the caller.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::models::{DeliveryStatus, WebhookDelivery, WebhookEventType, WebhookPayload};
use crate::queue::{DeliveryJob, DeliveryQueue};
use crate::services::ledger_service::DeliveryLedger;
use crate::services::subscription_service::SubscriptionRegistry;

/// Fans events out to matching subscriptions.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    registry: Arc<SubscriptionRegistry>,
    ledger: Arc<DeliveryLedger>,
    queue: DeliveryQueue,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        ledger: Arc<DeliveryLedger>,
        queue: DeliveryQueue,
    ) -> Self {
        Self {
            registry,
            ledger,
            queue,
        }
    }

    /// Enqueue one delivery per matching active subscription.
    ///
    /// Returns the number of deliveries created. Zero matches is a cheap no-op.
    pub fn trigger(
        &self,
        organization_id: Uuid,
        event: WebhookEventType,
        data: serde_json::Value,
        metadata: Option<serde_json::Value>,
    ) -> usize {
        let subscriptions = self.registry.matching_for(organization_id, event);

        if subscriptions.is_empty() {
            tracing::debug!(
                target: "webhook_delivery",
                organization_id = %organization_id,
                event = %event,
                "No active subscriptions match event"
            );
            return 0;
        }

        let payload = WebhookPayload::new(organization_id, event, data, metadata);
        let now = Utc::now();

        for subscription in &subscriptions {
            let delivery = WebhookDelivery::pending(subscription, payload.clone());
            let delivery_id = delivery.id;
            self.ledger.insert(delivery);

            if let Err(e) = self.queue.enqueue(DeliveryJob::new(delivery_id)) {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery_id,
                    subscription_id = %subscription.id,
                    error = %e,
                    "Failed to enqueue delivery"
                );
                let _ = self.ledger.update(delivery_id, |d| {
                    d.status = DeliveryStatus::Failed;
                    d.error = Some(e.to_string());
                    d.completed_at = Some(Utc::now());
                });
                continue;
            }

            self.registry.mark_triggered(subscription.id, now);
        }

        tracing::info!(
            target: "webhook_delivery",
            organization_id = %organization_id,
            event = %event,
            subscription_count = subscriptions.len(),
            "Enqueued event deliveries"
        );

        subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (
        EventDispatcher,
        Arc<SubscriptionRegistry>,
        Arc<DeliveryLedger>,
        crate::queue::DeliveryReceiver,
    ) {
        let registry = Arc::new(SubscriptionRegistry::new());
        let ledger = Arc::new(DeliveryLedger::default());
        let (queue, rx) = DeliveryQueue::channel();
        let dispatcher = EventDispatcher::new(Arc::clone(&registry), Arc::clone(&ledger), queue);
        (dispatcher, registry, ledger, rx)
    }

    #[test]
    fn test_no_match_is_noop() {
        let (dispatcher, _registry, ledger, mut rx) = setup();
        let matched = dispatcher.trigger(
            Uuid::new_v4(),
            WebhookEventType::OfferSent,
            serde_json::json!({}),
            None,
        );
        assert_eq!(matched, 0);
        assert!(ledger.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_one_job_per_match() {
        let (dispatcher, registry, ledger, mut rx) = setup();
        let org = Uuid::new_v4();
        let a = registry
            .create(org, "https://a.example/h", vec![WebhookEventType::ApplicationCreated])
            .unwrap()
            .subscription;
        registry
            .create(org, "https://b.example/h", vec![WebhookEventType::ApplicationCreated])
            .unwrap();

        let matched = dispatcher.trigger(
            org,
            WebhookEventType::ApplicationCreated,
            serde_json::json!({"id": "A1"}),
            None,
        );
        assert_eq!(matched, 2);
        assert_eq!(ledger.len(), 2);

        let job = rx.try_recv().unwrap();
        let delivery = ledger.get(job.delivery_id).unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.attempts, 0);
        assert_eq!(delivery.payload.data["id"], "A1");
        assert!(rx.try_recv().is_ok());

        assert!(registry.get(a.id).unwrap().last_triggered_at.is_some());
    }

    #[test]
    fn test_closed_queue_marks_failed() {
        let (dispatcher, registry, ledger, rx) = setup();
        drop(rx);
        let org = Uuid::new_v4();
        let sub = registry
            .create(org, "https://a.example/h", vec![WebhookEventType::OfferAccepted])
            .unwrap()
            .subscription;

        dispatcher.trigger(org, WebhookEventType::OfferAccepted, serde_json::json!({}), None);

        let history = ledger.history(sub.id, 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, DeliveryStatus::Failed);
    }
}
