//! Delivery ledger.
//!
//! Keeps one record per delivery job for inspection, history queries and
//! manual retries. Retention is bounded per subscription; only terminal
//! records are ever evicted, so in-flight deliveries are never lost.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::config::DEFAULT_HISTORY_RETENTION;
use crate::error::WebhookError;
use crate::models::WebhookDelivery;

#[derive(Debug, Default)]
struct LedgerInner {
    deliveries: HashMap<Uuid, WebhookDelivery>,
    /// Delivery ids per subscription, oldest first.
    by_subscription: HashMap<Uuid, VecDeque<Uuid>>,
}

/// In-memory delivery ledger.
#[derive(Debug)]
pub struct DeliveryLedger {
    inner: RwLock<LedgerInner>,
    retention: usize,
}

impl Default for DeliveryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_RETENTION)
    }
}

impl DeliveryLedger {
    /// Create a ledger keeping at most `retention` deliveries per subscription.
    #[must_use]
    pub fn new(retention: usize) -> Self {
        Self {
            inner: RwLock::new(LedgerInner::default()),
            retention: retention.max(1),
        }
    }

    /// Record a new delivery.
    pub fn insert(&self, delivery: WebhookDelivery) {
        let mut inner = self.inner.write();
        let subscription_id = delivery.subscription_id;
        let delivery_id = delivery.id;

        inner.deliveries.insert(delivery_id, delivery);
        inner
            .by_subscription
            .entry(subscription_id)
            .or_default()
            .push_back(delivery_id);

        Self::evict(&mut inner, subscription_id, self.retention);
    }

    /// Drop the oldest terminal records beyond the retention bound.
    fn evict(inner: &mut LedgerInner, subscription_id: Uuid, retention: usize) {
        let LedgerInner {
            deliveries,
            by_subscription,
        } = inner;
        let Some(ids) = by_subscription.get_mut(&subscription_id) else {
            return;
        };

        let mut excess = ids.len().saturating_sub(retention);
        if excess == 0 {
            return;
        }

        ids.retain(|id| {
            if excess == 0 {
                return true;
            }
            let terminal = deliveries
                .get(id)
                .map_or(true, |d| d.status.is_terminal());
            if terminal {
                deliveries.remove(id);
                excess -= 1;
                false
            } else {
                true
            }
        });
    }

    /// Look up one delivery.
    pub fn get(&self, id: Uuid) -> Result<WebhookDelivery, WebhookError> {
        self.inner
            .read()
            .deliveries
            .get(&id)
            .cloned()
            .ok_or(WebhookError::DeliveryNotFound)
    }

    /// Mutate a delivery in place and return the updated copy.
    pub fn update<F>(&self, id: Uuid, f: F) -> Result<WebhookDelivery, WebhookError>
    where
        F: FnOnce(&mut WebhookDelivery),
    {
        let mut inner = self.inner.write();
        let delivery = inner
            .deliveries
            .get_mut(&id)
            .ok_or(WebhookError::DeliveryNotFound)?;
        f(delivery);
        Ok(delivery.clone())
    }

    /// Deliveries of a subscription, most recent first, at most `limit`.
    pub fn history(&self, subscription_id: Uuid, limit: usize) -> Vec<WebhookDelivery> {
        let inner = self.inner.read();
        inner
            .by_subscription
            .get(&subscription_id)
            .map(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| inner.deliveries.get(id).cloned())
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Forget a deleted subscription: drop its finished records and, once
    /// none are left open, its index entry. Returns the records dropped.
    ///
    /// Open records stay until the worker closes them; calling this again
    /// afterwards removes the rest.
    pub fn remove_subscription(&self, subscription_id: Uuid) -> usize {
        let mut inner = self.inner.write();
        let LedgerInner {
            deliveries,
            by_subscription,
        } = &mut *inner;
        let Some(ids) = by_subscription.get_mut(&subscription_id) else {
            return 0;
        };

        let before = ids.len();
        ids.retain(|id| match deliveries.get(id) {
            Some(d) if !d.status.is_terminal() => true,
            _ => {
                deliveries.remove(id);
                false
            }
        });
        let removed = before - ids.len();
        if ids.is_empty() {
            by_subscription.remove(&subscription_id);
        }
        removed
    }

    /// Every record, oldest first. Re-inserting them in order rebuilds the ledger.
    pub fn export(&self) -> Vec<WebhookDelivery> {
        let mut all: Vec<WebhookDelivery> =
            self.inner.read().deliveries.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    /// Total number of records held.
    pub fn len(&self) -> usize {
        self.inner.read().deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
