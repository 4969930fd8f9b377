//! Webhook subscription registry.
//!
//! In-memory table of subscriptions per organization. Creation validates the
//! target URL and mints the signing secret. The registry also tracks
//! consecutive delivery failures and suspends a subscription once the
//! configured threshold is reached.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::crypto::{self, WebhookSecret};
use crate::error::WebhookError;
use crate::models::{
    CreatedWebhookSubscription, SubscriptionPatch, WebhookEventType, WebhookSubscription,
};
use crate::store::PersistedSubscription;
use crate::validation;

/// Consecutive failed deliveries before a subscription is suspended.
pub const FAILURE_SUSPEND_THRESHOLD: u32 = crate::config::DEFAULT_FAILURE_SUSPEND_THRESHOLD;

/// Stored form of a subscription; holds the secret the public view omits.
#[derive(Debug, Clone)]
struct SubscriptionRecord {
    id: Uuid,
    organization_id: Uuid,
    url: String,
    events: BTreeSet<WebhookEventType>,
    secret: WebhookSecret,
    is_active: bool,
    failure_count: u32,
    created_at: DateTime<Utc>,
    last_triggered_at: Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
    fn to_view(&self) -> WebhookSubscription {
        WebhookSubscription {
            id: self.id,
            organization_id: self.organization_id,
            url: self.url.clone(),
            events: self.events.iter().copied().collect(),
            is_active: self.is_active,
            failure_count: self.failure_count,
            created_at: self.created_at,
            last_triggered_at: self.last_triggered_at,
        }
    }
}

/// What the worker needs right before an attempt.
#[derive(Debug, Clone)]
pub struct SigningTarget {
    pub is_active: bool,
    pub secret: WebhookSecret,
}

/// Registry of webhook subscriptions.
///
/// All mutation goes through one lock, which serializes updates per
/// subscription as well.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    subscriptions: RwLock<HashMap<Uuid, SubscriptionRecord>>,
    failure_threshold: u32,
    allow_private_hosts: bool,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry with the default suspension threshold.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            failure_threshold: FAILURE_SUSPEND_THRESHOLD,
            allow_private_hosts: false,
        }
    }

    /// Set the consecutive failure threshold for suspension.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Allow loopback/private URLs (for development/testing).
    #[must_use]
    pub fn with_allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    /// Create a new subscription. The returned value is the only one that carries the secret.
    pub fn create(
        &self,
        organization_id: Uuid,
        url: &str,
        events: Vec<WebhookEventType>,
    ) -> Result<CreatedWebhookSubscription, WebhookError> {
        validation::validate_webhook_url(url, self.allow_private_hosts)?;

        let record = SubscriptionRecord {
            id: Uuid::new_v4(),
            organization_id,
            url: url.to_string(),
            events: events.into_iter().collect(),
            secret: crypto::generate_secret(),
            is_active: true,
            failure_count: 0,
            created_at: Utc::now(),
            last_triggered_at: None,
        };

        let created = CreatedWebhookSubscription {
            subscription: record.to_view(),
            secret: record.secret.expose().to_string(),
        };

        self.subscriptions.write().insert(record.id, record);

        tracing::info!(
            target: "webhook_registry",
            subscription_id = %created.subscription.id,
            organization_id = %organization_id,
            event_count = created.subscription.events.len(),
            "Webhook subscription created"
        );

        Ok(created)
    }

    /// Apply a partial update. Secret and organization are never touched.
    pub fn update(
        &self,
        id: Uuid,
        patch: SubscriptionPatch,
    ) -> Result<WebhookSubscription, WebhookError> {
        if let Some(ref url) = patch.url {
            validation::validate_webhook_url(url, self.allow_private_hosts)?;
        }

        let mut subscriptions = self.subscriptions.write();
        let record = subscriptions
            .get_mut(&id)
            .ok_or(WebhookError::SubscriptionNotFound)?;

        if let Some(url) = patch.url {
            record.url = url;
        }
        if let Some(events) = patch.events {
            record.events = events.into_iter().collect();
        }
        if let Some(is_active) = patch.is_active {
            if record.is_active != is_active {
                tracing::info!(
                    target: "webhook_registry",
                    subscription_id = %id,
                    is_active,
                    failure_count = record.failure_count,
                    "Webhook subscription activation changed"
                );
            }
            record.is_active = is_active;
        }

        Ok(record.to_view())
    }

    /// Remove a subscription. Returns whether it existed; a second call is a no-op.
    pub fn delete(&self, id: Uuid) -> bool {
        let removed = self.subscriptions.write().remove(&id).is_some();
        if removed {
            tracing::info!(
                target: "webhook_registry",
                subscription_id = %id,
                "Webhook subscription deleted"
            );
        }
        removed
    }

    /// Look up one subscription.
    pub fn get(&self, id: Uuid) -> Result<WebhookSubscription, WebhookError> {
        self.subscriptions
            .read()
            .get(&id)
            .map(SubscriptionRecord::to_view)
            .ok_or(WebhookError::SubscriptionNotFound)
    }

    /// All subscriptions of an organization, oldest first.
    pub fn list_by_organization(&self, organization_id: Uuid) -> Vec<WebhookSubscription> {
        let mut subs: Vec<WebhookSubscription> = self
            .subscriptions
            .read()
            .values()
            .filter(|r| r.organization_id == organization_id)
            .map(SubscriptionRecord::to_view)
            .collect();
        subs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        subs
    }

    /// Active subscriptions of an organization that listen for `event`.
    pub fn matching_for(
        &self,
        organization_id: Uuid,
        event: WebhookEventType,
    ) -> Vec<WebhookSubscription> {
        self.subscriptions
            .read()
            .values()
            .filter(|r| {
                r.organization_id == organization_id && r.is_active && r.events.contains(&event)
            })
            .map(SubscriptionRecord::to_view)
            .collect()
    }

    /// Stamp `last_triggered_at`. Missing subscriptions are ignored.
    pub fn mark_triggered(&self, id: Uuid, at: DateTime<Utc>) {
        if let Some(record) = self.subscriptions.write().get_mut(&id) {
            record.last_triggered_at = Some(at);
        }
    }

    /// Record the outcome of a finished delivery.
    ///
    /// Success resets the consecutive failure counter. Failure increments it
    /// and suspends the subscription once the threshold is reached.
    /// Returns the updated view, or `None` if the subscription is gone.
    pub fn record_outcome(&self, id: Uuid, success: bool) -> Option<WebhookSubscription> {
        let mut subscriptions = self.subscriptions.write();
        let record = subscriptions.get_mut(&id)?;

        if success {
            record.failure_count = 0;
            return Some(record.to_view());
        }

        record.failure_count = record.failure_count.saturating_add(1);
        if record.is_active && record.failure_count >= self.failure_threshold {
            record.is_active = false;
            tracing::warn!(
                target: "webhook_registry",
                subscription_id = %id,
                organization_id = %record.organization_id,
                consecutive_failures = record.failure_count,
                threshold = self.failure_threshold,
                "Suspending subscription due to consecutive failures"
            );
        }

        Some(record.to_view())
    }

    /// Current secret and activation state, read right before an attempt.
    pub fn signing_target(&self, id: Uuid) -> Option<SigningTarget> {
        self.subscriptions.read().get(&id).map(|r| SigningTarget {
            is_active: r.is_active,
            secret: r.secret.clone(),
        })
    }

    /// Every subscription with its secret encrypted under `key`, oldest first.
    pub fn export(&self, key: &[u8]) -> Result<Vec<PersistedSubscription>, WebhookError> {
        let mut records = self
            .subscriptions
            .read()
            .values()
            .map(|r| {
                Ok(PersistedSubscription {
                    subscription: r.to_view(),
                    encrypted_secret: crypto::encrypt_secret(r.secret.expose(), key)?,
                })
            })
            .collect::<Result<Vec<_>, WebhookError>>()?;
        records.sort_by(|a, b| {
            a.subscription
                .created_at
                .cmp(&b.subscription.created_at)
                .then(a.subscription.id.cmp(&b.subscription.id))
        });
        Ok(records)
    }

    /// Load persisted subscriptions, replacing any with the same id.
    ///
    /// Nothing is loaded unless every secret decrypts. URLs are taken as
    /// stored; they were validated when first accepted.
    pub fn restore(
        &self,
        persisted: Vec<PersistedSubscription>,
        key: &[u8],
    ) -> Result<usize, WebhookError> {
        let records = persisted
            .into_iter()
            .map(|p| {
                let secret = crypto::decrypt_secret(&p.encrypted_secret, key)?;
                let subscription = p.subscription;
                Ok(SubscriptionRecord {
                    id: subscription.id,
                    organization_id: subscription.organization_id,
                    url: subscription.url,
                    events: subscription.events.into_iter().collect(),
                    secret: WebhookSecret::new(secret),
                    is_active: subscription.is_active,
                    failure_count: subscription.failure_count,
                    created_at: subscription.created_at,
                    last_triggered_at: subscription.last_triggered_at,
                })
            })
            .collect::<Result<Vec<_>, WebhookError>>()?;

        let count = records.len();
        let mut subscriptions = self.subscriptions.write();
        for record in records {
            subscriptions.insert(record.id, record);
        }
        Ok(count)
    }
}
