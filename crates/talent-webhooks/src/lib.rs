//! Webhook delivery system for recruiting and HR domain events.
//!
//! Provides per-organization webhook subscriptions, an event dispatcher that
//! never blocks producers, a bounded worker pool delivering HMAC-SHA256
//! signed payloads with exponential backoff, automatic suspension of
//! endpoints that keep failing, and a delivery ledger for inspection and
//! manual retries. Subscriptions and open deliveries can be snapshotted to
//! disk and restored at startup.

pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod models;
pub mod queue;
pub mod router;
pub mod service;
pub mod services;
pub mod store;
pub mod validation;
pub mod worker;

pub use config::{ConfigError, WebhookConfig};
pub use error::WebhookError;
pub use models::{DeliveryStatus, WebhookDelivery, WebhookEventType, WebhookSubscription};
pub use router::{webhooks_router, ApiDoc, WebhooksState};
pub use service::WebhookService;
pub use worker::WebhookWorker;
