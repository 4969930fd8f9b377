//! HTTP handlers for the webhook control surface.

pub mod deliveries;
pub mod events;
pub mod subscriptions;
