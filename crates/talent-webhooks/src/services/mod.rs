//! Business logic services for the webhook system.

pub mod delivery_service;
pub mod dispatcher;
pub mod ledger_service;
pub mod subscription_service;
