//! Axum router setup for webhook endpoints.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Json, Router,
};
use utoipa::OpenApi;

use crate::error::ErrorResponse;
use crate::handlers::{deliveries, events, subscriptions};
use crate::models::{
    CreateWebhookSubscriptionRequest, CreatedWebhookSubscription, DeliveryStatus, EventTypeInfo,
    EventTypeListResponse, TestWebhookResponse, TriggerEventRequest, TriggerEventResponse,
    UpdateWebhookSubscriptionRequest, WebhookDelivery, WebhookDeliveryListResponse,
    WebhookEventType, WebhookPayload, WebhookSubscription, WebhookSubscriptionListResponse,
};
use crate::service::WebhookService;

/// Shared state for webhook handlers.
#[derive(Clone)]
pub struct WebhooksState {
    pub service: Arc<WebhookService>,
}

impl WebhooksState {
    /// Create a new webhooks state.
    pub fn new(service: Arc<WebhookService>) -> Self {
        Self { service }
    }
}

/// `OpenAPI` document of the webhook control surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Talent Webhooks API",
        version = "0.1.0",
        description = "Webhook subscriptions and delivery for recruiting events"
    ),
    paths(
        subscriptions::create_subscription_handler,
        subscriptions::list_subscriptions_handler,
        subscriptions::get_subscription_handler,
        subscriptions::update_subscription_handler,
        subscriptions::delete_subscription_handler,
        subscriptions::test_subscription_handler,
        subscriptions::list_event_types_handler,
        deliveries::list_deliveries_handler,
        deliveries::get_delivery_handler,
        deliveries::retry_delivery_handler,
        events::trigger_event_handler,
    ),
    components(schemas(
        WebhookEventType,
        WebhookPayload,
        WebhookSubscription,
        CreatedWebhookSubscription,
        CreateWebhookSubscriptionRequest,
        UpdateWebhookSubscriptionRequest,
        WebhookSubscriptionListResponse,
        DeliveryStatus,
        WebhookDelivery,
        WebhookDeliveryListResponse,
        TriggerEventRequest,
        TriggerEventResponse,
        TestWebhookResponse,
        EventTypeInfo,
        EventTypeListResponse,
        ErrorResponse,
    )),
    tags(
        (name = "Webhooks", description = "Webhook subscriptions, deliveries and event ingestion")
    )
)]
pub struct ApiDoc;

/// Creates the webhook router with all routes.
pub fn webhooks_router(state: WebhooksState) -> Router {
    Router::new()
        // Subscription CRUD
        .route(
            "/webhooks/subscriptions",
            post(subscriptions::create_subscription_handler)
                .get(subscriptions::list_subscriptions_handler),
        )
        .route(
            "/webhooks/subscriptions/:id",
            get(subscriptions::get_subscription_handler)
                .patch(subscriptions::update_subscription_handler)
                .delete(subscriptions::delete_subscription_handler),
        )
        .route(
            "/webhooks/subscriptions/:id/test",
            post(subscriptions::test_subscription_handler),
        )
        // Event types
        .route(
            "/webhooks/event-types",
            get(subscriptions::list_event_types_handler),
        )
        // Delivery history
        .route(
            "/webhooks/subscriptions/:id/deliveries",
            get(deliveries::list_deliveries_handler),
        )
        .route("/webhooks/deliveries/:id", get(deliveries::get_delivery_handler))
        .route(
            "/webhooks/deliveries/:id/retry",
            post(deliveries::retry_delivery_handler),
        )
        // Event ingestion
        .route("/webhooks/events", post(events::trigger_event_handler))
        .route(
            "/webhooks/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .with_state(state)
}
