//! CRUD handlers for webhook subscriptions.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiResult, WebhookError};
use crate::models::{
    CreateWebhookSubscriptionRequest, CreatedWebhookSubscription, EventTypeInfo,
    EventTypeListResponse, ListSubscriptionsQuery, SubscriptionPatch, TestWebhookResponse,
    UpdateWebhookSubscriptionRequest, WebhookEventType, WebhookSubscription,
    WebhookSubscriptionListResponse,
};
use crate::router::WebhooksState;
use crate::validation::parse_event_types;

// ---------------------------------------------------------------------------
// Subscription CRUD handlers
// ---------------------------------------------------------------------------

/// Create a new webhook subscription.
///
/// The response is the only place the signing secret is ever returned.
#[utoipa::path(
    post,
    path = "/webhooks/subscriptions",
    tag = "Webhooks",
    request_body = CreateWebhookSubscriptionRequest,
    responses(
        (status = 201, description = "Subscription created", body = CreatedWebhookSubscription),
        (status = 400, description = "Invalid URL or event type", body = crate::error::ErrorResponse),
    )
)]
pub async fn create_subscription_handler(
    State(state): State<WebhooksState>,
    Json(request): Json<CreateWebhookSubscriptionRequest>,
) -> ApiResult<(StatusCode, Json<CreatedWebhookSubscription>)> {
    request
        .validate()
        .map_err(|e| WebhookError::Validation(e.to_string()))?;
    let events = parse_event_types(&request.events)?;

    let created = state
        .service
        .create_subscription(request.organization_id, &request.url, events)?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// List the webhook subscriptions of an organization.
#[utoipa::path(
    get,
    path = "/webhooks/subscriptions",
    tag = "Webhooks",
    params(ListSubscriptionsQuery),
    responses(
        (status = 200, description = "Subscription list", body = WebhookSubscriptionListResponse),
    )
)]
pub async fn list_subscriptions_handler(
    State(state): State<WebhooksState>,
    Query(query): Query<ListSubscriptionsQuery>,
) -> ApiResult<Json<WebhookSubscriptionListResponse>> {
    let items = state.service.list_subscriptions(query.organization_id);
    let total = items.len();
    Ok(Json(WebhookSubscriptionListResponse { items, total }))
}

/// Get a single webhook subscription.
#[utoipa::path(
    get,
    path = "/webhooks/subscriptions/{id}",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Subscription ID")
    ),
    responses(
        (status = 200, description = "Subscription details", body = WebhookSubscription),
        (status = 404, description = "Subscription not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn get_subscription_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WebhookSubscription>> {
    Ok(Json(state.service.get_subscription(id)?))
}

/// Update a webhook subscription.
#[utoipa::path(
    patch,
    path = "/webhooks/subscriptions/{id}",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Subscription ID")
    ),
    request_body = UpdateWebhookSubscriptionRequest,
    responses(
        (status = 200, description = "Subscription updated", body = WebhookSubscription),
        (status = 400, description = "Validation error", body = crate::error::ErrorResponse),
        (status = 404, description = "Subscription not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn update_subscription_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateWebhookSubscriptionRequest>,
) -> ApiResult<Json<WebhookSubscription>> {
    request
        .validate()
        .map_err(|e| WebhookError::Validation(e.to_string()))?;

    let events = request
        .events
        .as_deref()
        .map(parse_event_types)
        .transpose()?;

    let updated = state.service.update_subscription(
        id,
        SubscriptionPatch {
            url: request.url,
            events,
            is_active: request.is_active,
        },
    )?;

    Ok(Json(updated))
}

/// Delete a webhook subscription. Deleting an unknown id is not an error.
#[utoipa::path(
    delete,
    path = "/webhooks/subscriptions/{id}",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Subscription ID")
    ),
    responses(
        (status = 204, description = "Subscription deleted"),
    )
)]
pub async fn delete_subscription_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> StatusCode {
    state.service.delete_subscription(id);
    StatusCode::NO_CONTENT
}

/// Send a synthetic test delivery to a subscription.
#[utoipa::path(
    post,
    path = "/webhooks/subscriptions/{id}/test",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Subscription ID")
    ),
    responses(
        (status = 200, description = "Test delivery attempted", body = TestWebhookResponse),
        (status = 404, description = "Subscription not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn test_subscription_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TestWebhookResponse>> {
    let success = state.service.test_webhook(id).await?;
    Ok(Json(TestWebhookResponse { success }))
}

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// List all available webhook event types.
#[utoipa::path(
    get,
    path = "/webhooks/event-types",
    tag = "Webhooks",
    responses(
        (status = 200, description = "Available event types", body = EventTypeListResponse),
    )
)]
pub async fn list_event_types_handler() -> Json<EventTypeListResponse> {
    let event_types = WebhookEventType::all()
        .into_iter()
        .map(|et| EventTypeInfo {
            event_type: et.as_str().to_string(),
            category: et.category().to_string(),
            description: et.description().to_string(),
        })
        .collect();

    Json(EventTypeListResponse { event_types })
}
