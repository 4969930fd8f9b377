//! Handlers for delivery history, inspection and manual retry.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{ListDeliveriesQuery, WebhookDelivery, WebhookDeliveryListResponse};
use crate::router::WebhooksState;

/// Upper bound on a single history page.
const MAX_HISTORY_LIMIT: usize = 500;

/// Delivery history of a subscription, most recent first.
#[utoipa::path(
    get,
    path = "/webhooks/subscriptions/{id}/deliveries",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Subscription ID"),
        ListDeliveriesQuery,
    ),
    responses(
        (status = 200, description = "Delivery history", body = WebhookDeliveryListResponse),
        (status = 404, description = "Subscription not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn list_deliveries_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListDeliveriesQuery>,
) -> ApiResult<Json<WebhookDeliveryListResponse>> {
    let limit = query.limit.clamp(1, MAX_HISTORY_LIMIT);
    let items = state.service.get_delivery_history(id, limit)?;
    Ok(Json(WebhookDeliveryListResponse { items, limit }))
}

/// Get a single delivery.
#[utoipa::path(
    get,
    path = "/webhooks/deliveries/{id}",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Delivery ID")
    ),
    responses(
        (status = 200, description = "Delivery details", body = WebhookDelivery),
        (status = 404, description = "Delivery not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn get_delivery_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WebhookDelivery>> {
    Ok(Json(state.service.get_delivery(id)?))
}

/// Queue one more attempt of a failed delivery.
#[utoipa::path(
    post,
    path = "/webhooks/deliveries/{id}/retry",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Delivery ID")
    ),
    responses(
        (status = 202, description = "Retry queued", body = WebhookDelivery),
        (status = 404, description = "Delivery or subscription not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Delivery not failed or subscription inactive", body = crate::error::ErrorResponse),
        (status = 503, description = "Delivery queue closed", body = crate::error::ErrorResponse),
    )
)]
pub async fn retry_delivery_handler(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<WebhookDelivery>)> {
    let delivery = state.service.retry_delivery(id)?;
    Ok((StatusCode::ACCEPTED, Json(delivery)))
}
