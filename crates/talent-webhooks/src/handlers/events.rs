//! Event ingestion handler for domain producers that sit outside the process.

use axum::{extract::State, http::StatusCode, Json};

use crate::error::{ApiResult, WebhookError};
use crate::models::{TriggerEventRequest, TriggerEventResponse, WebhookEventType};
use crate::router::WebhooksState;

/// Trigger an event. Answers as soon as deliveries are queued.
#[utoipa::path(
    post,
    path = "/webhooks/events",
    tag = "Webhooks",
    request_body = TriggerEventRequest,
    responses(
        (status = 202, description = "Deliveries queued", body = TriggerEventResponse),
        (status = 400, description = "Unknown event type", body = crate::error::ErrorResponse),
    )
)]
pub async fn trigger_event_handler(
    State(state): State<WebhooksState>,
    Json(request): Json<TriggerEventRequest>,
) -> ApiResult<(StatusCode, Json<TriggerEventResponse>)> {
    let event = WebhookEventType::parse(&request.event)
        .ok_or_else(|| WebhookError::Validation(format!("Unknown event type: {}", request.event)))?;

    let matched = state.service.trigger_webhook(
        request.organization_id,
        event,
        request.data,
        request.metadata,
    );

    Ok((StatusCode::ACCEPTED, Json(TriggerEventResponse { matched })))
}
