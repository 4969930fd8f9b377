//! Webhook HTTP transport.
//!
//! Executes a single signed POST to a subscriber endpoint and classifies the
//! outcome. Retry policy and bookkeeping live in the worker; this service
//! only knows how to send one attempt.

use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::crypto;
use crate::error::WebhookError;
use crate::models::WebhookEventType;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const DELIVERY_ID_HEADER: &str = "X-Webhook-Delivery-ID";

/// Stored response bodies are cut to this many characters.
pub const MAX_RESPONSE_BODY_CHARS: usize = 4096;

/// One fully prepared attempt.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryRequest<'a> {
    pub delivery_id: Uuid,
    pub event: WebhookEventType,
    pub url: &'a str,
    /// Exact serialized payload; signed and sent as-is.
    pub body: &'a [u8],
    pub secret: &'a [u8],
}

/// Outcome of a single HTTP attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub success: bool,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

/// Service for executing webhook HTTP attempts.
#[derive(Debug, Clone)]
pub struct DeliveryService {
    http_client: Client,
    request_timeout: std::time::Duration,
}

impl DeliveryService {
    /// Create a delivery service with a shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(config: &WebhookConfig) -> Result<Self, WebhookError> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            request_timeout: config.request_timeout,
        })
    }

    /// Sign and POST one attempt. Never returns an error: every failure mode
    /// is folded into the outcome.
    pub async fn send(&self, request: DeliveryRequest<'_>) -> AttemptOutcome {
        let signature = crypto::sign_payload(request.body, request.secret);
        let headers = build_headers(&signature, request.event, request.delivery_id);

        let start = Instant::now();
        let result = self
            .http_client
            .post(request.url)
            .headers(headers)
            .body(request.body.to_vec())
            .send()
            .await;

        match result {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let body = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(MAX_RESPONSE_BODY_CHARS)
                    .collect::<String>();
                let latency_ms = elapsed_ms(start);

                let success = (200..300).contains(&status_code);
                AttemptOutcome {
                    success,
                    response_status: Some(status_code),
                    response_body: Some(body),
                    error: (!success).then(|| format!("HTTP {status_code}")),
                    latency_ms,
                }
            }
            Err(e) => {
                let error_msg = if e.is_timeout() {
                    format!("Request timeout ({}ms)", self.request_timeout.as_millis())
                } else if e.is_connect() {
                    format!("Connection failed: {e}")
                } else {
                    format!("Request error: {e}")
                };

                AttemptOutcome {
                    success: false,
                    response_status: None,
                    response_body: None,
                    error: Some(error_msg),
                    latency_ms: elapsed_ms(start),
                }
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Outbound headers. Every value is hex, a UUID or a static event name, so
/// none of them can fail header validation; `from_str` failures are skipped.
fn build_headers(signature: &str, event: WebhookEventType, delivery_id: Uuid) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(v) = HeaderValue::from_str(signature) {
        headers.insert(SIGNATURE_HEADER, v);
    }
    headers.insert(EVENT_HEADER, HeaderValue::from_static(event.as_str()));
    if let Ok(v) = HeaderValue::from_str(&delivery_id.to_string()) {
        headers.insert(DELIVERY_ID_HEADER, v);
    }
    headers
}
