//! Common test utilities for talent-webhooks integration tests.
//!
//! Provides wiremock responders, a fast-backoff service fixture and polling
//! helpers for asserting on asynchronous delivery outcomes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use talent_webhooks::{
    DeliveryStatus, WebhookConfig, WebhookDelivery, WebhookEventType, WebhookService,
};
use tokio::task::JoinHandle;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

/// Standard test organization IDs
pub const ORG_A: Uuid = Uuid::from_bytes([
    0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11,
]);

pub const ORG_B: Uuid = Uuid::from_bytes([
    0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22,
]);

pub const WEBHOOK_PATH: &str = "/webhook";

/// Default wait for a delivery to settle.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Config with millisecond backoff (20ms, 40ms) and private hosts allowed.
pub fn fast_config() -> WebhookConfig {
    WebhookConfig::default()
        .with_allow_private_hosts(true)
        .with_backoff(2, Duration::from_millis(10))
        .with_request_timeout(Duration::from_secs(2))
}

/// Build the service and spawn its worker.
pub fn start_service(config: WebhookConfig) -> (Arc<WebhookService>, JoinHandle<()>) {
    let (service, worker) = WebhookService::new(config).expect("service should build");
    let handle = tokio::spawn(worker.run());
    (Arc::new(service), handle)
}

/// Mount `responder` on `POST /webhook` and return the full URL.
pub async fn mount<R: Respond + 'static>(server: &MockServer, responder: R) -> String {
    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .respond_with(responder)
        .mount(server)
        .await;
    format!("{}{WEBHOOK_PATH}", server.uri())
}

/// Create a subscription and return `(id, secret)`.
pub fn subscribe(
    service: &WebhookService,
    org: Uuid,
    url: &str,
    events: &[WebhookEventType],
) -> (Uuid, String) {
    let created = service
        .create_subscription(org, url, events.to_vec())
        .expect("subscription should be created");
    (created.subscription.id, created.secret)
}

/// The single delivery of a subscription.
pub fn only_delivery(service: &WebhookService, subscription_id: Uuid) -> WebhookDelivery {
    let history = service
        .get_delivery_history(subscription_id, 10)
        .expect("subscription should exist");
    assert_eq!(history.len(), 1, "expected exactly one delivery");
    history.into_iter().next().expect("checked above")
}

/// Poll until the delivery reaches `success` or `failed`.
pub async fn wait_for_terminal(service: &WebhookService, delivery_id: Uuid) -> WebhookDelivery {
    wait_for_status(service, delivery_id, |s| s.is_terminal()).await
}

/// Poll until the delivery status satisfies `predicate`.
pub async fn wait_for_status<F>(
    service: &WebhookService,
    delivery_id: Uuid,
    predicate: F,
) -> WebhookDelivery
where
    F: Fn(DeliveryStatus) -> bool,
{
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    loop {
        let delivery = service
            .get_delivery(delivery_id)
            .expect("delivery should exist");
        if predicate(delivery.status) {
            return delivery;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "delivery {delivery_id} stuck in {}",
            delivery.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `condition` holds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Trigger one event and wait for the single resulting delivery to settle.
pub async fn trigger_and_settle(
    service: &WebhookService,
    org: Uuid,
    subscription_id: Uuid,
    event: WebhookEventType,
) -> WebhookDelivery {
    let before = service
        .get_delivery_history(subscription_id, 1)
        .expect("subscription should exist")
        .first()
        .map(|d| d.id);
    assert_eq!(
        service.trigger_webhook(org, event, serde_json::json!({"id": "A1"}), None),
        1
    );
    let newest = service
        .get_delivery_history(subscription_id, 1)
        .expect("subscription should exist")
        .remove(0);
    assert_ne!(Some(newest.id), before, "a new delivery should be recorded");
    wait_for_terminal(service, newest.id).await
}

// ---------------------------------------------------------------------------
// CapturedRequest - for inspecting webhook requests
// ---------------------------------------------------------------------------

/// A captured HTTP request with body and headers.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl CapturedRequest {
    /// Parse the body as JSON.
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }
}

fn capture(request: &Request) -> CapturedRequest {
    CapturedRequest {
        body: request.body.clone(),
        headers: request
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect(),
        timestamp: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// CaptureResponder - captures requests and returns a fixed status
// ---------------------------------------------------------------------------

/// A wiremock responder that captures incoming requests.
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    response_code: u16,
}

impl CaptureResponder {
    /// Create a new capture responder that returns 200 OK.
    pub fn new() -> Self {
        Self::with_status(200)
    }

    /// Create a capture responder that returns a custom status code.
    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: status,
        }
    }

    /// Get all captured requests.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Get the number of captured requests.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for CaptureResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.requests.lock().unwrap().push(capture(request));
        ResponseTemplate::new(self.response_code).set_body_string("ok")
    }
}

// ---------------------------------------------------------------------------
// CountingResponder - counts requests
// ---------------------------------------------------------------------------

/// A wiremock responder that counts incoming requests.
#[derive(Clone)]
pub struct CountingResponder {
    count: Arc<AtomicU32>,
    response_code: u16,
}

impl CountingResponder {
    /// Create a new counting responder that returns 200 OK.
    pub fn new() -> Self {
        Self::with_status(200)
    }

    /// Create a counting responder that returns a custom status code.
    pub fn with_status(status: u16) -> Self {
        Self {
            count: Arc::new(AtomicU32::new(0)),
            response_code: status,
        }
    }

    /// Get the current request count.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Default for CountingResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CountingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.count.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(self.response_code)
    }
}

// ---------------------------------------------------------------------------
// FailingResponder - fails N times then succeeds
// ---------------------------------------------------------------------------

/// A wiremock responder that fails a specified number of times before succeeding.
#[derive(Clone)]
pub struct FailingResponder {
    attempt_count: Arc<AtomicU32>,
    failures_before_success: u32,
    failure_code: u16,
}

impl FailingResponder {
    /// Create a responder that fails `n` times with 500, then returns 200.
    pub fn fail_times(n: u32) -> Self {
        Self::fail_with_status(n, 500)
    }

    /// Create a responder that fails with a custom status code.
    pub fn fail_with_status(n: u32, failure_code: u16) -> Self {
        Self {
            attempt_count: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
            failure_code,
        }
    }

    /// Get the current attempt count.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count.load(Ordering::SeqCst)
    }
}

impl Respond for FailingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.attempt_count.fetch_add(1, Ordering::SeqCst);
        if n < self.failures_before_success {
            ResponseTemplate::new(self.failure_code)
        } else {
            ResponseTemplate::new(200)
        }
    }
}

// ---------------------------------------------------------------------------
// ToggleResponder - status switchable at runtime
// ---------------------------------------------------------------------------

/// A wiremock responder whose status can be changed between deliveries.
#[derive(Clone)]
pub struct ToggleResponder {
    status: Arc<AtomicU16>,
    count: Arc<AtomicU32>,
}

impl ToggleResponder {
    pub fn new(status: u16) -> Self {
        Self {
            status: Arc::new(AtomicU16::new(status)),
            count: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Respond for ToggleResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.count.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(self.status.load(Ordering::SeqCst))
    }
}

// ---------------------------------------------------------------------------
// DelayedResponder - adds response delay
// ---------------------------------------------------------------------------

/// A wiremock responder that adds a delay before responding.
#[derive(Clone)]
pub struct DelayedResponder {
    delay_ms: u64,
    response_code: u16,
    count: Arc<AtomicU32>,
}

impl DelayedResponder {
    /// Create a responder that delays for `ms` milliseconds.
    pub fn new(delay_ms: u64) -> Self {
        Self::with_status(delay_ms, 200)
    }

    /// Create a delayed responder with custom status code.
    pub fn with_status(delay_ms: u64, response_code: u16) -> Self {
        Self {
            delay_ms,
            response_code,
            count: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Respond for DelayedResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.count.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(self.response_code).set_delay(Duration::from_millis(self.delay_ms))
    }
}
