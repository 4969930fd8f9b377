//! Integration tests for HMAC-SHA256 webhook signatures.
//!
//! Receivers verify `X-Webhook-Signature` over the raw body with the secret
//! handed out at subscription creation.

mod common;

use common::*;
use talent_webhooks::crypto::{sign_payload, verify_signature};
use talent_webhooks::WebhookEventType;
use wiremock::MockServer;

/// Test: Captured signature verifies against the captured body.
#[tokio::test]
async fn test_signature_verifies_with_subscription_secret() {
    let server = MockServer::start().await;
    let capture = CaptureResponder::new();
    let url = mount(&server, capture.clone()).await;
    let (service, _worker) = start_service(fast_config());

    let (sub_id, secret) = subscribe(&service, ORG_A, &url, &[WebhookEventType::OfferAccepted]);
    trigger_and_settle(&service, ORG_A, sub_id, WebhookEventType::OfferAccepted).await;

    let request = &capture.requests()[0];
    let signature = request.header("x-webhook-signature").unwrap();
    assert!(verify_signature(&request.body, signature, secret.as_bytes()));
    assert_eq!(signature, sign_payload(&request.body, secret.as_bytes()));
}

/// Test: Signature does not verify with another subscription's secret.
#[tokio::test]
async fn test_signature_rejects_other_secret() {
    let server = MockServer::start().await;
    let capture = CaptureResponder::new();
    let url = mount(&server, capture.clone()).await;
    let (service, _worker) = start_service(fast_config());

    let (sub_id, _secret) = subscribe(&service, ORG_A, &url, &[WebhookEventType::OfferAccepted]);
    let (_other, other_secret) = subscribe(&service, ORG_B, &url, &[]);
    trigger_and_settle(&service, ORG_A, sub_id, WebhookEventType::OfferAccepted).await;

    let request = &capture.requests()[0];
    let signature = request.header("x-webhook-signature").unwrap();
    assert!(!verify_signature(
        &request.body,
        signature,
        other_secret.as_bytes()
    ));
}

/// Test: Tampering with the body breaks verification.
#[tokio::test]
async fn test_tampered_body_fails_verification() {
    let server = MockServer::start().await;
    let capture = CaptureResponder::new();
    let url = mount(&server, capture.clone()).await;
    let (service, _worker) = start_service(fast_config());

    let (sub_id, secret) = subscribe(&service, ORG_A, &url, &[WebhookEventType::CheckInitiated]);
    trigger_and_settle(&service, ORG_A, sub_id, WebhookEventType::CheckInitiated).await;

    let request = &capture.requests()[0];
    let signature = request.header("x-webhook-signature").unwrap();
    let mut tampered = request.body.clone();
    tampered.extend_from_slice(b" ");
    assert!(!verify_signature(&tampered, signature, secret.as_bytes()));
}

/// Test: Every retry of a delivery is signed over identical bytes.
#[tokio::test]
async fn test_retries_resend_identical_signed_body() {
    let server = MockServer::start().await;
    let capture = CaptureResponder::with_status(500);
    let url = mount(&server, capture.clone()).await;
    let (service, _worker) = start_service(fast_config());

    let (sub_id, secret) =
        subscribe(&service, ORG_A, &url, &[WebhookEventType::CandidateAnonymized]);
    trigger_and_settle(&service, ORG_A, sub_id, WebhookEventType::CandidateAnonymized).await;

    let requests = capture.requests();
    assert_eq!(requests.len(), 3);
    for request in &requests {
        assert_eq!(request.body, requests[0].body);
        assert_eq!(
            request.header("x-webhook-delivery-id"),
            requests[0].header("x-webhook-delivery-id")
        );
        let signature = request.header("x-webhook-signature").unwrap();
        assert!(verify_signature(&request.body, signature, secret.as_bytes()));
    }
}

/// Test: Secrets follow the documented format and differ per subscription.
#[tokio::test]
async fn test_secret_format() {
    let (service, _worker) = start_service(fast_config());
    let (_, a) = subscribe(&service, ORG_A, "https://a.example/hook", &[]);
    let (_, b) = subscribe(&service, ORG_A, "https://a.example/hook", &[]);

    for secret in [&a, &b] {
        let hex_part = secret.strip_prefix("whsec_").expect("prefix");
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }
    assert_ne!(a, b);
}
