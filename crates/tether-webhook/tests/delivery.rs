// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP-level delivery behavior against a local mock endpoint.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tether_core::{DomainEvent, EventCategory, SessionId, TetherError};
use tether_test_utils::{fixtures, MemoryStore};
use tether_webhook::{signature, Deliverer, DeliverySettings};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn deliverer(store: &MemoryStore) -> Deliverer {
    let settings = DeliverySettings {
        user_agent: "tether-test".into(),
        max_delay: Duration::from_millis(50),
        response_excerpt_bytes: 16,
        lane_backlog_warn: 1_000,
    };
    Deliverer::new(Arc::new(store.clone()), settings).unwrap()
}

fn event() -> DomainEvent {
    DomainEvent::new(
        SessionId::from("sess-1"),
        EventCategory::MessageReceived,
        json!({ "from": "15551234567", "body": "hello" }),
    )
}

#[tokio::test]
async fn success_sends_reserved_headers_and_signed_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("content-type", "application/json"))
        .and(header("x-event", "message.received"))
        .and(header("x-session", "sess-1"))
        .and(header("user-agent", "tether-test"))
        .and(header_exists("x-timestamp"))
        .and(header_exists("x-signature"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let mut hook = fixtures::webhook("sess-1", format!("{}/hook", server.uri()));
    hook.secret = Some("shh".into());
    let event = event();

    let report = deliverer(&store)
        .deliver_with_retry(&hook, &event, &CancellationToken::new())
        .await;
    assert!(report.delivered());
    assert_eq!(report.attempts.len(), 1);

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let sig = request.headers.get("x-signature").unwrap().to_str().unwrap();
    assert!(signature::verify("shh", &request.body, sig));

    let ts: i64 = request
        .headers
        .get("x-timestamp")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(ts, event.occurred_at.timestamp());

    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["sessionId"], "sess-1");
    assert_eq!(body["category"], "message.received");
    assert_eq!(body["data"]["body"], "hello");

    let logged = store.deliveries();
    assert_eq!(logged.len(), 1);
    assert!(logged[0].success);
    assert_eq!(logged[0].status_code, Some(200));
    assert_eq!(logged[0].response_excerpt.as_deref(), Some("ok"));
    assert_eq!(logged[0].signature.as_deref(), Some(sig));
    assert_eq!(logged[0].payload.as_bytes(), request.body.as_slice());
}

#[tokio::test]
async fn no_secret_means_no_signature_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let hook = fixtures::webhook("sess-1", server.uri());
    let report = deliverer(&store)
        .deliver_with_retry(&hook, &event(), &CancellationToken::new())
        .await;
    assert!(report.delivered());

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("x-signature").is_none());
    assert!(store.deliveries()[0].signature.is_none());
}

#[tokio::test]
async fn custom_headers_never_override_reserved_ones() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let mut hook = fixtures::webhook("sess-1", server.uri());
    hook.headers.insert("Authorization".into(), "Bearer token".into());
    hook.headers.insert("X-Event".into(), "spoofed".into());
    hook.headers.insert("Content-Type".into(), "text/plain".into());

    deliverer(&store)
        .deliver_with_retry(&hook, &event(), &CancellationToken::new())
        .await;

    let requests = server.received_requests().await.unwrap();
    let headers = &requests[0].headers;
    assert_eq!(headers.get("authorization").unwrap(), "Bearer token");
    let events: Vec<_> = headers.get_all("x-event").iter().collect();
    assert_eq!(events, vec!["message.received"]);
    let types: Vec<_> = headers.get_all("content-type").iter().collect();
    assert_eq!(types, vec!["application/json"]);
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such hook"))
        .expect(1)
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let hook = fixtures::webhook("sess-1", server.uri());
    let report = deliverer(&store)
        .deliver_with_retry(&hook, &event(), &CancellationToken::new())
        .await;

    assert_eq!(report.attempts.len(), 1);
    assert!(matches!(
        report.outcome,
        Err(TetherError::Unreachable { attempts: 1, .. })
    ));
    let logged = store.deliveries();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].status_code, Some(404));
    assert!(!logged[0].success);
}

#[tokio::test]
async fn server_error_retries_until_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let hook = fixtures::webhook("sess-1", server.uri());
    let report = deliverer(&store)
        .deliver_with_retry(&hook, &event(), &CancellationToken::new())
        .await;

    assert!(!report.delivered());
    let numbers: Vec<_> = store
        .deliveries()
        .iter()
        .map(|a| a.attempt_number)
        .collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(store.deliveries().iter().all(|a| !a.success));
}

#[tokio::test]
async fn recovers_after_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let hook = fixtures::webhook("sess-1", server.uri());
    let report = deliverer(&store)
        .deliver_with_retry(&hook, &event(), &CancellationToken::new())
        .await;

    assert!(report.delivered());
    let logged = store.deliveries();
    assert_eq!(logged.len(), 2);
    assert!(!logged[0].success);
    assert!(logged[1].success);
    assert_eq!(logged[0].event_id, logged[1].event_id);
}

#[tokio::test]
async fn timeouts_count_as_failed_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let mut hook = fixtures::webhook("sess-1", server.uri());
    hook.timeout_ms = 50;
    hook.retry = fixtures::fast_retry(2);

    let report = deliverer(&store)
        .deliver_with_retry(&hook, &event(), &CancellationToken::new())
        .await;

    assert!(!report.delivered());
    let logged = store.deliveries();
    assert_eq!(logged.len(), 2);
    for attempt in &logged {
        assert_eq!(attempt.status_code, None);
        assert!(attempt.error.as_deref().unwrap().contains("timed out"));
    }
}

#[tokio::test]
async fn unreachable_host_is_a_failed_attempt() {
    let store = MemoryStore::new();
    // Port 9 on localhost is reserved for discard and normally closed.
    let mut hook = fixtures::webhook("sess-1", "http://127.0.0.1:9/hook");
    hook.retry = fixtures::fast_retry(1);

    let report = deliverer(&store)
        .deliver_with_retry(&hook, &event(), &CancellationToken::new())
        .await;

    assert!(matches!(
        report.outcome,
        Err(TetherError::Unreachable { attempts: 1, .. })
    ));
    assert!(store.deliveries()[0].error.is_some());
}

#[tokio::test]
async fn response_excerpt_is_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(100)))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let hook = fixtures::webhook("sess-1", server.uri());
    deliverer(&store)
        .deliver_with_retry(&hook, &event(), &CancellationToken::new())
        .await;

    assert_eq!(
        store.deliveries()[0].response_excerpt.as_deref(),
        Some("x".repeat(16).as_str())
    );
}

#[tokio::test]
async fn cancellation_interrupts_retry_wait() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let mut hook = fixtures::webhook("sess-1", server.uri());
    hook.retry.base_delay_ms = 60_000;
    hook.retry.max_attempts = 5;

    let settings = DeliverySettings {
        user_agent: "tether-test".into(),
        max_delay: Duration::from_secs(600),
        response_excerpt_bytes: 16,
        lane_backlog_warn: 1_000,
    };
    let deliverer = Deliverer::new(Arc::new(store.clone()), settings).unwrap();
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        deliverer.deliver_with_retry(&hook, &event(), &cancel),
    )
    .await
    .expect("retry wait should be interrupted");
    assert_eq!(report.attempts.len(), 1);
    assert!(!report.delivered());
}
