// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subscriber resolution, fan-out, and ordering through the engine.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tether_bus::EventBus;
use tether_core::{CategorySet, DomainEvent, EventCategory, SessionId, WebhookId};
use tether_test_utils::{fixtures, MemoryStore};
use tether_webhook::{DeliverySettings, WebhookEngine};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn engine(store: &MemoryStore) -> WebhookEngine {
    let settings = DeliverySettings {
        max_delay: Duration::from_millis(50),
        ..DeliverySettings::default()
    };
    WebhookEngine::new(Arc::new(store.clone()), Arc::new(store.clone()), settings).unwrap()
}

fn message(session: &str, seq: u32) -> Arc<DomainEvent> {
    Arc::new(DomainEvent::new(
        SessionId::from(session),
        EventCategory::MessageReceived,
        json!({ "seq": seq }),
    ))
}

/// Polls the delivery log until `count` attempts are recorded.
async fn wait_for_deliveries(store: &MemoryStore, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.deliveries().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {count} deliveries, saw {}",
            store.deliveries().len()
        )
    });
}

#[tokio::test]
async fn no_subscribers_means_no_attempts() {
    let store = MemoryStore::new();
    let engine = engine(&store);

    assert_eq!(engine.dispatch(message("sess-1", 1)).await, 0);
    assert_eq!(engine.active_lanes(), 0);
    assert!(store.deliveries().is_empty());
}

#[tokio::test]
async fn only_active_matching_webhooks_of_the_session_receive() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let all = fixtures::webhook("sess-1", format!("{}/all", server.uri()));
    let mut qr_only = fixtures::webhook("sess-1", format!("{}/qr", server.uri()));
    qr_only.events = CategorySet::parse(["session.qr"]).unwrap();
    let mut inactive = fixtures::webhook("sess-1", format!("{}/off", server.uri()));
    inactive.is_active = false;
    let other_session = fixtures::webhook("sess-2", format!("{}/other", server.uri()));
    for hook in [&all, &qr_only, &inactive, &other_session] {
        store.insert_webhook(hook.clone());
    }

    let engine = engine(&store);
    assert_eq!(engine.dispatch(message("sess-1", 1)).await, 1);
    wait_for_deliveries(&store, 1).await;

    let logged = store.deliveries();
    assert_eq!(logged[0].webhook_id, all.id);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), "/all");
}

#[tokio::test]
async fn deliveries_to_one_subscriber_keep_event_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(20)))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    store.insert_webhook(fixtures::webhook("sess-1", server.uri()));
    let engine = engine(&store);

    for seq in 0..5 {
        engine.dispatch(message("sess-1", seq)).await;
    }
    wait_for_deliveries(&store, 5).await;

    let requests = server.received_requests().await.unwrap();
    let seqs: Vec<u64> = requests
        .iter()
        .map(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            body["data"]["seq"].as_u64().unwrap()
        })
        .collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn failing_subscriber_does_not_block_others() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/fast"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let slow = fixtures::webhook("sess-1", format!("{}/slow", server.uri()));
    let fast = fixtures::webhook("sess-1", format!("{}/fast", server.uri()));
    store.insert_webhook(slow.clone());
    store.insert_webhook(fast.clone());
    let engine = engine(&store);

    engine.dispatch(message("sess-1", 1)).await;
    engine.dispatch(message("sess-1", 2)).await;

    // Both fast deliveries land while the slow subscriber is still on its
    // first attempt.
    tokio::time::timeout(Duration::from_millis(250), async {
        loop {
            let fast_done = store
                .deliveries()
                .iter()
                .filter(|a| a.webhook_id == fast.id && a.success)
                .count();
            if fast_done == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("fast subscriber should not wait for the slow one");

    assert!(
        store
            .deliveries()
            .iter()
            .all(|a| a.webhook_id != slow.id)
    );
}

#[tokio::test]
async fn test_delivery_bypasses_category_filter_and_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let mut hook = fixtures::webhook("sess-1", server.uri());
    hook.events = CategorySet::parse(["message.sent"]).unwrap();
    store.insert_webhook(hook.clone());
    let engine = engine(&store);

    let attempt = engine.test(&hook.id).await.unwrap();
    assert!(!attempt.success);
    assert_eq!(attempt.status_code, Some(500));
    assert_eq!(attempt.category, EventCategory::WebhookTest);
    assert_eq!(store.deliveries().len(), 1);

    let body: Value = serde_json::from_str(&attempt.payload).unwrap();
    assert_eq!(body["category"], "webhook.test");
    assert_eq!(body["data"]["webhookId"], hook.id.as_str());
}

#[tokio::test]
async fn test_delivery_of_unknown_webhook_is_not_found() {
    let store = MemoryStore::new();
    let err = engine(&store)
        .test(&WebhookId::from("missing"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn run_consumes_bus_until_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    store.insert_webhook(fixtures::webhook("sess-1", server.uri()));
    let engine = engine(&store);
    let bus = EventBus::new(16);
    let cancel = CancellationToken::new();

    let runner = {
        let engine = engine.clone();
        let subscriber = bus.subscribe_lossless();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(subscriber, cancel).await })
    };

    bus.publish(DomainEvent::new(
        SessionId::from("sess-1"),
        EventCategory::SessionConnected,
        json!({ "status": "connected" }),
    ));
    wait_for_deliveries(&store, 1).await;
    assert_eq!(
        store.deliveries()[0].category,
        EventCategory::SessionConnected
    );

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .unwrap()
        .unwrap();
    assert!(engine.shutdown(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn run_delivers_every_event_when_publishers_outpace_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    store.insert_webhook(fixtures::webhook("sess-1", server.uri()));
    let engine = engine(&store);
    let bus = EventBus::new(8);
    let cancel = CancellationToken::new();
    let subscriber = bus.subscribe_lossless();

    // published in one burst before the engine reads anything
    for seq in 0..120u32 {
        bus.publish(DomainEvent::new(
            SessionId::from("sess-1"),
            EventCategory::MessageReceived,
            json!({ "seq": seq }),
        ));
    }
    let runner = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(subscriber, cancel).await })
    };
    wait_for_deliveries(&store, 120).await;

    let requests = server.received_requests().await.unwrap();
    let seqs: Vec<u64> = requests
        .iter()
        .map(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            body["data"]["seq"].as_u64().unwrap()
        })
        .collect();
    assert_eq!(seqs, (0..120).collect::<Vec<u64>>());

    cancel.cancel();
    runner.await.unwrap();
    assert!(engine.shutdown(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn slow_subscriber_backlog_is_tracked_and_drained() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(100)))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let hook = fixtures::webhook("sess-1", server.uri());
    store.insert_webhook(hook.clone());
    let settings = DeliverySettings {
        max_delay: Duration::from_millis(50),
        lane_backlog_warn: 2,
        ..DeliverySettings::default()
    };
    let engine =
        WebhookEngine::new(Arc::new(store.clone()), Arc::new(store.clone()), settings).unwrap();

    for seq in 0..5 {
        engine.dispatch(message("sess-1", seq)).await;
    }
    // at most one job has left the queue for the slow endpoint
    assert!(engine.queued(&hook.id) >= 4);

    wait_for_deliveries(&store, 5).await;
    assert_eq!(engine.queued(&hook.id), 0);
    assert!(store.deliveries().iter().all(|d| d.success));
    assert_eq!(engine.queued(&WebhookId::generate()), 0);
}

#[tokio::test]
async fn shutdown_stops_new_dispatches() {
    let store = MemoryStore::new();
    store.insert_webhook(fixtures::webhook("sess-1", "http://127.0.0.1:9"));
    let engine = engine(&store);

    assert!(engine.shutdown(Duration::from_secs(1)).await);
    assert_eq!(engine.dispatch(message("sess-1", 1)).await, 0);
    assert!(store.deliveries().is_empty());
}
