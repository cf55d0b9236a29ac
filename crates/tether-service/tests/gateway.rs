// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Caller-facing operations over in-memory storage and mock connections.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tether_bus::EventBus;
use tether_core::webhook::{NewWebhook, WebhookPatch};
use tether_core::{
    CategorySet, ConnectionEvent, EventCategory, Identity, PairingMethod, SessionId,
    SessionStatus, TetherError, WebhookId,
};
use tether_service::{Gateway, NewSession, QrFormat, WebhookDefaults};
use tether_session::{RegistryConfig, SessionRegistry};
use tether_test_utils::{fixtures, MemoryStore, MockAction, MockConnectionFactory};
use tether_webhook::{DeliverySettings, WebhookEngine};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    store: MemoryStore,
    factory: MockConnectionFactory,
    bus: EventBus,
    engine: WebhookEngine,
    gateway: Gateway,
    _auth_dir: TempDir,
}

fn harness() -> Harness {
    let auth_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let factory = MockConnectionFactory::new();
    let bus = EventBus::new(64);
    let registry = SessionRegistry::new(
        Arc::new(store.clone()),
        bus.clone(),
        Arc::new(factory.clone()),
        RegistryConfig {
            auth_dir: auth_dir.path().to_path_buf(),
            auth_timeout: Duration::from_secs(60),
            qr_max_retries: 3,
            teardown_timeout: Duration::from_secs(1),
            event_buffer: 16,
        },
    );
    let settings = DeliverySettings {
        max_delay: Duration::from_millis(50),
        ..DeliverySettings::default()
    };
    let engine =
        WebhookEngine::new(Arc::new(store.clone()), Arc::new(store.clone()), settings).unwrap();
    let defaults = WebhookDefaults {
        retry: fixtures::fast_retry(2),
        timeout_ms: 2_000,
    };
    let gateway = Gateway::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        registry,
        engine.clone(),
        defaults,
    );
    Harness {
        store,
        factory,
        bus,
        engine,
        gateway,
        _auth_dir: auth_dir,
    }
}

fn new_session(name: &str) -> NewSession {
    NewSession {
        owner_id: "owner-1".into(),
        name: name.into(),
        ..NewSession::default()
    }
}

fn new_webhook(url: impl Into<String>, events: &[&str]) -> NewWebhook {
    NewWebhook {
        url: url.into(),
        events: events.iter().map(|e| e.to_string()).collect(),
        ..NewWebhook::default()
    }
}

impl Harness {
    async fn emit(&self, id: &SessionId, event: ConnectionEvent) {
        let connection = self.factory.latest(id).expect("connection built");
        assert!(connection.emit(event).await, "supervisor is gone");
    }

    async fn wait_for(&self, id: &SessionId, status: SessionStatus) {
        for _ in 0..400 {
            if self.store.session(id).is_some_and(|r| r.status == status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session {id} never reached {status}");
    }

    async fn connect(&self, id: &SessionId) {
        self.emit(id, ConnectionEvent::Authenticated).await;
        self.emit(
            id,
            ConnectionEvent::Ready {
                identity: Identity {
                    network_address: "15550100000@c.us".into(),
                    display_name: Some("Front desk".into()),
                    avatar_url: None,
                },
            },
        )
        .await;
        self.wait_for(id, SessionStatus::Connected).await;
    }
}

#[tokio::test]
async fn create_session_records_and_starts_it() {
    let h = harness();
    let view = h.gateway.create_session(new_session("support")).await.unwrap();

    assert_eq!(view.status, SessionStatus::Initializing);
    assert_eq!(view.owner_id, "owner-1");
    assert!(!view.qr_available);
    assert!(h.gateway.registry().get(&view.id).is_some());
    assert!(h.store.session(&view.id).is_some());
}

#[tokio::test]
async fn duplicate_name_for_the_same_owner_conflicts() {
    let h = harness();
    h.gateway.create_session(new_session("support")).await.unwrap();

    let err = h
        .gateway
        .create_session(new_session("support"))
        .await
        .unwrap_err();
    assert!(matches!(err, TetherError::Conflict(_)), "{err:?}");

    let other_owner = NewSession {
        owner_id: "owner-2".into(),
        ..new_session("support")
    };
    assert!(h.gateway.create_session(other_owner).await.is_ok());
}

#[tokio::test]
async fn invalid_session_input_is_rejected() {
    let h = harness();
    for input in [
        new_session("   "),
        NewSession {
            owner_id: String::new(),
            ..new_session("support")
        },
        NewSession {
            id: Some(SessionId::from("../escape")),
            ..new_session("support")
        },
    ] {
        let err = h.gateway.create_session(input).await.unwrap_err();
        assert!(matches!(err, TetherError::InvalidArgument(_)), "{err:?}");
    }
    assert_eq!(h.gateway.registry().live_count(), 0);
}

#[tokio::test]
async fn get_qr_waits_for_the_first_code() {
    let h = harness();
    let view = h.gateway.create_session(new_session("support")).await.unwrap();
    let id = view.id.clone();

    let gateway = h.gateway.clone();
    let wait_id = id.clone();
    let waiter = tokio::spawn(async move {
        gateway
            .get_qr(&wait_id, QrFormat::Raw, true, Some(Duration::from_secs(5)))
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.emit(&id, ConnectionEvent::QrReady { payload: "2@abc,def".into() })
        .await;

    let image = waiter.await.unwrap().unwrap();
    assert_eq!(image.content, "2@abc,def");
    assert_eq!(image.status, SessionStatus::QrReady);

    let svg = h
        .gateway
        .get_qr(&id, QrFormat::Svg, false, None)
        .await
        .unwrap();
    assert!(svg.content.contains("<svg"));
}

#[tokio::test]
async fn get_qr_without_wait_reports_the_status() {
    let h = harness();
    let view = h.gateway.create_session(new_session("support")).await.unwrap();

    let err = h
        .gateway
        .get_qr(&view.id, QrFormat::Raw, false, None)
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            TetherError::InvalidState {
                status: SessionStatus::Initializing,
                ..
            }
        ),
        "{err:?}"
    );
}

#[tokio::test]
async fn get_qr_wait_gives_up_at_the_timeout() {
    let h = harness();
    let view = h.gateway.create_session(new_session("support")).await.unwrap();

    let started = tokio::time::Instant::now();
    let err = h
        .gateway
        .get_qr(&view.id, QrFormat::Raw, true, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, TetherError::InvalidState { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn get_qr_after_connect_is_invalid_state() {
    let h = harness();
    let view = h.gateway.create_session(new_session("support")).await.unwrap();
    h.emit(&view.id, ConnectionEvent::QrReady { payload: "qr-1".into() })
        .await;
    h.connect(&view.id).await;

    let err = h
        .gateway
        .get_qr(&view.id, QrFormat::Raw, true, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TetherError::InvalidState {
            status: SessionStatus::Connected,
            ..
        }
    ));
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let h = harness();
    let ghost = SessionId::from("ghost");

    assert!(h.gateway.get_status(&ghost).await.unwrap_err().is_not_found());
    assert!(h.gateway.destroy_session(&ghost).await.unwrap_err().is_not_found());
    assert!(h.gateway.logout(&ghost).await.unwrap_err().is_not_found());
    assert!(
        h.gateway
            .get_qr(&ghost, QrFormat::Raw, true, None)
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn pairing_code_is_normalized_and_formatted() {
    let h = harness();
    let view = h.gateway.create_session(new_session("support")).await.unwrap();

    let code = h
        .gateway
        .request_pairing_code(&view.id, "+1 (555) 123-4567", PairingMethod::Notification)
        .await
        .unwrap();
    assert_eq!(code, "ABCD-1234");

    let connection = h.factory.latest(&view.id).unwrap();
    assert!(connection.actions().contains(&MockAction::PairingCode {
        phone: "15551234567".into(),
        method: PairingMethod::Notification,
    }));
}

#[tokio::test]
async fn logout_keeps_a_logged_out_record() {
    let h = harness();
    let view = h.gateway.create_session(new_session("support")).await.unwrap();
    h.connect(&view.id).await;

    let after = h.gateway.logout(&view.id).await.unwrap();
    assert_eq!(after.status, SessionStatus::LoggedOut);
    assert!(after.identity.is_none());
    assert!(h.gateway.registry().get(&view.id).is_none());

    let connection = h.factory.latest(&view.id).unwrap();
    assert!(connection.actions().contains(&MockAction::Logout));
    assert!(connection.was_destroyed());
}

#[tokio::test]
async fn destroy_session_removes_record_and_webhooks() {
    let h = harness();
    let view = h.gateway.create_session(new_session("support")).await.unwrap();
    let hook = h
        .gateway
        .create_webhook(&view.id, new_webhook("https://hooks.example.com/in", &["*"]))
        .await
        .unwrap();

    h.gateway.destroy_session(&view.id).await.unwrap();

    assert!(h.store.session(&view.id).is_none());
    assert!(h.gateway.registry().get(&view.id).is_none());
    assert!(h.gateway.get_webhook(&hook.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn restart_builds_a_fresh_connection() {
    let h = harness();
    let view = h.gateway.create_session(new_session("support")).await.unwrap();
    let first = h.factory.latest(&view.id).unwrap();

    let after = h.gateway.restart_session(&view.id).await.unwrap();
    assert_eq!(after.status, SessionStatus::Initializing);
    assert!(first.was_destroyed());
    assert_eq!(h.factory.built().len(), 2);
    assert_eq!(h.factory.undestroyed(&view.id), 1);
}

#[tokio::test]
async fn list_sessions_filters_by_owner() {
    let h = harness();
    h.gateway.create_session(new_session("a")).await.unwrap();
    h.gateway.create_session(new_session("b")).await.unwrap();
    h.gateway
        .create_session(NewSession {
            owner_id: "owner-2".into(),
            ..new_session("c")
        })
        .await
        .unwrap();

    assert_eq!(h.gateway.list_sessions(None).await.unwrap().len(), 3);
    let mine = h.gateway.list_sessions(Some("owner-1")).await.unwrap();
    assert_eq!(mine.len(), 2);
    assert!(mine.iter().all(|v| v.owner_id == "owner-1"));
}

#[tokio::test]
async fn webhook_registration_validates_input() {
    let h = harness();
    let view = h.gateway.create_session(new_session("support")).await.unwrap();

    let bad = [
        new_webhook("ftp://hooks.example.com", &["*"]),
        new_webhook("https://hooks.example.com", &[]),
        new_webhook("https://hooks.example.com", &["message.deleted"]),
        NewWebhook {
            headers: BTreeMap::from([("X-Signature".into(), "forged".into())]),
            ..new_webhook("https://hooks.example.com", &["*"])
        },
        NewWebhook {
            timeout_ms: Some(0),
            ..new_webhook("https://hooks.example.com", &["*"])
        },
    ];
    for input in bad {
        let err = h.gateway.create_webhook(&view.id, input).await.unwrap_err();
        assert!(matches!(err, TetherError::InvalidArgument(_)), "{err:?}");
    }

    let err = h
        .gateway
        .create_webhook(
            &SessionId::from("ghost"),
            new_webhook("https://hooks.example.com", &["*"]),
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn webhook_crud_round() {
    let h = harness();
    let view = h.gateway.create_session(new_session("support")).await.unwrap();

    let hook = h
        .gateway
        .create_webhook(
            &view.id,
            NewWebhook {
                secret: Some(String::new()),
                ..new_webhook("https://hooks.example.com/in", &["message.received", "session.qr"])
            },
        )
        .await
        .unwrap();
    assert!(hook.is_active);
    assert!(hook.secret.is_none());
    assert_eq!(hook.retry, fixtures::fast_retry(2));
    assert!(hook.events.contains(EventCategory::SessionQr));
    assert!(!hook.events.contains(EventCategory::MessageAck));

    let updated = h
        .gateway
        .update_webhook(
            &hook.id,
            WebhookPatch {
                events: Some(vec!["all".into()]),
                secret: Some(Some("s3cret".into())),
                is_active: Some(false),
                ..WebhookPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.events, CategorySet::All);
    assert_eq!(updated.secret.as_deref(), Some("s3cret"));
    assert!(!updated.is_active);
    assert_eq!(updated.url, hook.url);

    assert_eq!(h.gateway.list_webhooks(&view.id).await.unwrap().len(), 1);
    h.gateway.delete_webhook(&hook.id).await.unwrap();
    assert!(h.gateway.delete_webhook(&hook.id).await.unwrap_err().is_not_found());
    assert!(h.gateway.list_webhooks(&view.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_webhook_records_a_single_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/in"))
        .and(header("x-event", "webhook.test"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness();
    let view = h.gateway.create_session(new_session("support")).await.unwrap();
    let hook = h
        .gateway
        .create_webhook(
            &view.id,
            new_webhook(format!("{}/in", server.uri()), &["message.received"]),
        )
        .await
        .unwrap();

    let attempt = h.gateway.test_webhook(&hook.id).await.unwrap();
    assert!(attempt.success);
    assert_eq!(attempt.status_code, Some(204));

    let history = h.gateway.list_deliveries(&hook.id, 0).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].category, EventCategory::WebhookTest);

    let missing = WebhookId::from("nope");
    assert!(h.gateway.test_webhook(&missing).await.unwrap_err().is_not_found());
    assert!(
        h.gateway
            .list_deliveries(&missing, 10)
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn session_events_reach_subscribed_webhooks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/qr"))
        .and(header("x-event", "session.qr"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = harness();
    let cancel = CancellationToken::new();
    let engine = h.engine.clone();
    let subscriber = h.bus.subscribe_lossless();
    let run_cancel = cancel.clone();
    let runner = tokio::spawn(async move { engine.run(subscriber, run_cancel).await });

    let view = h.gateway.create_session(new_session("support")).await.unwrap();
    let hook = h
        .gateway
        .create_webhook(
            &view.id,
            new_webhook(format!("{}/qr", server.uri()), &["session.qr"]),
        )
        .await
        .unwrap();

    h.emit(&view.id, ConnectionEvent::QrReady { payload: "qr-1".into() })
        .await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.store.deliveries().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("QR event was never delivered");

    let attempts = h.gateway.list_deliveries(&hook.id, 10).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].success);
    assert_eq!(attempts[0].category, EventCategory::SessionQr);
    let body: serde_json::Value = serde_json::from_str(&attempts[0].payload).unwrap();
    assert_eq!(body["sessionId"], view.id.as_str());
    assert_eq!(body["category"], "session.qr");

    cancel.cancel();
    runner.await.unwrap();
}
