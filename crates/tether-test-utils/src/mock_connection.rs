// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scriptable Connection Objects.
//!
//! `MockConnectionFactory` hands out [`MockConnection`]s that record every
//! imperative call and let the test push connection events into the session
//! supervisor exactly as a real automation layer would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tether_core::{
    Connection, ConnectionEvent, ConnectionFactory, ConnectionSpec, EventSink, PairingMethod,
    SessionId, TetherError,
};

/// How a mock connection misbehaves.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    pub fail_connect: bool,
    pub fail_initialize: bool,
    pub fail_logout: bool,
    pub fail_destroy: bool,
    /// `destroy` never returns.
    pub hang_on_destroy: bool,
    /// Delay inside `connect`, before the object exists.
    pub connect_delay: Option<Duration>,
    /// Raw code returned by `request_pairing_code`.
    pub pairing_code: String,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            fail_connect: false,
            fail_initialize: false,
            fail_logout: false,
            fail_destroy: false,
            hang_on_destroy: false,
            connect_delay: None,
            pairing_code: "abcd1234".to_string(),
        }
    }
}

/// One imperative call made on a mock connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockAction {
    Initialize,
    PairingCode { phone: String, method: PairingMethod },
    Logout,
    Destroy,
}

/// A recorded, scriptable Connection Object.
pub struct MockConnection {
    spec: ConnectionSpec,
    sink: EventSink,
    behavior: MockBehavior,
    actions: Mutex<Vec<MockAction>>,
    destroyed: AtomicBool,
}

impl MockConnection {
    pub fn session_id(&self) -> &SessionId {
        &self.spec.session_id
    }

    pub fn spec(&self) -> &ConnectionSpec {
        &self.spec
    }

    /// Pushes an event to the session supervisor. False once it has stopped listening.
    pub async fn emit(&self, event: ConnectionEvent) -> bool {
        self.sink.emit(event).await
    }

    pub fn actions(&self) -> Vec<MockAction> {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn was_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn record(&self, action: MockAction) {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn initialize(&self) -> Result<(), TetherError> {
        self.record(MockAction::Initialize);
        if self.behavior.fail_initialize {
            return Err(TetherError::connection("mock initialize failure"));
        }
        Ok(())
    }

    async fn request_pairing_code(
        &self,
        phone: &str,
        method: PairingMethod,
    ) -> Result<String, TetherError> {
        self.record(MockAction::PairingCode {
            phone: phone.to_string(),
            method,
        });
        Ok(self.behavior.pairing_code.clone())
    }

    async fn logout(&self) -> Result<(), TetherError> {
        self.record(MockAction::Logout);
        if self.behavior.fail_logout {
            return Err(TetherError::connection("mock logout failure"));
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TetherError> {
        self.record(MockAction::Destroy);
        if self.behavior.hang_on_destroy {
            std::future::pending::<()>().await;
        }
        self.destroyed.store(true, Ordering::SeqCst);
        if self.behavior.fail_destroy {
            return Err(TetherError::connection("mock destroy failure"));
        }
        Ok(())
    }
}

#[derive(Default)]
struct FactoryState {
    default_behavior: MockBehavior,
    per_session: HashMap<SessionId, MockBehavior>,
    built: Vec<Arc<MockConnection>>,
}

/// Builds [`MockConnection`]s and keeps every one it built.
#[derive(Clone, Default)]
pub struct MockConnectionFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MockConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behavior for sessions without an override.
    pub fn set_behavior(&self, behavior: MockBehavior) {
        self.lock().default_behavior = behavior;
    }

    pub fn set_session_behavior(&self, session_id: &SessionId, behavior: MockBehavior) {
        self.lock().per_session.insert(session_id.clone(), behavior);
    }

    /// The most recent connection built for `session_id`.
    pub fn latest(&self, session_id: &SessionId) -> Option<Arc<MockConnection>> {
        self.lock()
            .built
            .iter()
            .rev()
            .find(|c| c.session_id() == session_id)
            .cloned()
    }

    pub fn built(&self) -> Vec<Arc<MockConnection>> {
        self.lock().built.clone()
    }

    /// Connections for `session_id` that have not been destroyed.
    pub fn undestroyed(&self, session_id: &SessionId) -> usize {
        self.lock()
            .built
            .iter()
            .filter(|c| c.session_id() == session_id && !c.was_destroyed())
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FactoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(
        &self,
        spec: ConnectionSpec,
        events: EventSink,
    ) -> Result<Arc<dyn Connection>, TetherError> {
        let behavior = {
            let state = self.lock();
            state
                .per_session
                .get(&spec.session_id)
                .unwrap_or(&state.default_behavior)
                .clone()
        };
        if let Some(delay) = behavior.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if behavior.fail_connect {
            return Err(TetherError::connection("mock connect failure"));
        }

        let connection = Arc::new(MockConnection {
            spec,
            sink: events,
            behavior,
            actions: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        });
        self.lock().built.push(Arc::clone(&connection));
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::SessionPolicy;
    use tokio::sync::mpsc;

    fn spec(id: &str) -> ConnectionSpec {
        ConnectionSpec {
            session_id: SessionId::from(id),
            auth_dir: std::env::temp_dir().join(id),
            policy: SessionPolicy::default(),
        }
    }

    #[tokio::test]
    async fn records_actions_and_forwards_events() {
        let factory = MockConnectionFactory::new();
        let (tx, mut rx) = mpsc::channel(4);
        let conn = factory.connect(spec("s1"), EventSink::new(tx)).await.unwrap();
        conn.initialize().await.unwrap();
        conn.destroy().await.unwrap();

        let mock = factory.latest(&SessionId::from("s1")).unwrap();
        assert_eq!(mock.actions(), vec![MockAction::Initialize, MockAction::Destroy]);
        assert!(mock.was_destroyed());
        assert_eq!(factory.undestroyed(&SessionId::from("s1")), 0);

        assert!(mock.emit(ConnectionEvent::Authenticated).await);
        assert_eq!(rx.recv().await, Some(ConnectionEvent::Authenticated));
    }

    #[tokio::test]
    async fn per_session_behavior_overrides_default() {
        let factory = MockConnectionFactory::new();
        factory.set_session_behavior(
            &SessionId::from("bad"),
            MockBehavior {
                fail_connect: true,
                ..MockBehavior::default()
            },
        );
        let (tx, _rx) = mpsc::channel(1);
        assert!(factory.connect(spec("bad"), EventSink::new(tx.clone())).await.is_err());
        assert!(factory.connect(spec("good"), EventSink::new(tx)).await.is_ok());
        assert_eq!(factory.built().len(), 1);
    }
}
