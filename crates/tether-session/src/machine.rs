// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection state machine.
//!
//! A pure reducer: [`SessionMachine::apply`] consumes one [`Input`] and returns
//! the [`Effect`]s the supervisor must perform, in order. No I/O happens here.
//!
//! ```text
//! INITIALIZING -> { QR_READY <-> AUTHENTICATING } -> CONNECTED
//!        any non-terminal -> DISCONNECTED | FAILED | LOGGED_OUT
//! ```
//!
//! `FAILED` and `LOGGED_OUT` absorb every further connection input. The only
//! move out of `FAILED` is an explicit logout, which lands in `LOGGED_OUT`.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tether_core::{
    ConnectionEvent, DisconnectReason, DomainEvent, EventCategory, FailureReason, Identity,
    SessionId, SessionPolicy, SessionRecord, SessionStatus, StatusUpdate,
};

/// In-memory state of one session, mirrored into the durable record on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub status: SessionStatus,
    pub qr_payload: Option<String>,
    pub pairing_code: Option<String>,
    pub identity: Option<Identity>,
    pub failure_reason: Option<FailureReason>,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    /// QR codes issued to this Connection Object instance.
    pub qr_attempts: u32,
}

impl SessionState {
    pub fn initializing() -> Self {
        Self {
            status: SessionStatus::Initializing,
            qr_payload: None,
            pairing_code: None,
            identity: None,
            failure_reason: None,
            connected_at: None,
            disconnected_at: None,
            qr_attempts: 0,
        }
    }

    /// Rebuilds state from a durable record (no live instance, so no QR count).
    pub fn from_record(record: &SessionRecord) -> Self {
        Self {
            status: record.status,
            qr_payload: record.qr_payload.clone(),
            pairing_code: record.pairing_code.clone(),
            identity: record.identity.clone(),
            failure_reason: record.failure_reason,
            connected_at: record.connected_at,
            disconnected_at: record.disconnected_at,
            qr_attempts: 0,
        }
    }

    pub fn to_update(&self) -> StatusUpdate {
        StatusUpdate {
            status: self.status,
            qr_payload: self.qr_payload.clone(),
            pairing_code: self.pairing_code.clone(),
            identity: self.identity.clone(),
            failure_reason: self.failure_reason,
            connected_at: self.connected_at,
            disconnected_at: self.disconnected_at,
        }
    }
}

/// Everything the reducer reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Connection(ConnectionEvent),
    /// The authentication timer armed on `AUTHENTICATING` fired.
    AuthTimeoutElapsed,
    LogoutRequested,
    /// A pairing code (already formatted) was obtained from the connection.
    PairingCodeIssued(String),
    InitializeFailed(String),
}

/// Side effects requested by the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Persist(StatusUpdate),
    Publish(DomainEvent),
    ArmAuthTimer,
    DisarmAuthTimer,
    /// Destroy the Connection Object and drop it from the live map.
    Teardown(FailureReason),
}

/// Per-session reducer.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    session_id: SessionId,
    policy: SessionPolicy,
    qr_max_retries: u32,
    state: SessionState,
}

impl SessionMachine {
    pub fn new(session_id: SessionId, policy: SessionPolicy, qr_max_retries: u32) -> Self {
        Self::resume(session_id, policy, qr_max_retries, SessionState::initializing())
    }

    /// Continues from a known state.
    pub fn resume(
        session_id: SessionId,
        policy: SessionPolicy,
        qr_max_retries: u32,
        state: SessionState,
    ) -> Self {
        Self {
            session_id,
            policy,
            qr_max_retries: qr_max_retries.max(1),
            state,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status
    }

    /// Effects announcing a fresh instance in `INITIALIZING`.
    pub fn start(&mut self) -> Vec<Effect> {
        self.state = SessionState::initializing();
        self.transition_effects(json!({}))
    }

    pub fn apply(&mut self, input: Input) -> Vec<Effect> {
        let status = self.state.status;

        if input == Input::LogoutRequested {
            if status == SessionStatus::LoggedOut {
                return Vec::new();
            }
            return self.logout();
        }
        if status.is_terminal() {
            return Vec::new();
        }

        match input {
            Input::Connection(event) => self.on_connection_event(event),
            Input::AuthTimeoutElapsed => {
                if status == SessionStatus::Authenticating {
                    self.fail(FailureReason::AuthTimeout, true)
                } else {
                    Vec::new()
                }
            }
            Input::PairingCodeIssued(code) => {
                if !status.accepts_pairing_code() {
                    return Vec::new();
                }
                self.state.pairing_code = Some(code);
                vec![Effect::Persist(self.state.to_update())]
            }
            Input::InitializeFailed(_) => self.fail(FailureReason::InitializationFailed, true),
            Input::LogoutRequested => Vec::new(),
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) -> Vec<Effect> {
        match event {
            ConnectionEvent::QrReady { payload } => {
                self.state.qr_attempts += 1;
                if self.state.qr_attempts > self.qr_max_retries {
                    return self.fail(FailureReason::QrExhausted, true);
                }
                self.state.status = SessionStatus::QrReady;
                self.state.qr_payload = Some(payload.clone());
                let mut effects = vec![Effect::DisarmAuthTimer];
                effects.extend(self.transition_effects(json!({
                    "qr": payload,
                    "attempt": self.state.qr_attempts,
                    "maxAttempts": self.qr_max_retries,
                })));
                effects
            }
            ConnectionEvent::QrExhausted
            | ConnectionEvent::Disconnected {
                reason: DisconnectReason::QrTimeout,
            } => self.fail(FailureReason::QrExhausted, true),
            ConnectionEvent::Disconnected {
                reason: DisconnectReason::AuthTimeout,
            } => self.fail(FailureReason::AuthTimeout, true),
            ConnectionEvent::Authenticated => {
                if self.state.status == SessionStatus::Authenticating {
                    return Vec::new();
                }
                self.state.status = SessionStatus::Authenticating;
                self.state.qr_payload = None;
                let mut effects = vec![Effect::ArmAuthTimer];
                effects.extend(self.transition_effects(json!({})));
                effects
            }
            ConnectionEvent::Ready { identity } => {
                self.state.status = SessionStatus::Connected;
                self.state.qr_payload = None;
                self.state.pairing_code = None;
                self.state.failure_reason = None;
                self.state.connected_at = Some(Utc::now());
                self.state.identity = Some(identity.clone());
                let mut effects = vec![Effect::DisarmAuthTimer];
                effects.extend(self.transition_effects(json!({ "identity": identity })));
                effects
            }
            ConnectionEvent::Disconnected {
                reason: DisconnectReason::Remote(reason),
            } => {
                if self.state.status == SessionStatus::Disconnected {
                    return Vec::new();
                }
                self.state.status = SessionStatus::Disconnected;
                self.state.qr_payload = None;
                self.state.pairing_code = None;
                self.state.disconnected_at = Some(Utc::now());
                let mut effects = vec![Effect::DisarmAuthTimer];
                effects.extend(self.transition_effects(json!({ "reason": reason })));
                effects
            }
            ConnectionEvent::AuthFailed { message } => {
                let mut effects = self.fail(FailureReason::CredentialsRejected, false);
                if let Some(Effect::Publish(event)) = effects
                    .iter_mut()
                    .find(|e| matches!(e, Effect::Publish(_)))
                {
                    event.payload["detail"] = Value::String(message);
                }
                effects
            }
            ConnectionEvent::MessageIn { payload } => {
                self.publish_only(EventCategory::MessageReceived, payload)
            }
            ConnectionEvent::MessageOut { payload } => {
                self.publish_only(EventCategory::MessageSent, payload)
            }
            ConnectionEvent::Ack { payload } => self.publish_only(EventCategory::MessageAck, payload),
        }
    }

    fn fail(&mut self, reason: FailureReason, teardown: bool) -> Vec<Effect> {
        self.state.status = SessionStatus::Failed;
        self.state.failure_reason = Some(reason);
        self.state.qr_payload = None;
        self.state.pairing_code = None;
        let mut effects = vec![Effect::DisarmAuthTimer];
        effects.extend(self.transition_effects(json!({
            "reason": reason,
            "message": reason.user_message(),
        })));
        if teardown {
            effects.push(Effect::Teardown(reason));
        }
        effects
    }

    fn logout(&mut self) -> Vec<Effect> {
        self.state.status = SessionStatus::LoggedOut;
        self.state.qr_payload = None;
        self.state.pairing_code = None;
        self.state.identity = None;
        self.state.disconnected_at = Some(Utc::now());
        let mut effects = vec![Effect::DisarmAuthTimer];
        effects.extend(self.transition_effects(json!({})));
        effects
    }

    /// Persist the current state, then publish one status event carrying `extra`.
    fn transition_effects(&self, mut extra: Value) -> Vec<Effect> {
        let mut effects = vec![Effect::Persist(self.state.to_update())];
        extra["status"] = json!(self.state.status);
        let category = EventCategory::for_status(self.state.status);
        if self.policy.publishes(category) {
            effects.push(Effect::Publish(DomainEvent::new(
                self.session_id.clone(),
                category,
                extra,
            )));
        }
        effects
    }

    fn publish_only(&self, category: EventCategory, payload: Value) -> Vec<Effect> {
        if !self.policy.publishes(category) {
            return Vec::new();
        }
        vec![Effect::Publish(DomainEvent::new(
            self.session_id.clone(),
            category,
            payload,
        ))]
    }
}
