// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection Object seam: one authenticated identity on the external network.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TetherError;
use crate::types::{Identity, PairingMethod, SessionId, SessionPolicy};

/// Why the underlying connection dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The QR code expired without ever being scanned.
    QrTimeout,
    /// Authentication started but never completed.
    AuthTimeout,
    /// Anything else reported by the network or the automation layer.
    Remote(String),
}

impl DisconnectReason {
    pub fn as_str(&self) -> &str {
        match self {
            DisconnectReason::QrTimeout => "qr_timeout",
            DisconnectReason::AuthTimeout => "auth_timeout",
            DisconnectReason::Remote(reason) => reason,
        }
    }
}

/// Lifecycle and traffic events emitted by a Connection Object, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    QrReady { payload: String },
    /// The automation layer itself gave up generating QR codes.
    QrExhausted,
    Authenticated,
    Ready { identity: Identity },
    Disconnected { reason: DisconnectReason },
    AuthFailed { message: String },
    MessageIn { payload: serde_json::Value },
    MessageOut { payload: serde_json::Value },
    Ack { payload: serde_json::Value },
}

/// Sending half of a session's inbound event channel.
///
/// Handed to the factory so the Connection Object can push events without
/// knowing who consumes them.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ConnectionEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<ConnectionEvent>) -> Self {
        Self { tx }
    }

    /// Pushes an event. Returns false once the session supervisor is gone.
    pub async fn emit(&self, event: ConnectionEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Everything a factory needs to build one Connection Object.
#[derive(Debug, Clone)]
pub struct ConnectionSpec {
    pub session_id: SessionId,
    /// Directory holding this session's on-disk credentials.
    pub auth_dir: PathBuf,
    pub policy: SessionPolicy,
}

/// Imperative side of a Connection Object.
///
/// Each instance holds scarce process resources; callers must always end its
/// life with [`destroy`](Connection::destroy).
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Starts the connection. Events begin flowing to the sink.
    async fn initialize(&self) -> Result<(), TetherError>;

    /// Requests a phone-linking code for `phone` (digits only). Returns the raw code.
    async fn request_pairing_code(
        &self,
        phone: &str,
        method: PairingMethod,
    ) -> Result<String, TetherError>;

    /// Unlinks the device from the network account.
    async fn logout(&self) -> Result<(), TetherError>;

    /// Releases every resource held by this instance.
    async fn destroy(&self) -> Result<(), TetherError>;
}

/// Builds Connection Objects for the session registry.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    async fn connect(
        &self,
        spec: ConnectionSpec,
        events: EventSink,
    ) -> Result<Arc<dyn Connection>, TetherError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        let sink = EventSink::new(tx);
        assert!(!sink.is_closed());
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.emit(ConnectionEvent::Authenticated).await);
    }

    #[test]
    fn disconnect_reason_names() {
        assert_eq!(DisconnectReason::QrTimeout.as_str(), "qr_timeout");
        assert_eq!(DisconnectReason::Remote("NAVIGATION".into()).as_str(), "NAVIGATION");
    }
}
