// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Tether session gateway.
//!
//! This crate provides the error taxonomy, the data model (sessions, webhooks,
//! domain events, delivery attempts), and the collaborator traits that the
//! session registry and the webhook delivery engine are written against.

pub mod error;
pub mod event;
pub mod traits;
pub mod types;
pub mod webhook;

// Re-export key items at crate root for ergonomic imports.
pub use error::TetherError;
pub use event::{CategorySet, DomainEvent, EventCategory};
pub use types::{
    FailureReason, Identity, PairingMethod, SessionId, SessionPolicy, SessionRecord,
    SessionStatus, StatusUpdate,
};
pub use webhook::{BackoffKind, DeliveryAttempt, RetryPolicy, Webhook, WebhookId};

pub use traits::{
    Connection, ConnectionEvent, ConnectionFactory, ConnectionSpec, DeliveryLog,
    DisconnectReason, EventSink, SessionStore, WebhookStore,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tether_error_has_taxonomy_variants() {
        let _not_found = TetherError::session_not_found("s1");
        let _conflict = TetherError::Conflict("dup".into());
        let _state = TetherError::InvalidState {
            operation: "request pairing code",
            status: SessionStatus::Connected,
        };
        let _unreachable = TetherError::Unreachable {
            webhook_id: "wh".into(),
            attempts: 3,
            last_error: "timeout".into(),
        };
        let _exhausted = TetherError::ResourceExhausted(FailureReason::QrExhausted);
        let _storage = TetherError::Storage {
            source: Box::new(std::io::Error::other("test")),
        };
        let _timeout = TetherError::Timeout {
            duration: std::time::Duration::from_secs(5),
        };
    }

    #[test]
    fn invalid_state_message_names_status() {
        let err = TetherError::InvalidState {
            operation: "request pairing code",
            status: SessionStatus::Connected,
        };
        assert_eq!(
            err.to_string(),
            "cannot request pairing code while session is CONNECTED"
        );
    }

    #[test]
    fn not_found_helpers() {
        let err = TetherError::webhook_not_found("wh-9");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "webhook not found: wh-9");
    }

    #[test]
    fn all_collaborator_traits_are_exported() {
        fn _assert_connection<T: Connection>() {}
        fn _assert_factory<T: ConnectionFactory>() {}
        fn _assert_session_store<T: SessionStore>() {}
        fn _assert_webhook_store<T: WebhookStore>() {}
        fn _assert_delivery_log<T: DeliveryLog>() {}
    }
}
