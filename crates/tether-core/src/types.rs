// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session data model shared by the registry, the storage layer, and the service facade.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::event::EventCategory;

/// Opaque unique key of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generates a fresh random session id.
    pub fn generate() -> Self {
        SessionId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        SessionId(value.to_string())
    }
}

/// Connection status of a session.
///
/// `Failed` and `LoggedOut` are terminal for a Connection Object instance:
/// re-entering `Initializing` requires a fresh instance.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Initializing,
    QrReady,
    Authenticating,
    Connected,
    Disconnected,
    Failed,
    LoggedOut,
}

impl SessionStatus {
    /// No further transition is possible on the same Connection Object.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Failed | SessionStatus::LoggedOut)
    }

    /// Statuses that only make sense while a process is actively driving the session.
    ///
    /// A durable record in one of these states with no live Connection Object is stale.
    pub fn is_pre_auth(self) -> bool {
        matches!(
            self,
            SessionStatus::Initializing | SessionStatus::QrReady | SessionStatus::Authenticating
        )
    }

    /// Statuses in which a pairing code may be requested.
    pub fn accepts_pairing_code(self) -> bool {
        matches!(self, SessionStatus::Initializing | SessionStatus::QrReady)
    }
}

/// Why a session ended up in `Failed`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The QR retry ceiling was reached without a scan.
    QrExhausted,
    /// No `ready` arrived within the authentication timeout.
    AuthTimeout,
    /// The network rejected the stored credentials.
    CredentialsRejected,
    /// The Connection Object could not be initialized.
    InitializationFailed,
    /// The durable record claimed a pre-auth status but no process was driving it.
    Stale,
}

impl FailureReason {
    /// Message surfaced to users for a failed session.
    pub fn user_message(self) -> &'static str {
        match self {
            FailureReason::QrExhausted => {
                "QR code was not scanned in time. Restart the session to get a new code."
            }
            FailureReason::AuthTimeout => {
                "Authentication did not complete in time. Restart the session to try again."
            }
            FailureReason::CredentialsRejected => {
                "Stored credentials were rejected. Restart the session and link the device again."
            }
            FailureReason::InitializationFailed => {
                "The connection could not be started. Restart the session to try again."
            }
            FailureReason::Stale => {
                "The session was interrupted before authenticating. Restart the session."
            }
        }
    }
}

/// Network identity captured once a session is connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Network address of the linked account (phone-derived id).
    pub network_address: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Per-session policy blob handed to the Connection Object and the state machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionPolicy {
    /// Event categories never published for this session.
    #[serde(default)]
    pub ignored_categories: BTreeSet<EventCategory>,

    /// Ask the network for the full message history on link.
    #[serde(default)]
    pub sync_full_history: bool,

    /// Upstream proxy URL for the automation process.
    #[serde(default)]
    pub proxy: Option<String>,
}

impl SessionPolicy {
    /// Returns true when events of `category` should be published.
    pub fn publishes(&self, category: EventCategory) -> bool {
        !self.ignored_categories.contains(&category)
    }
}

/// Durable record of a session as held by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub owner_id: String,
    pub name: String,
    pub status: SessionStatus,
    pub qr_payload: Option<String>,
    pub pairing_code: Option<String>,
    pub identity: Option<Identity>,
    pub failure_reason: Option<FailureReason>,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub policy: SessionPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// A fresh record in `Initializing` with no captured fields.
    pub fn new(id: SessionId, owner_id: String, name: String, policy: SessionPolicy) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id,
            name,
            status: SessionStatus::Initializing,
            qr_payload: None,
            pairing_code: None,
            identity: None,
            failure_reason: None,
            connected_at: None,
            disconnected_at: None,
            policy,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a status update to this record in place.
    pub fn apply(&mut self, update: &StatusUpdate) {
        self.status = update.status;
        self.qr_payload = update.qr_payload.clone();
        self.pairing_code = update.pairing_code.clone();
        self.identity = update.identity.clone();
        self.failure_reason = update.failure_reason;
        self.connected_at = update.connected_at;
        self.disconnected_at = update.disconnected_at;
        self.updated_at = Utc::now();
    }
}

/// Status-derived fields written by `save_session_status`.
///
/// Every write replaces all fields, so clearing a QR payload or wiping an
/// identity is expressed as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: SessionStatus,
    pub qr_payload: Option<String>,
    pub pairing_code: Option<String>,
    pub identity: Option<Identity>,
    pub failure_reason: Option<FailureReason>,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    /// A bare status with every captured field cleared.
    pub fn bare(status: SessionStatus) -> Self {
        Self {
            status,
            qr_payload: None,
            pairing_code: None,
            identity: None,
            failure_reason: None,
            connected_at: None,
            disconnected_at: None,
        }
    }

    /// Rewrites a stale pre-auth record as failed, keeping timestamps.
    pub fn stale_from(record: &SessionRecord) -> Self {
        Self {
            status: SessionStatus::Failed,
            qr_payload: None,
            pairing_code: None,
            identity: record.identity.clone(),
            failure_reason: Some(FailureReason::Stale),
            connected_at: record.connected_at,
            disconnected_at: record.disconnected_at,
        }
    }
}

/// How a pairing code is delivered to the phone.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PairingMethod {
    /// The phone shows a push notification prompting for the code.
    #[default]
    Notification,
    /// The user enters the code manually from the linked-devices screen.
    Manual,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn status_string_round_trip() {
        let all = [
            SessionStatus::Initializing,
            SessionStatus::QrReady,
            SessionStatus::Authenticating,
            SessionStatus::Connected,
            SessionStatus::Disconnected,
            SessionStatus::Failed,
            SessionStatus::LoggedOut,
        ];
        for status in all {
            let s = status.to_string();
            assert_eq!(SessionStatus::from_str(&s).unwrap(), status);
        }
        assert_eq!(SessionStatus::QrReady.to_string(), "QR_READY");
        assert_eq!(SessionStatus::LoggedOut.as_ref(), "LOGGED_OUT");
    }

    #[test]
    fn status_serde_matches_display() {
        let json = serde_json::to_string(&SessionStatus::Authenticating).unwrap();
        assert_eq!(json, "\"AUTHENTICATING\"");
    }

    #[test]
    fn terminal_and_pre_auth_classification() {
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::LoggedOut.is_terminal());
        assert!(!SessionStatus::Disconnected.is_terminal());

        assert!(SessionStatus::QrReady.is_pre_auth());
        assert!(SessionStatus::Initializing.is_pre_auth());
        assert!(SessionStatus::Authenticating.is_pre_auth());
        assert!(!SessionStatus::Connected.is_pre_auth());
    }

    #[test]
    fn pairing_only_before_qr_scan() {
        assert!(SessionStatus::QrReady.accepts_pairing_code());
        assert!(SessionStatus::Initializing.accepts_pairing_code());
        assert!(!SessionStatus::Authenticating.accepts_pairing_code());
        assert!(!SessionStatus::Connected.accepts_pairing_code());
    }

    #[test]
    fn record_apply_clears_fields() {
        let mut record = SessionRecord::new(
            SessionId::from("s1"),
            "owner".into(),
            "main".into(),
            SessionPolicy::default(),
        );
        record.qr_payload = Some("qr".into());
        record.apply(&StatusUpdate::bare(SessionStatus::Authenticating));
        assert_eq!(record.status, SessionStatus::Authenticating);
        assert!(record.qr_payload.is_none());
    }

    #[test]
    fn policy_filters_ignored_categories() {
        let mut policy = SessionPolicy::default();
        policy.ignored_categories.insert(EventCategory::MessageAck);
        assert!(!policy.publishes(EventCategory::MessageAck));
        assert!(policy.publishes(EventCategory::MessageReceived));
    }

    #[test]
    fn failure_reason_wire_names() {
        assert_eq!(FailureReason::QrExhausted.to_string(), "qr_exhausted");
        assert_eq!(
            FailureReason::from_str("credentials_rejected").unwrap(),
            FailureReason::CredentialsRejected
        );
    }
}
