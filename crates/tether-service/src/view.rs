// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Caller-facing shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_core::{
    FailureReason, Identity, SessionId, SessionPolicy, SessionRecord, SessionStatus,
};

use crate::qr::QrFormat;

/// Input of `create_session`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub owner_id: String,
    pub name: String,
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<SessionId>,
    #[serde(default)]
    pub policy: SessionPolicy,
}

/// Reconciled status of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: SessionId,
    pub owner_id: String,
    pub name: String,
    pub status: SessionStatus,
    pub qr_available: bool,
    pub pairing_code: Option<String>,
    pub identity: Option<Identity>,
    pub failure_reason: Option<FailureReason>,
    /// What the user should do next, for failed sessions.
    pub message: Option<&'static str>,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SessionRecord> for SessionView {
    fn from(record: SessionRecord) -> Self {
        Self {
            message: record.failure_reason.map(FailureReason::user_message),
            qr_available: record.qr_payload.is_some(),
            id: record.id,
            owner_id: record.owner_id,
            name: record.name,
            status: record.status,
            pairing_code: record.pairing_code,
            identity: record.identity,
            failure_reason: record.failure_reason,
            connected_at: record.connected_at,
            disconnected_at: record.disconnected_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// A rendered QR code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrImage {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub format: QrFormat,
    pub content: String,
}
