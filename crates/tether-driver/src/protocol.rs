// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Line protocol spoken with the automation process.
//!
//! Requests go to stdin as `{"id":n,"op":...}`. Stdout carries either
//! responses `{"id":n,"ok":bool,"result":...,"error":...}` or unsolicited
//! events `{"event":...}`, one JSON object per line.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::{ConnectionEvent, DisconnectReason, Identity, PairingMethod};

#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub id: u64,
    #[serde(flatten)]
    pub op: Op<'a>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op<'a> {
    Initialize {
        sync_full_history: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        proxy: Option<&'a str>,
    },
    RequestPairingCode {
        phone: &'a str,
        method: PairingMethod,
    },
    Logout,
    Destroy,
}

impl Op<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Initialize { .. } => "initialize",
            Op::RequestPairingCode { .. } => "request_pairing_code",
            Op::Logout => "logout",
            Op::Destroy => "destroy",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventLine {
    Qr {
        qr: String,
    },
    QrExhausted,
    Authenticated,
    Ready {
        identity: Identity,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    AuthFailure {
        #[serde(default)]
        message: String,
    },
    Message {
        payload: Value,
    },
    MessageCreate {
        payload: Value,
    },
    Ack {
        payload: Value,
    },
}

impl From<EventLine> for ConnectionEvent {
    fn from(line: EventLine) -> Self {
        match line {
            EventLine::Qr { qr } => ConnectionEvent::QrReady { payload: qr },
            EventLine::QrExhausted => ConnectionEvent::QrExhausted,
            EventLine::Authenticated => ConnectionEvent::Authenticated,
            EventLine::Ready { identity } => ConnectionEvent::Ready { identity },
            EventLine::Disconnected { reason } => ConnectionEvent::Disconnected {
                reason: match reason.as_str() {
                    "qr_timeout" => DisconnectReason::QrTimeout,
                    "auth_timeout" => DisconnectReason::AuthTimeout,
                    _ => DisconnectReason::Remote(reason),
                },
            },
            EventLine::AuthFailure { message } => ConnectionEvent::AuthFailed { message },
            EventLine::Message { payload } => ConnectionEvent::MessageIn { payload },
            EventLine::MessageCreate { payload } => ConnectionEvent::MessageOut { payload },
            EventLine::Ack { payload } => ConnectionEvent::Ack { payload },
        }
    }
}

/// One stdout line.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Response(Response),
    Event(EventLine),
}

/// Encodes a request as one newline-terminated line.
pub fn encode(id: u64, op: Op<'_>) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(&Request { id, op })?;
    line.push(b'\n');
    Ok(line)
}

pub fn decode(line: &str) -> Result<Inbound, serde_json::Error> {
    serde_json::from_str(line)
}
