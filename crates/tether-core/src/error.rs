// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Tether session gateway.

use thiserror::Error;

use crate::types::{FailureReason, SessionStatus};

/// The primary error type used across collaborator traits and core operations.
#[derive(Debug, Error)]
pub enum TetherError {
    /// Unknown session or webhook.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Duplicate name, or a creation for the same session is already in flight.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Operation is not valid for the session's current status.
    #[error("cannot {operation} while session is {status}")]
    InvalidState {
        operation: &'static str,
        status: SessionStatus,
    },

    /// Subscriber endpoint failed after exhausting every attempt.
    #[error("webhook {webhook_id} unreachable after {attempts} attempt(s): {last_error}")]
    Unreachable {
        webhook_id: String,
        attempts: u32,
        last_error: String,
    },

    /// QR or authentication ceiling reached.
    #[error("session resources exhausted: {0}")]
    ResourceExhausted(FailureReason),

    /// Caller supplied a malformed value (bad URL, empty category set, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Connection object errors (automation process failure, protocol errors).
    #[error("connection error: {message}")]
    Connection {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A single webhook HTTP call failed to complete.
    #[error("delivery error: {message}")]
    Delivery {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TetherError {
    /// Shorthand for a missing session.
    pub fn session_not_found(id: impl std::fmt::Display) -> Self {
        TetherError::NotFound {
            kind: "session",
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing webhook.
    pub fn webhook_not_found(id: impl std::fmt::Display) -> Self {
        TetherError::NotFound {
            kind: "webhook",
            id: id.to_string(),
        }
    }

    /// Wraps a connection-level failure message.
    pub fn connection(message: impl Into<String>) -> Self {
        TetherError::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Returns true for the `NotFound` variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TetherError::NotFound { .. })
    }
}
