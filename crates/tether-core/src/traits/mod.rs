// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator trait definitions.
//!
//! The Connection Object and the durable-storage collaborator are external to
//! the gateway core; these traits are the seams they plug into. All of them use
//! `#[async_trait]` for dynamic dispatch.

pub mod connection;
pub mod storage;

pub use connection::{
    Connection, ConnectionEvent, ConnectionFactory, ConnectionSpec, DisconnectReason, EventSink,
};
pub use storage::{DeliveryLog, SessionStore, WebhookStore};
