// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook delivery engine for the Tether session gateway.
//!
//! Consumes domain events from the bus, resolves the webhooks subscribed to
//! each event, and POSTs a signed JSON payload to every one of them with a
//! per-webhook retry policy. Every HTTP attempt is appended to the delivery
//! log.

pub mod delivery;
pub mod engine;
pub mod payload;
pub mod signature;

pub use delivery::{
    is_reserved_header, validate_header, Deliverer, DeliveryReport, DeliverySettings, Verdict,
};
pub use engine::WebhookEngine;
pub use payload::WebhookPayload;
