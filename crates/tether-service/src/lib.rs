// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Caller-facing operations of the Tether session gateway.
//!
//! [`Gateway`] composes the session registry, the webhook delivery engine,
//! and the storage collaborators into the operations a route layer exposes:
//! session lifecycle, QR and pairing-code retrieval, webhook registration,
//! and delivery history.

pub mod gateway;
pub mod qr;
pub mod view;
mod webhooks;

pub use gateway::{Gateway, WebhookDefaults, MAX_QR_WAIT};
pub use qr::QrFormat;
pub use view::{NewSession, QrImage, SessionView};
pub use webhooks::MAX_DELIVERY_PAGE;
