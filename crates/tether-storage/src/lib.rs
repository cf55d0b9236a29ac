// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for the Tether session gateway.
//!
//! Provides [`SqliteStore`], which implements
//! [`SessionStore`](tether_core::SessionStore),
//! [`WebhookStore`](tether_core::WebhookStore), and
//! [`DeliveryLog`](tether_core::DeliveryLog) on top of a single
//! tokio-rusqlite connection with embedded refinery migrations.

pub mod adapter;
pub mod database;
pub mod migrations;
pub mod queries;

pub use adapter::SqliteStore;
pub use database::Database;
