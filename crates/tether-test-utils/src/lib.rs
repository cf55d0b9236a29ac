// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Tether integration tests.
//!
//! Deterministic stand-ins for the external collaborators so registry,
//! delivery, and service tests run without a browser or a database.
//!
//! # Components
//!
//! - [`MemoryStore`] - in-memory session, webhook, and delivery-log storage
//! - [`MockConnectionFactory`] / [`MockConnection`] - scriptable Connection Objects
//! - [`fixtures`] - webhook builders with fast retry policies

pub mod fixtures;
pub mod memory_store;
pub mod mock_connection;

pub use memory_store::MemoryStore;
pub use mock_connection::{MockAction, MockBehavior, MockConnection, MockConnectionFactory};
