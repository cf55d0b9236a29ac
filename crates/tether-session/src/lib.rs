// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session registry and connection state machine.
//!
//! - [`machine`]: the pure per-session reducer.
//! - [`registry`]: ownership of live Connection Objects, creation guard,
//!   restore on start, and all-settled shutdown.
//! - `supervisor`: the task that runs one session's reducer.
//! - [`pairing`]: pairing-code and phone formatting.

pub mod machine;
pub mod pairing;
pub mod registry;
mod supervisor;

pub use machine::{Effect, Input, SessionMachine, SessionState};
pub use pairing::{format_pairing_code, normalize_phone};
pub use registry::{
    validate_session_id, RegistryConfig, RestoreSummary, SessionHandle, SessionRegistry,
    ShutdownReport,
};
