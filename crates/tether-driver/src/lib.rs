// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection Object backed by an external automation process.
//!
//! The gateway never talks to the messaging network directly. For each
//! session it spawns the configured driver command with
//! `--session <id> --auth-dir <dir>` appended and exchanges newline-delimited
//! JSON with it (see [`protocol`]).

pub mod connection;
pub mod protocol;

pub use connection::{DriverConnection, DriverFactory};
