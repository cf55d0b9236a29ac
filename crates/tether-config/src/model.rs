// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so unrecognized keys are
//! rejected at startup with a suggestion.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::{BackoffKind, RetryPolicy};

/// Top-level Tether configuration. Every section defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TetherConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Session registry and state machine limits.
    #[serde(default)]
    pub session: SessionConfig,

    /// Webhook delivery defaults.
    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub bus: BusConfig,

    /// Automation process that backs each connection.
    #[serde(default)]
    pub driver: DriverConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// SQLite storage settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tether"))
        .unwrap_or_else(|| PathBuf::from(".tether"))
}

fn default_database_path() -> String {
    data_dir().join("tether.db").display().to_string()
}

fn default_true() -> bool {
    true
}

/// Session supervision limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Root directory for per-session credentials (`<auth_dir>/session-<id>`).
    #[serde(default = "default_auth_dir")]
    pub auth_dir: String,

    /// Maximum time in `AUTHENTICATING` before the session fails.
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,

    /// QR codes issued before an unscanned session fails.
    #[serde(default = "default_qr_max_retries")]
    pub qr_max_retries: u32,

    /// Per-session teardown bound during process shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Re-create live sessions from storage on start.
    #[serde(default = "default_true")]
    pub restore_on_start: bool,

    /// Bound on logout/destroy calls into a connection during an explicit destroy.
    #[serde(default = "default_teardown_timeout_secs")]
    pub teardown_timeout_secs: u64,

    /// Capacity of each session's inbound connection-event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_dir: default_auth_dir(),
            auth_timeout_secs: default_auth_timeout_secs(),
            qr_max_retries: default_qr_max_retries(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            restore_on_start: true,
            teardown_timeout_secs: default_teardown_timeout_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl SessionConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_secs)
    }
}

fn default_auth_dir() -> String {
    data_dir().join("auth").display().to_string()
}

fn default_auth_timeout_secs() -> u64 {
    60
}

fn default_qr_max_retries() -> u32 {
    5
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_teardown_timeout_secs() -> u64 {
    10
}

fn default_event_buffer() -> usize {
    64
}

/// Defaults applied to webhooks created without an explicit policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub default_base_delay_ms: u64,

    /// constant, linear, or exponential.
    #[serde(default = "default_backoff")]
    pub default_backoff: String,

    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Upper bound on any single backoff wait.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Response bodies are truncated to this many bytes before logging.
    #[serde(default = "default_response_excerpt_bytes")]
    pub response_excerpt_bytes: usize,

    /// Queued deliveries per webhook at which a backlog warning is logged, and every multiple after.
    #[serde(default = "default_lane_backlog_warn")]
    pub lane_backlog_warn: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: default_max_attempts(),
            default_base_delay_ms: default_base_delay_ms(),
            default_backoff: default_backoff(),
            default_timeout_ms: default_timeout_ms(),
            max_delay_ms: default_max_delay_ms(),
            response_excerpt_bytes: default_response_excerpt_bytes(),
            lane_backlog_warn: default_lane_backlog_warn(),
            user_agent: default_user_agent(),
        }
    }
}

impl WebhookConfig {
    /// Retry policy for webhooks registered without one.
    ///
    /// An unparseable backoff name falls back to exponential; validation
    /// rejects it before this is reached in practice.
    pub fn default_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.default_max_attempts.max(1),
            base_delay_ms: self.default_base_delay_ms,
            backoff: self.default_backoff.parse().unwrap_or(BackoffKind::Exponential),
        }
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_backoff() -> String {
    "exponential".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_response_excerpt_bytes() -> usize {
    1024
}

fn default_lane_backlog_warn() -> usize {
    1_000
}

fn default_user_agent() -> String {
    format!("tether-webhook/{}", env!("CARGO_PKG_VERSION"))
}

/// In-process event bus settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// Events buffered per ring consumer before it starts lagging. Lossless
    /// consumers never drop events and log a backlog warning at each multiple.
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

fn default_bus_capacity() -> usize {
    1024
}

/// External automation process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    /// Executable spawned once per session. Sessions cannot start without it.
    #[serde(default)]
    pub command: Option<String>,

    /// Extra arguments placed before the per-session ones.
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl DriverConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}
