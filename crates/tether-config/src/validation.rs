// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation.
//!
//! Checks the constraints serde cannot express. Every failure is collected
//! rather than stopping at the first one.

use tether_core::BackoffKind;

use crate::diagnostic::ConfigError;
use crate::model::TetherConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
pub fn validate_config(config: &TetherConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if !LOG_LEVELS.contains(&config.daemon.log_level.as_str()) {
        fail(format!(
            "daemon.log_level `{}` must be one of {}",
            config.daemon.log_level,
            LOG_LEVELS.join(", ")
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    let session = &config.session;
    if session.auth_dir.trim().is_empty() {
        fail("session.auth_dir must not be empty".to_string());
    }
    if session.qr_max_retries < 1 {
        fail("session.qr_max_retries must be at least 1".to_string());
    }
    for (key, value) in [
        ("session.auth_timeout_secs", session.auth_timeout_secs),
        ("session.shutdown_timeout_secs", session.shutdown_timeout_secs),
        ("session.teardown_timeout_secs", session.teardown_timeout_secs),
        ("webhook.default_timeout_ms", config.webhook.default_timeout_ms),
        ("driver.request_timeout_secs", config.driver.request_timeout_secs),
    ] {
        if value == 0 {
            fail(format!("{key} must be greater than zero"));
        }
    }
    if session.event_buffer < 1 {
        fail("session.event_buffer must be at least 1".to_string());
    }

    let webhook = &config.webhook;
    if webhook.default_max_attempts < 1 {
        fail("webhook.default_max_attempts must be at least 1".to_string());
    }
    if webhook.default_backoff.parse::<BackoffKind>().is_err() {
        fail(format!(
            "webhook.default_backoff `{}` must be constant, linear, or exponential",
            webhook.default_backoff
        ));
    }
    if webhook.max_delay_ms < webhook.default_base_delay_ms {
        fail(format!(
            "webhook.max_delay_ms ({}) must not be below webhook.default_base_delay_ms ({})",
            webhook.max_delay_ms, webhook.default_base_delay_ms
        ));
    }

    if webhook.lane_backlog_warn < 1 {
        fail("webhook.lane_backlog_warn must be at least 1".to_string());
    }

    if config.bus.capacity < 1 {
        fail("bus.capacity must be at least 1".to_string());
    }

    if let Some(command) = &config.driver.command
        && command.trim().is_empty()
    {
        fail("driver.command must not be empty when set".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
