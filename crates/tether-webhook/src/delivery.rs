// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-attempt HTTP delivery and the bounded retry loop around it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::redirect::Policy;
use tether_config::model::WebhookConfig;
use tether_core::{DeliveryAttempt, DeliveryLog, DomainEvent, TetherError, Webhook};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{payload, signature};

/// Headers the gateway always sets. Custom headers with these names are dropped.
pub const RESERVED_HEADERS: &[&str] = &[
    "content-type",
    "user-agent",
    "x-event",
    "x-event-id",
    "x-timestamp",
    "x-session",
    "x-signature",
];

pub fn is_reserved_header(name: &str) -> bool {
    RESERVED_HEADERS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

/// Rejects header names or values that could never be sent.
pub fn validate_header(name: &str, value: &str) -> Result<(), TetherError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| TetherError::InvalidArgument(format!("invalid header name `{name}`")))?;
    HeaderValue::from_str(value).map_err(|_| {
        TetherError::InvalidArgument(format!("invalid value for header `{name}`"))
    })?;
    Ok(())
}

/// Engine-wide delivery knobs.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub user_agent: String,
    pub max_delay: Duration,
    pub response_excerpt_bytes: usize,
    /// Lane depth at which (and at every multiple of which) a backlog warning is logged.
    pub lane_backlog_warn: usize,
}

impl DeliverySettings {
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_delay: config.max_delay(),
            response_excerpt_bytes: config.response_excerpt_bytes,
            lane_backlog_warn: config.lane_backlog_warn,
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self::from_config(&WebhookConfig::default())
    }
}

/// How the retry loop treats one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Delivered,
    /// 4xx: the subscriber rejected the request, retrying will not help.
    Rejected,
    Retry,
}

impl Verdict {
    pub fn of(attempt: &DeliveryAttempt) -> Self {
        match attempt.status_code {
            Some(code) if (200..300).contains(&code) => Verdict::Delivered,
            Some(code) if (400..500).contains(&code) => Verdict::Rejected,
            _ => Verdict::Retry,
        }
    }
}

/// Result of running the retry loop for one (event, webhook) pair.
#[derive(Debug)]
pub struct DeliveryReport {
    pub attempts: Vec<DeliveryAttempt>,
    pub outcome: Result<(), TetherError>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Sends signed webhook requests and records every attempt.
pub struct Deliverer {
    client: reqwest::Client,
    log: Arc<dyn DeliveryLog>,
    settings: DeliverySettings,
}

impl Deliverer {
    pub fn new(log: Arc<dyn DeliveryLog>, settings: DeliverySettings) -> Result<Self, TetherError> {
        // Per-request timeouts come from each webhook.
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(|e| TetherError::Delivery {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            client,
            log,
            settings,
        })
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    /// Performs one HTTP attempt. Never fails: transport errors land in the
    /// returned attempt's `error`.
    pub async fn deliver_once(
        &self,
        webhook: &Webhook,
        event: &DomainEvent,
        attempt_number: u32,
    ) -> DeliveryAttempt {
        let attempted_at = Utc::now();
        let mut record = DeliveryAttempt {
            id: uuid::Uuid::new_v4().to_string(),
            webhook_id: webhook.id.clone(),
            session_id: event.session_id.clone(),
            event_id: event.id.clone(),
            category: event.category,
            attempt_number,
            status_code: None,
            response_excerpt: None,
            error: None,
            duration_ms: 0,
            success: false,
            payload: String::new(),
            signature: None,
            attempted_at,
        };

        let body = match payload::encode(event) {
            Ok(body) => body,
            Err(e) => {
                record.error = Some(e.to_string());
                return record;
            }
        };
        let signature = webhook
            .secret
            .as_deref()
            .map(|secret| signature::sign(secret, body.as_bytes()));

        let mut request = self.client.post(&webhook.url).timeout(webhook.timeout());
        for (name, value) in &webhook.headers {
            if is_reserved_header(name) {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }
        request = request
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, self.settings.user_agent.as_str())
            .header("X-Event", event.category.to_string())
            .header("X-Event-Id", event.id.as_str())
            .header("X-Timestamp", event.occurred_at.timestamp().to_string())
            .header("X-Session", event.session_id.as_str());
        if let Some(sig) = &signature {
            request = request.header("X-Signature", sig.as_str());
        }

        let started = Instant::now();
        let result = request.body(body.clone()).send().await;
        match result {
            Ok(response) => {
                let status = response.status();
                record.status_code = Some(status.as_u16());
                record.success = status.is_success();
                if !record.success {
                    record.error = Some(format!("HTTP {status}"));
                }
                match response.text().await {
                    Ok(text) => {
                        record.response_excerpt =
                            excerpt(&text, self.settings.response_excerpt_bytes);
                    }
                    Err(e) => {
                        debug!(webhook_id = %webhook.id, error = %e, "failed to read response body");
                    }
                }
            }
            Err(e) if e.is_timeout() => {
                record.error = Some(format!("timed out after {}ms", webhook.timeout_ms));
            }
            Err(e) => {
                record.error = Some(format!("request failed: {e}"));
            }
        }
        record.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        record.payload = body;
        record.signature = signature;
        record
    }

    /// Appends an attempt to the delivery log. Log failures are not fatal.
    pub async fn record(&self, attempt: &DeliveryAttempt) {
        if let Err(e) = self.log.append_delivery_attempt(attempt).await {
            warn!(
                webhook_id = %attempt.webhook_id,
                attempt = attempt.attempt_number,
                error = %e,
                "failed to record delivery attempt"
            );
        }
    }

    /// Delivers `event` to `webhook`, retrying per the webhook's policy.
    ///
    /// 2xx ends the loop. 4xx ends it without retrying. Anything else waits
    /// `delay_capped(attempt)` and tries again until `max_attempts` is spent
    /// or `cancel` fires.
    pub async fn deliver_with_retry(
        &self,
        webhook: &Webhook,
        event: &DomainEvent,
        cancel: &CancellationToken,
    ) -> DeliveryReport {
        let max_attempts = webhook.retry.max_attempts.max(1);
        let mut attempts = Vec::new();

        for number in 1..=max_attempts {
            let attempt = self.deliver_once(webhook, event, number).await;
            self.record(&attempt).await;
            let verdict = Verdict::of(&attempt);
            attempts.push(attempt);

            match verdict {
                Verdict::Delivered => {
                    debug!(
                        webhook_id = %webhook.id,
                        event_id = %event.id,
                        attempt = number,
                        "webhook delivered"
                    );
                    return DeliveryReport {
                        attempts,
                        outcome: Ok(()),
                    };
                }
                Verdict::Rejected => break,
                Verdict::Retry if number < max_attempts => {
                    let wait = webhook.retry.delay_capped(number, self.settings.max_delay);
                    debug!(
                        webhook_id = %webhook.id,
                        attempt = number,
                        wait_ms = wait.as_millis() as u64,
                        "webhook attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                Verdict::Retry => {}
            }
        }

        let last_error = attempts
            .last()
            .and_then(|a| a.error.clone())
            .unwrap_or_else(|| "no attempt made".to_string());
        let error = TetherError::Unreachable {
            webhook_id: webhook.id.to_string(),
            attempts: attempts.len() as u32,
            last_error,
        };
        info!(
            webhook_id = %webhook.id,
            session_id = %event.session_id,
            category = %event.category,
            error = %error,
            "webhook delivery abandoned"
        );
        DeliveryReport {
            attempts,
            outcome: Err(error),
        }
    }
}

/// Truncates `text` to at most `max` bytes on a char boundary.
pub fn excerpt(text: &str, max: usize) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    if text.len() <= max {
        return Some(text.to_string());
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Some(text[..end].to_string())
}
