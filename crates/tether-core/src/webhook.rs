// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subscriber configuration and delivery records.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::event::{CategorySet, EventCategory};
use crate::types::SessionId;

/// Opaque unique key of a webhook.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebhookId(pub String);

impl WebhookId {
    pub fn generate() -> Self {
        WebhookId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WebhookId {
    fn from(value: &str) -> Self {
        WebhookId(value.to_string())
    }
}

/// Shape of the wait between delivery attempts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Constant,
    Linear,
    #[default]
    Exponential,
}

/// Bounded retry policy of a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff: BackoffKind,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            backoff: BackoffKind::Exponential,
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Wait after failed attempt number `attempt` (1-based) before the next one.
    ///
    /// - constant: `base`
    /// - linear: `base * attempt`
    /// - exponential: `base * 2^(attempt-1)`
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.base_delay();
        match self.backoff {
            BackoffKind::Constant => base,
            BackoffKind::Linear => base.saturating_mul(attempt),
            BackoffKind::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
        }
    }

    /// Same as [`delay`](Self::delay), clamped to `max`.
    pub fn delay_capped(&self, attempt: u32, max: Duration) -> Duration {
        self.delay(attempt).min(max)
    }
}

/// One HTTP delivery target scoped to a session.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: WebhookId,
    pub session_id: SessionId,
    pub url: String,
    pub events: CategorySet,
    pub secret: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub retry: RetryPolicy,
    pub timeout_ms: u64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Active and subscribed to `category`.
    pub fn accepts(&self, category: EventCategory) -> bool {
        self.is_active && self.events.contains(category)
    }
}

impl fmt::Debug for Webhook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Webhook")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("url", &self.url)
            .field("events", &self.events)
            .field("secret", &self.secret.as_ref().map(|_| "[redacted]"))
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("retry", &self.retry)
            .field("timeout_ms", &self.timeout_ms)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Fields accepted when registering a webhook. Categories are still raw names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewWebhook {
    pub url: String,
    pub events: Vec<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Partial update of a webhook. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPatch {
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    /// `Some(None)` removes the secret.
    pub secret: Option<Option<String>>,
    pub headers: Option<BTreeMap<String, String>>,
    pub retry: Option<RetryPolicy>,
    pub timeout_ms: Option<u64>,
    pub is_active: Option<bool>,
}

/// Outcome of one HTTP call. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: String,
    pub webhook_id: WebhookId,
    pub session_id: SessionId,
    pub event_id: String,
    pub category: EventCategory,
    pub attempt_number: u32,
    pub status_code: Option<u16>,
    pub response_excerpt: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub success: bool,
    /// Exact request body that was sent.
    pub payload: String,
    /// `X-Signature` header value, when the webhook has a secret.
    pub signature: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(kind: BackoffKind, base_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay_ms: base_ms,
            backoff: kind,
        }
    }

    #[test]
    fn exponential_doubles_from_base() {
        let p = policy(BackoffKind::Exponential, 2_000);
        let delays: Vec<_> = (1..4).map(|a| p.delay(a)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
    }

    #[test]
    fn linear_and_constant_backoff() {
        let linear = policy(BackoffKind::Linear, 500);
        assert_eq!(linear.delay(3), Duration::from_millis(1_500));

        let constant = policy(BackoffKind::Constant, 500);
        assert_eq!(constant.delay(1), constant.delay(7));
    }

    #[test]
    fn exponential_saturates_instead_of_overflowing() {
        let p = policy(BackoffKind::Exponential, 1_000);
        let cap = Duration::from_secs(300);
        assert_eq!(p.delay_capped(64, cap), cap);
        assert!(p.delay(40) >= p.delay(39));
    }

    #[test]
    fn webhook_debug_redacts_secret() {
        let hook = Webhook {
            id: WebhookId::from("wh-1"),
            session_id: SessionId::from("s1"),
            url: "https://example.com/hook".into(),
            events: CategorySet::All,
            secret: Some("top-secret".into()),
            headers: BTreeMap::from([("Authorization".into(), "Bearer abc".into())]),
            retry: RetryPolicy::default(),
            timeout_ms: 1_000,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let debug = format!("{hook:?}");
        assert!(!debug.contains("top-secret"));
        assert!(!debug.contains("Bearer abc"));
        assert!(debug.contains("[redacted]"));
    }

    #[test]
    fn inactive_webhook_accepts_nothing() {
        let mut hook = Webhook {
            id: WebhookId::generate(),
            session_id: SessionId::from("s1"),
            url: "https://example.com".into(),
            events: CategorySet::All,
            secret: None,
            headers: BTreeMap::new(),
            retry: RetryPolicy::default(),
            timeout_ms: 1_000,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(hook.accepts(EventCategory::MessageReceived));
        hook.is_active = false;
        assert!(!hook.accepts(EventCategory::MessageReceived));
    }

    proptest::proptest! {
        #[test]
        fn delays_never_decrease(base in 1u64..10_000, attempt in 1u32..40) {
            for kind in [BackoffKind::Constant, BackoffKind::Linear, BackoffKind::Exponential] {
                let p = policy(kind, base);
                proptest::prop_assert!(p.delay(attempt + 1) >= p.delay(attempt));
            }
        }
    }
}
