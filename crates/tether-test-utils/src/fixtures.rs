// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ready-made domain values for tests.

use std::collections::BTreeMap;

use chrono::Utc;
use tether_core::{BackoffKind, CategorySet, RetryPolicy, SessionId, Webhook, WebhookId};

/// Active webhook subscribed to every category, with a fast constant retry.
pub fn webhook(session_id: &str, url: impl Into<String>) -> Webhook {
    let now = Utc::now();
    Webhook {
        id: WebhookId::generate(),
        session_id: SessionId::from(session_id),
        url: url.into(),
        events: CategorySet::All,
        secret: None,
        headers: BTreeMap::new(),
        retry: fast_retry(3),
        timeout_ms: 2_000,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

/// Retry policy with a 10ms constant backoff.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 10,
        backoff: BackoffKind::Constant,
    }
}
