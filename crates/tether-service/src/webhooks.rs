// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook registration and delivery history.

use std::collections::BTreeMap;

use chrono::Utc;
use tether_core::webhook::{NewWebhook, WebhookPatch};
use tether_core::{
    CategorySet, DeliveryAttempt, RetryPolicy, SessionId, TetherError, Webhook, WebhookId,
};
use tether_webhook::{is_reserved_header, validate_header};
use tracing::info;
use url::Url;

use crate::gateway::Gateway;

/// Most delivery attempts returned by one `list_deliveries` call.
pub const MAX_DELIVERY_PAGE: usize = 500;
const MAX_TIMEOUT_MS: u64 = 120_000;

impl Gateway {
    /// Registers a webhook on an existing session.
    pub async fn create_webhook(
        &self,
        session_id: &SessionId,
        new: NewWebhook,
    ) -> Result<Webhook, TetherError> {
        self.require_session(session_id).await?;

        let url = validate_url(&new.url)?;
        let events = CategorySet::parse(&new.events)?;
        validate_headers(&new.headers)?;
        let retry = new.retry.unwrap_or(self.defaults.retry);
        validate_retry(&retry)?;
        let timeout_ms = new.timeout_ms.unwrap_or(self.defaults.timeout_ms);
        validate_timeout(timeout_ms)?;

        let now = Utc::now();
        let webhook = Webhook {
            id: WebhookId::generate(),
            session_id: session_id.clone(),
            url,
            events,
            secret: new.secret.filter(|s| !s.is_empty()),
            headers: new.headers,
            retry,
            timeout_ms,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.webhooks.create_webhook(&webhook).await?;
        info!(webhook_id = %webhook.id, %session_id, "webhook registered");
        Ok(webhook)
    }

    /// Applies a partial update. Fields left `None` keep their value.
    pub async fn update_webhook(
        &self,
        webhook_id: &WebhookId,
        patch: WebhookPatch,
    ) -> Result<Webhook, TetherError> {
        let mut webhook = self.get_webhook(webhook_id).await?;

        if let Some(url) = patch.url {
            webhook.url = validate_url(&url)?;
        }
        if let Some(events) = patch.events {
            webhook.events = CategorySet::parse(&events)?;
        }
        if let Some(secret) = patch.secret {
            webhook.secret = secret.filter(|s| !s.is_empty());
        }
        if let Some(headers) = patch.headers {
            validate_headers(&headers)?;
            webhook.headers = headers;
        }
        if let Some(retry) = patch.retry {
            validate_retry(&retry)?;
            webhook.retry = retry;
        }
        if let Some(timeout_ms) = patch.timeout_ms {
            validate_timeout(timeout_ms)?;
            webhook.timeout_ms = timeout_ms;
        }
        if let Some(is_active) = patch.is_active {
            webhook.is_active = is_active;
        }
        webhook.updated_at = Utc::now();

        self.webhooks.update_webhook(&webhook).await?;
        info!(%webhook_id, active = webhook.is_active, "webhook updated");
        Ok(webhook)
    }

    pub async fn delete_webhook(&self, webhook_id: &WebhookId) -> Result<(), TetherError> {
        if !self.webhooks.delete_webhook(webhook_id).await? {
            return Err(TetherError::webhook_not_found(webhook_id));
        }
        info!(%webhook_id, "webhook deleted");
        Ok(())
    }

    pub async fn get_webhook(&self, webhook_id: &WebhookId) -> Result<Webhook, TetherError> {
        self.webhooks
            .get_webhook(webhook_id)
            .await?
            .ok_or_else(|| TetherError::webhook_not_found(webhook_id))
    }

    pub async fn list_webhooks(&self, session_id: &SessionId) -> Result<Vec<Webhook>, TetherError> {
        self.require_session(session_id).await?;
        self.webhooks.list_webhooks(session_id).await
    }

    /// Sends one `webhook.test` delivery and returns the recorded attempt.
    pub async fn test_webhook(&self, webhook_id: &WebhookId) -> Result<DeliveryAttempt, TetherError> {
        self.engine.test(webhook_id).await
    }

    /// Most recent attempts first. `limit` is clamped to `1..=500`.
    pub async fn list_deliveries(
        &self,
        webhook_id: &WebhookId,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>, TetherError> {
        self.get_webhook(webhook_id).await?;
        self.deliveries
            .list_delivery_attempts(webhook_id, limit.clamp(1, MAX_DELIVERY_PAGE))
            .await
    }
}

fn validate_url(raw: &str) -> Result<String, TetherError> {
    let raw = raw.trim();
    let url = Url::parse(raw)
        .map_err(|e| TetherError::InvalidArgument(format!("invalid webhook url `{raw}`: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(TetherError::InvalidArgument(format!(
            "webhook url must use http or https, got `{}`",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(TetherError::InvalidArgument(
            "webhook url must include a host".into(),
        ));
    }
    Ok(raw.to_string())
}

fn validate_headers(headers: &BTreeMap<String, String>) -> Result<(), TetherError> {
    for (name, value) in headers {
        if is_reserved_header(name) {
            return Err(TetherError::InvalidArgument(format!(
                "header `{name}` is set by the gateway and cannot be overridden"
            )));
        }
        validate_header(name, value)?;
    }
    Ok(())
}

fn validate_retry(retry: &RetryPolicy) -> Result<(), TetherError> {
    if retry.max_attempts == 0 {
        return Err(TetherError::InvalidArgument(
            "retry.max_attempts must be at least 1".into(),
        ));
    }
    Ok(())
}

fn validate_timeout(timeout_ms: u64) -> Result<(), TetherError> {
    if timeout_ms == 0 || timeout_ms > MAX_TIMEOUT_MS {
        return Err(TetherError::InvalidArgument(format!(
            "timeout_ms must be between 1 and {MAX_TIMEOUT_MS}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_requires_http_scheme_and_host() {
        assert!(validate_url("https://hooks.example.com/in").is_ok());
        assert!(validate_url("http://127.0.0.1:8080").is_ok());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("http://").is_err());
    }

    #[test]
    fn reserved_headers_are_rejected_case_insensitively() {
        let headers = BTreeMap::from([("x-signature".to_string(), "forged".to_string())]);
        let err = validate_headers(&headers).unwrap_err();
        assert!(matches!(err, TetherError::InvalidArgument(_)));

        let headers = BTreeMap::from([("Authorization".to_string(), "Bearer t".to_string())]);
        assert!(validate_headers(&headers).is_ok());
    }

    #[test]
    fn zero_attempts_and_zero_timeout_are_rejected() {
        let retry = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(validate_retry(&retry).is_err());
        assert!(validate_timeout(0).is_err());
        assert!(validate_timeout(MAX_TIMEOUT_MS + 1).is_err());
        assert!(validate_timeout(5_000).is_ok());
    }
}
