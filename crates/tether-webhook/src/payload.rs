// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound webhook body.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tether_core::{DomainEvent, EventCategory, SessionId, TetherError, Webhook};

/// JSON body POSTed to subscribers.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload<'a> {
    pub category: EventCategory,
    pub session_id: &'a SessionId,
    pub occurred_at: DateTime<Utc>,
    pub data: &'a Value,
}

impl<'a> From<&'a DomainEvent> for WebhookPayload<'a> {
    fn from(event: &'a DomainEvent) -> Self {
        Self {
            category: event.category,
            session_id: &event.session_id,
            occurred_at: event.occurred_at,
            data: &event.payload,
        }
    }
}

/// Serializes the exact bytes that are sent and signed.
pub fn encode(event: &DomainEvent) -> Result<String, TetherError> {
    serde_json::to_string(&WebhookPayload::from(event)).map_err(|e| TetherError::Delivery {
        message: format!("failed to encode webhook payload: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Synthetic event used by connectivity checks.
pub fn test_event(webhook: &Webhook) -> DomainEvent {
    DomainEvent::new(
        webhook.session_id.clone(),
        EventCategory::WebhookTest,
        json!({
            "webhookId": webhook.id,
            "message": "Test delivery from Tether",
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_uses_camel_case_envelope() {
        let event = DomainEvent::new(
            SessionId::from("s1"),
            EventCategory::MessageReceived,
            json!({ "body": "hi" }),
        );
        let encoded: Value = serde_json::from_str(&encode(&event).unwrap()).unwrap();
        assert_eq!(encoded["category"], "message.received");
        assert_eq!(encoded["sessionId"], "s1");
        assert_eq!(encoded["data"]["body"], "hi");
        assert!(encoded["occurredAt"].as_str().unwrap().contains('T'));
        assert_eq!(encoded.as_object().unwrap().len(), 4);
    }
}
