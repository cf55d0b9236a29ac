// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable-storage collaborator traits.

use async_trait::async_trait;

use crate::error::TetherError;
use crate::event::EventCategory;
use crate::types::{SessionId, SessionRecord, SessionStatus, StatusUpdate};
use crate::webhook::{DeliveryAttempt, Webhook, WebhookId};

/// Durable session records.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn create_session(&self, record: &SessionRecord) -> Result<(), TetherError>;

    async fn load_session(&self, id: &SessionId) -> Result<Option<SessionRecord>, TetherError>;

    /// Looks up a session by its human name within one owner's namespace.
    async fn find_session_by_name(
        &self,
        owner_id: &str,
        name: &str,
    ) -> Result<Option<SessionRecord>, TetherError>;

    /// Replaces the status-derived fields. `NotFound` when the record is gone.
    async fn save_session_status(
        &self,
        id: &SessionId,
        update: &StatusUpdate,
    ) -> Result<(), TetherError>;

    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
    ) -> Result<Vec<SessionRecord>, TetherError>;

    /// Sessions whose last known status implies they should be live after a restart.
    async fn list_sessions_to_restore(&self) -> Result<Vec<SessionRecord>, TetherError>;

    /// Returns false when no record existed.
    async fn delete_session(&self, id: &SessionId) -> Result<bool, TetherError>;
}

/// Subscriber configurations. Read-only from the delivery engine's side.
#[async_trait]
pub trait WebhookStore: Send + Sync + 'static {
    async fn create_webhook(&self, webhook: &Webhook) -> Result<(), TetherError>;

    async fn get_webhook(&self, id: &WebhookId) -> Result<Option<Webhook>, TetherError>;

    async fn update_webhook(&self, webhook: &Webhook) -> Result<(), TetherError>;

    async fn delete_webhook(&self, id: &WebhookId) -> Result<bool, TetherError>;

    async fn list_webhooks(&self, session_id: &SessionId) -> Result<Vec<Webhook>, TetherError>;

    /// Active webhooks of `session_id` subscribed to `category` or to everything.
    async fn list_active_subscribers(
        &self,
        session_id: &SessionId,
        category: EventCategory,
    ) -> Result<Vec<Webhook>, TetherError>;
}

/// Append-only record of delivery attempts.
#[async_trait]
pub trait DeliveryLog: Send + Sync + 'static {
    async fn append_delivery_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), TetherError>;

    /// Most recent attempts first.
    async fn list_delivery_attempts(
        &self,
        webhook_id: &WebhookId,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>, TetherError>;
}
