// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the storage collaborator traits.

use async_trait::async_trait;
use tether_config::model::StorageConfig;
use tether_core::{
    DeliveryAttempt, DeliveryLog, EventCategory, SessionId, SessionRecord, SessionStatus,
    SessionStore, StatusUpdate, TetherError, Webhook, WebhookId, WebhookStore,
};
use tracing::debug;

use crate::database::Database;
use crate::queries;

/// SQLite-backed store for sessions, webhooks, and delivery attempts.
///
/// One instance serves all three traits; wrap it in an `Arc` and hand out
/// trait-object clones.
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    /// Opens the configured database, creating and migrating it as needed.
    pub async fn open(config: &StorageConfig) -> Result<Self, TetherError> {
        let db = Database::open(&config.database_path, config.wal_mode).await?;
        debug!(path = %config.database_path, "SQLite storage initialized");
        Ok(Self { db })
    }

    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Checkpoints the WAL. Call once before exit.
    pub async fn close(&self) -> Result<(), TetherError> {
        self.db.checkpoint().await
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(&self, record: &SessionRecord) -> Result<(), TetherError> {
        queries::sessions::create_session(&self.db, record).await
    }

    async fn load_session(&self, id: &SessionId) -> Result<Option<SessionRecord>, TetherError> {
        queries::sessions::load_session(&self.db, id).await
    }

    async fn find_session_by_name(
        &self,
        owner_id: &str,
        name: &str,
    ) -> Result<Option<SessionRecord>, TetherError> {
        queries::sessions::find_session_by_name(&self.db, owner_id, name).await
    }

    async fn save_session_status(
        &self,
        id: &SessionId,
        update: &StatusUpdate,
    ) -> Result<(), TetherError> {
        queries::sessions::save_session_status(&self.db, id, update).await
    }

    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
    ) -> Result<Vec<SessionRecord>, TetherError> {
        queries::sessions::list_sessions(&self.db, status).await
    }

    async fn list_sessions_to_restore(&self) -> Result<Vec<SessionRecord>, TetherError> {
        queries::sessions::list_sessions_to_restore(&self.db).await
    }

    async fn delete_session(&self, id: &SessionId) -> Result<bool, TetherError> {
        queries::sessions::delete_session(&self.db, id).await
    }
}

#[async_trait]
impl WebhookStore for SqliteStore {
    async fn create_webhook(&self, webhook: &Webhook) -> Result<(), TetherError> {
        queries::webhooks::create_webhook(&self.db, webhook).await
    }

    async fn get_webhook(&self, id: &WebhookId) -> Result<Option<Webhook>, TetherError> {
        queries::webhooks::get_webhook(&self.db, id).await
    }

    async fn update_webhook(&self, webhook: &Webhook) -> Result<(), TetherError> {
        queries::webhooks::update_webhook(&self.db, webhook).await
    }

    async fn delete_webhook(&self, id: &WebhookId) -> Result<bool, TetherError> {
        queries::webhooks::delete_webhook(&self.db, id).await
    }

    async fn list_webhooks(&self, session_id: &SessionId) -> Result<Vec<Webhook>, TetherError> {
        queries::webhooks::list_webhooks(&self.db, session_id).await
    }

    async fn list_active_subscribers(
        &self,
        session_id: &SessionId,
        category: EventCategory,
    ) -> Result<Vec<Webhook>, TetherError> {
        queries::webhooks::list_active_subscribers(&self.db, session_id, category).await
    }
}

#[async_trait]
impl DeliveryLog for SqliteStore {
    async fn append_delivery_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), TetherError> {
        queries::deliveries::append_delivery_attempt(&self.db, attempt).await
    }

    async fn list_delivery_attempts(
        &self,
        webhook_id: &WebhookId,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>, TetherError> {
        queries::deliveries::list_delivery_attempts(&self.db, webhook_id, limit).await
    }
}
