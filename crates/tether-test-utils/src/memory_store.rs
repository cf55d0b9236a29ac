// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory implementation of every storage collaborator trait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tether_core::{
    DeliveryAttempt, DeliveryLog, EventCategory, SessionId, SessionRecord, SessionStatus,
    SessionStore, StatusUpdate, TetherError, Webhook, WebhookId, WebhookStore,
};

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionId, SessionRecord>,
    webhooks: HashMap<WebhookId, Webhook>,
    deliveries: Vec<DeliveryAttempt>,
}

/// Cloneable in-memory store. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_status_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a session record directly.
    pub fn insert_session(&self, record: SessionRecord) {
        self.tables().sessions.insert(record.id.clone(), record);
    }

    pub fn session(&self, id: &SessionId) -> Option<SessionRecord> {
        self.tables().sessions.get(id).cloned()
    }

    pub fn insert_webhook(&self, webhook: Webhook) {
        self.tables().webhooks.insert(webhook.id.clone(), webhook);
    }

    /// Every logged delivery attempt in append order.
    pub fn deliveries(&self) -> Vec<DeliveryAttempt> {
        self.tables().deliveries.clone()
    }

    /// Makes `save_session_status` fail, to exercise best-effort writes.
    pub fn fail_status_writes(&self, fail: bool) {
        self.fail_status_writes.store(fail, Ordering::SeqCst);
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, record: &SessionRecord) -> Result<(), TetherError> {
        let mut tables = self.tables();
        if tables.sessions.contains_key(&record.id) {
            return Err(TetherError::Conflict(format!(
                "session {} already exists",
                record.id
            )));
        }
        if tables
            .sessions
            .values()
            .any(|s| s.owner_id == record.owner_id && s.name == record.name)
        {
            return Err(TetherError::Conflict(format!(
                "session name `{}` already in use",
                record.name
            )));
        }
        tables.sessions.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn load_session(&self, id: &SessionId) -> Result<Option<SessionRecord>, TetherError> {
        Ok(self.session(id))
    }

    async fn find_session_by_name(
        &self,
        owner_id: &str,
        name: &str,
    ) -> Result<Option<SessionRecord>, TetherError> {
        Ok(self
            .tables()
            .sessions
            .values()
            .find(|s| s.owner_id == owner_id && s.name == name)
            .cloned())
    }

    async fn save_session_status(
        &self,
        id: &SessionId,
        update: &StatusUpdate,
    ) -> Result<(), TetherError> {
        if self.fail_status_writes.load(Ordering::SeqCst) {
            return Err(TetherError::Storage {
                source: "status writes disabled".into(),
            });
        }
        let mut tables = self.tables();
        let record = tables
            .sessions
            .get_mut(id)
            .ok_or_else(|| TetherError::session_not_found(id))?;
        record.apply(update);
        Ok(())
    }

    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
    ) -> Result<Vec<SessionRecord>, TetherError> {
        let mut records: Vec<_> = self
            .tables()
            .sessions
            .values()
            .filter(|s| status.is_none_or(|wanted| s.status == wanted))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn list_sessions_to_restore(&self) -> Result<Vec<SessionRecord>, TetherError> {
        Ok(self
            .tables()
            .sessions
            .values()
            .filter(|s| {
                matches!(
                    s.status,
                    SessionStatus::Connected | SessionStatus::Disconnected
                )
            })
            .cloned()
            .collect())
    }

    async fn delete_session(&self, id: &SessionId) -> Result<bool, TetherError> {
        let mut tables = self.tables();
        tables.webhooks.retain(|_, w| &w.session_id != id);
        Ok(tables.sessions.remove(id).is_some())
    }
}

#[async_trait]
impl WebhookStore for MemoryStore {
    async fn create_webhook(&self, webhook: &Webhook) -> Result<(), TetherError> {
        self.insert_webhook(webhook.clone());
        Ok(())
    }

    async fn get_webhook(&self, id: &WebhookId) -> Result<Option<Webhook>, TetherError> {
        Ok(self.tables().webhooks.get(id).cloned())
    }

    async fn update_webhook(&self, webhook: &Webhook) -> Result<(), TetherError> {
        let mut tables = self.tables();
        let slot = tables
            .webhooks
            .get_mut(&webhook.id)
            .ok_or_else(|| TetherError::webhook_not_found(&webhook.id))?;
        *slot = Webhook {
            updated_at: Utc::now(),
            ..webhook.clone()
        };
        Ok(())
    }

    async fn delete_webhook(&self, id: &WebhookId) -> Result<bool, TetherError> {
        Ok(self.tables().webhooks.remove(id).is_some())
    }

    async fn list_webhooks(&self, session_id: &SessionId) -> Result<Vec<Webhook>, TetherError> {
        let mut hooks: Vec<_> = self
            .tables()
            .webhooks
            .values()
            .filter(|w| &w.session_id == session_id)
            .cloned()
            .collect();
        hooks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(hooks)
    }

    async fn list_active_subscribers(
        &self,
        session_id: &SessionId,
        category: EventCategory,
    ) -> Result<Vec<Webhook>, TetherError> {
        let hooks = self.list_webhooks(session_id).await?;
        Ok(hooks.into_iter().filter(|w| w.accepts(category)).collect())
    }
}

#[async_trait]
impl DeliveryLog for MemoryStore {
    async fn append_delivery_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), TetherError> {
        self.tables().deliveries.push(attempt.clone());
        Ok(())
    }

    async fn list_delivery_attempts(
        &self,
        webhook_id: &WebhookId,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>, TetherError> {
        Ok(self
            .tables()
            .deliveries
            .iter()
            .rev()
            .filter(|a| &a.webhook_id == webhook_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::SessionPolicy;

    fn record(id: &str, name: &str, status: SessionStatus) -> SessionRecord {
        let mut record = SessionRecord::new(
            SessionId::from(id),
            "owner-1".into(),
            name.into(),
            SessionPolicy::default(),
        );
        record.status = status;
        record
    }

    #[tokio::test]
    async fn duplicate_name_per_owner_conflicts() {
        let store = MemoryStore::new();
        store
            .create_session(&record("a", "main", SessionStatus::Initializing))
            .await
            .unwrap();
        let err = store
            .create_session(&record("b", "main", SessionStatus::Initializing))
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::Conflict(_)));
    }

    #[tokio::test]
    async fn restore_list_is_connected_or_disconnected() {
        let store = MemoryStore::new();
        store.insert_session(record("a", "a", SessionStatus::Connected));
        store.insert_session(record("b", "b", SessionStatus::Disconnected));
        store.insert_session(record("c", "c", SessionStatus::QrReady));
        store.insert_session(record("d", "d", SessionStatus::LoggedOut));
        let mut ids: Vec<_> = store
            .list_sessions_to_restore()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id.0)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn status_write_to_missing_record_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .save_session_status(
                &SessionId::from("ghost"),
                &StatusUpdate::bare(SessionStatus::Failed),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
