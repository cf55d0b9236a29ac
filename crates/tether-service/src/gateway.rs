// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session operations exposed to the route layer.

use std::sync::Arc;
use std::time::Duration;

use tether_config::model::WebhookConfig;
use tether_core::{
    DeliveryLog, FailureReason, PairingMethod, RetryPolicy, SessionId, SessionRecord,
    SessionStatus, SessionStore, StatusUpdate, TetherError, WebhookStore,
};
use tether_session::{validate_session_id, SessionRegistry};
use tether_webhook::WebhookEngine;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::qr::{self, QrFormat};
use crate::view::{NewSession, QrImage, SessionView};

/// Longest a `get_qr` call may suspend.
pub const MAX_QR_WAIT: Duration = Duration::from_secs(60);
const DEFAULT_QR_WAIT: Duration = Duration::from_secs(30);
const MAX_NAME_LEN: usize = 100;

/// Defaults applied to webhooks registered without their own policy.
#[derive(Debug, Clone)]
pub struct WebhookDefaults {
    pub retry: RetryPolicy,
    pub timeout_ms: u64,
}

impl WebhookDefaults {
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self {
            retry: config.default_retry(),
            timeout_ms: config.default_timeout_ms,
        }
    }
}

impl Default for WebhookDefaults {
    fn default() -> Self {
        Self::from_config(&WebhookConfig::default())
    }
}

/// Facade over the registry, the delivery engine, and storage.
#[derive(Clone)]
pub struct Gateway {
    pub(crate) sessions: Arc<dyn SessionStore>,
    pub(crate) webhooks: Arc<dyn WebhookStore>,
    pub(crate) deliveries: Arc<dyn DeliveryLog>,
    pub(crate) registry: SessionRegistry,
    pub(crate) engine: WebhookEngine,
    pub(crate) defaults: WebhookDefaults,
}

impl Gateway {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        webhooks: Arc<dyn WebhookStore>,
        deliveries: Arc<dyn DeliveryLog>,
        registry: SessionRegistry,
        engine: WebhookEngine,
        defaults: WebhookDefaults,
    ) -> Self {
        Self {
            sessions,
            webhooks,
            deliveries,
            registry,
            engine,
            defaults,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Records a new session and starts connecting it.
    ///
    /// Returns before authentication; poll `get_status` or `get_qr`.
    pub async fn create_session(&self, new: NewSession) -> Result<SessionView, TetherError> {
        let owner_id = new.owner_id.trim().to_string();
        let name = new.name.trim().to_string();
        if owner_id.is_empty() {
            return Err(TetherError::InvalidArgument("owner id is required".into()));
        }
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(TetherError::InvalidArgument(format!(
                "session name must be 1 to {MAX_NAME_LEN} characters"
            )));
        }
        let session_id = new.id.unwrap_or_else(SessionId::generate);
        validate_session_id(&session_id)?;

        if self
            .sessions
            .find_session_by_name(&owner_id, &name)
            .await?
            .is_some()
        {
            return Err(TetherError::Conflict(format!(
                "a session named `{name}` already exists"
            )));
        }
        if self.sessions.load_session(&session_id).await?.is_some() {
            return Err(TetherError::Conflict(format!(
                "session {session_id} already exists"
            )));
        }

        let record = SessionRecord::new(session_id.clone(), owner_id.clone(), name, new.policy);
        self.sessions.create_session(&record).await?;

        if let Err(e) = self
            .registry
            .create(session_id.clone(), &owner_id, record.policy.clone())
            .await
        {
            warn!(%session_id, error = %e, "session recorded but could not be started");
            let failed = StatusUpdate {
                failure_reason: Some(FailureReason::InitializationFailed),
                ..StatusUpdate::bare(SessionStatus::Failed)
            };
            if let Err(write) = self.sessions.save_session_status(&session_id, &failed).await {
                warn!(%session_id, error = %write, "failed to record start failure");
            }
            return Err(e);
        }

        debug!(%session_id, %owner_id, "session recorded and started");
        self.get_status(&session_id).await
    }

    /// Logs out, tears down, and deletes the session with its webhooks.
    pub async fn destroy_session(&self, session_id: &SessionId) -> Result<(), TetherError> {
        self.require_session(session_id).await?;
        self.registry.destroy(session_id).await?;
        self.sessions.delete_session(session_id).await?;
        info!(%session_id, "session deleted");
        Ok(())
    }

    /// Replaces the Connection Object with a fresh one.
    pub async fn restart_session(&self, session_id: &SessionId) -> Result<SessionView, TetherError> {
        self.registry.restart(session_id).await?;
        self.get_status(session_id).await
    }

    /// Unlinks the device and stops the session. The record stays, `LOGGED_OUT`.
    pub async fn logout(&self, session_id: &SessionId) -> Result<SessionView, TetherError> {
        self.require_session(session_id).await?;
        self.registry.destroy(session_id).await?;
        self.get_status(session_id).await
    }

    pub async fn get_status(&self, session_id: &SessionId) -> Result<SessionView, TetherError> {
        self.registry.status(session_id).await.map(SessionView::from)
    }

    /// Sessions of one owner, or all of them, with reconciled statuses.
    pub async fn list_sessions(
        &self,
        owner_id: Option<&str>,
    ) -> Result<Vec<SessionView>, TetherError> {
        let records = self.sessions.list_sessions(None).await?;
        let mut views = Vec::with_capacity(records.len());
        for record in records {
            if owner_id.is_some_and(|owner| owner != record.owner_id) {
                continue;
            }
            match self.registry.status(&record.id).await {
                Ok(record) => views.push(record.into()),
                // deleted between the list and the read
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(views)
    }

    /// Current QR code of the session.
    ///
    /// With `wait`, a session still `INITIALIZING` is given up to `timeout`
    /// (default 30s, capped at 60s) to produce one. `InvalidState` when no
    /// QR code is available.
    pub async fn get_qr(
        &self,
        session_id: &SessionId,
        format: QrFormat,
        wait: bool,
        timeout: Option<Duration>,
    ) -> Result<QrImage, TetherError> {
        let mut record = self.registry.status(session_id).await?;

        if wait {
            let limit = timeout.unwrap_or(DEFAULT_QR_WAIT).min(MAX_QR_WAIT);
            let deadline = Instant::now() + limit;
            while record.qr_payload.is_none()
                && record.status == SessionStatus::Initializing
                && self.registry.get(session_id).is_some()
            {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                record = self.registry.wait_for_change(session_id, remaining).await?;
            }
        }

        let Some(payload) = record.qr_payload.as_deref() else {
            return Err(TetherError::InvalidState {
                operation: "fetch a QR code",
                status: record.status,
            });
        };
        Ok(QrImage {
            content: qr::render(payload, format)?,
            session_id: record.id.clone(),
            status: record.status,
            format,
        })
    }

    /// Requests a phone-linking code as an alternative to scanning.
    pub async fn request_pairing_code(
        &self,
        session_id: &SessionId,
        phone: &str,
        method: PairingMethod,
    ) -> Result<String, TetherError> {
        self.registry
            .request_pairing_code(session_id, phone, method)
            .await
    }

    pub(crate) async fn require_session(
        &self,
        session_id: &SessionId,
    ) -> Result<SessionRecord, TetherError> {
        self.sessions
            .load_session(session_id)
            .await?
            .ok_or_else(|| TetherError::session_not_found(session_id))
    }
}
