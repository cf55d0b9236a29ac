// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session registry.
//!
//! Owns the map from session id to at most one live Connection Object. The
//! map is the only state shared between sessions; only the registry (and a
//! supervisor removing its own entry) mutates it, always under a short
//! synchronous lock that is never held across an await.
//!
//! Creation inserts a [`Slot::Creating`] placeholder before the first
//! suspension point, so a concurrent `create` for the same id fails with
//! `Conflict` even while the Connection Object is still being built. A
//! failed session keeps its key as [`Slot::Reclaiming`] until its old
//! Connection Object is destroyed and its credentials are wiped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tether_bus::EventBus;
use tether_config::model::SessionConfig;
use tether_core::{
    Connection, ConnectionFactory, ConnectionSpec, EventSink, PairingMethod, SessionId,
    SessionPolicy, SessionRecord, SessionStatus, SessionStore, StatusUpdate, TetherError,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::machine::{Effect, Input, SessionMachine, SessionState};
use crate::pairing::{format_pairing_code, normalize_phone};
use crate::supervisor::{Control, Supervisor};

const CONTROL_BUFFER: usize = 8;

/// Registry limits, usually derived from `[session]` config.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Root of per-session credential directories.
    pub auth_dir: PathBuf,
    pub auth_timeout: Duration,
    pub qr_max_retries: u32,
    /// Bound on each logout/destroy call made during an explicit destroy.
    pub teardown_timeout: Duration,
    pub event_buffer: usize,
}

impl RegistryConfig {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            auth_dir: PathBuf::from(&config.auth_dir),
            auth_timeout: config.auth_timeout(),
            qr_max_retries: config.qr_max_retries,
            teardown_timeout: config.teardown_timeout(),
            event_buffer: config.event_buffer,
        }
    }
}

/// What happened to each live session during [`SessionRegistry::shutdown`].
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub closed: Vec<SessionId>,
    pub failed: Vec<(SessionId, String)>,
    pub timed_out: Vec<SessionId>,
}

impl ShutdownReport {
    pub fn total(&self) -> usize {
        self.closed.len() + self.failed.len() + self.timed_out.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

/// Outcome of [`SessionRegistry::restore_all`].
#[derive(Debug, Clone, Default)]
pub struct RestoreSummary {
    pub restored: Vec<SessionId>,
    pub failed: Vec<(SessionId, String)>,
    /// Pre-auth records rewritten as `FAILED`.
    pub marked_stale: usize,
}

/// A cheap view of one live session.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    owner_id: String,
    connection: Arc<dyn Connection>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn status(&self) -> SessionStatus {
        self.state.borrow().status
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .field("owner_id", &self.owner_id)
            .field("status", &self.status())
            .finish()
    }
}

pub(crate) enum Slot {
    Creating {
        instance: u64,
        cancelled: bool,
    },
    Live(Arc<LiveSession>),
    /// Cancelled once the old Connection Object is fully reclaimed.
    Reclaiming {
        instance: u64,
        done: CancellationToken,
    },
}

pub(crate) struct LiveSession {
    instance: u64,
    owner_id: String,
    policy: SessionPolicy,
    connection: Arc<dyn Connection>,
    state: watch::Receiver<SessionState>,
    control: mpsc::Sender<Control>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveSession {
    fn handle(&self, session_id: &SessionId) -> SessionHandle {
        SessionHandle {
            session_id: session_id.clone(),
            owner_id: self.owner_id.clone(),
            connection: Arc::clone(&self.connection),
            state: self.state.clone(),
        }
    }

    /// Cancels the supervisor and waits up to `limit` for it to exit.
    async fn stop(&self, limit: Duration) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut task) = task
            && tokio::time::timeout(limit, &mut task).await.is_err()
        {
            warn!("session supervisor did not stop in time; aborting it");
            task.abort();
        }
    }
}

/// How thoroughly to reclaim a Connection Object.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Teardown {
    pub(crate) logout: bool,
    pub(crate) wipe_credentials: bool,
}

/// State shared between the registry and its supervisors.
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) bus: EventBus,
    pub(crate) config: RegistryConfig,
    factory: Arc<dyn ConnectionFactory>,
    slots: Mutex<HashMap<SessionId, Slot>>,
    next_instance: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn slots(&self) -> MutexGuard<'_, HashMap<SessionId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live(&self, session_id: &SessionId) -> Option<Arc<LiveSession>> {
        match self.slots().get(session_id) {
            Some(Slot::Live(live)) => Some(Arc::clone(live)),
            _ => None,
        }
    }

    fn credentials_dir(&self, session_id: &SessionId) -> PathBuf {
        self.config.auth_dir.join(format!("session-{session_id}"))
    }

    /// Turns the live entry of `session_id` into a reclaiming one if it still
    /// belongs to `instance`. False when someone else already took it.
    pub(crate) fn begin_reclaim(&self, session_id: &SessionId, instance: u64) -> bool {
        let mut slots = self.slots();
        if !matches!(slots.get(session_id), Some(Slot::Live(live)) if live.instance == instance) {
            return false;
        }
        slots.insert(
            session_id.clone(),
            Slot::Reclaiming {
                instance,
                done: CancellationToken::new(),
            },
        );
        debug!(%session_id, instance, "session left the live map");
        true
    }

    /// Frees the key held by [`Shared::begin_reclaim`] and wakes anyone waiting on it.
    pub(crate) fn finish_reclaim(&self, session_id: &SessionId, instance: u64) {
        let mut slots = self.slots();
        if !matches!(slots.get(session_id), Some(Slot::Reclaiming { instance: i, .. }) if *i == instance)
        {
            return;
        }
        if let Some(Slot::Reclaiming { done, .. }) = slots.remove(session_id) {
            done.cancel();
        }
        debug!(%session_id, instance, "failed session reclaimed");
    }

    /// Writes a status update. Failures are logged, never surfaced.
    pub(crate) async fn persist(&self, session_id: &SessionId, update: &StatusUpdate) {
        match self.store.save_session_status(session_id, update).await {
            Ok(()) => debug!(%session_id, status = %update.status, "session status persisted"),
            Err(e) if e.is_not_found() => {
                debug!(%session_id, "session record gone; status not persisted");
            }
            Err(e) => {
                warn!(%session_id, status = %update.status, error = %e, "failed to persist session status");
            }
        }
    }

    async fn commit(&self, session_id: &SessionId, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Persist(update) => self.persist(session_id, &update).await,
                Effect::Publish(event) => {
                    self.bus.publish(event);
                }
                Effect::ArmAuthTimer | Effect::DisarmAuthTimer | Effect::Teardown(_) => {}
            }
        }
    }

    /// Reclaims a Connection Object. Every step runs even if an earlier one failed.
    pub(crate) async fn dispose(
        &self,
        session_id: &SessionId,
        connection: &dyn Connection,
        teardown: Teardown,
    ) {
        let limit = self.config.teardown_timeout;
        if teardown.logout {
            match tokio::time::timeout(limit, connection.logout()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(%session_id, error = %e, "logout failed; continuing teardown"),
                Err(_) => warn!(%session_id, ?limit, "logout timed out; continuing teardown"),
            }
        }
        match tokio::time::timeout(limit, connection.destroy()).await {
            Ok(Ok(())) => debug!(%session_id, "connection destroyed"),
            Ok(Err(e)) => warn!(%session_id, error = %e, "connection destroy failed"),
            Err(_) => warn!(%session_id, ?limit, "connection destroy timed out"),
        }
        if teardown.wipe_credentials {
            self.wipe_credentials(session_id).await;
        }
    }

    async fn wipe_credentials(&self, session_id: &SessionId) {
        let dir = self.credentials_dir(session_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(%session_id, dir = %dir.display(), "credentials removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(%session_id, dir = %dir.display(), error = %e, "failed to remove credentials");
            }
        }
    }
}

/// Supervises one Connection Object per session.
#[derive(Clone)]
pub struct SessionRegistry {
    shared: Arc<Shared>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn SessionStore>,
        bus: EventBus,
        factory: Arc<dyn ConnectionFactory>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                bus,
                config,
                factory,
                slots: Mutex::new(HashMap::new()),
                next_instance: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Builds a Connection Object for `session_id` and starts supervising it.
    ///
    /// Returns once the object exists; initialization and authentication
    /// continue in the background. Fails with `Conflict` if the session is
    /// already live, being created, or still being reclaimed after a failure.
    pub async fn create(
        &self,
        session_id: SessionId,
        owner_id: &str,
        policy: SessionPolicy,
    ) -> Result<SessionHandle, TetherError> {
        validate_session_id(&session_id)?;
        let shared = &self.shared;

        let instance = shared.next_instance.fetch_add(1, Ordering::Relaxed);
        {
            // checked under the slots lock so shutdown's drain cannot miss the insert
            let mut slots = shared.slots();
            if shared.closed.load(Ordering::Acquire) {
                return Err(shutting_down());
            }
            if slots.contains_key(&session_id) {
                return Err(TetherError::Conflict(format!(
                    "session {session_id} is already live or being torn down"
                )));
            }
            slots.insert(
                session_id.clone(),
                Slot::Creating {
                    instance,
                    cancelled: false,
                },
            );
        }

        let (event_tx, events) = mpsc::channel(shared.config.event_buffer.max(1));
        let spec = ConnectionSpec {
            session_id: session_id.clone(),
            auth_dir: shared.credentials_dir(&session_id),
            policy: policy.clone(),
        };
        let connection = match shared.factory.connect(spec, EventSink::new(event_tx)).await {
            Ok(connection) => connection,
            Err(e) => {
                let mut slots = shared.slots();
                if matches!(slots.get(&session_id), Some(Slot::Creating { instance: i, .. }) if *i == instance)
                {
                    slots.remove(&session_id);
                }
                warn!(%session_id, error = %e, "failed to build connection");
                return Err(e);
            }
        };

        let (control_tx, control) = mpsc::channel(CONTROL_BUFFER);
        let cancel = CancellationToken::new();
        let machine = SessionMachine::new(
            session_id.clone(),
            policy.clone(),
            shared.config.qr_max_retries,
        );
        let (state_tx, state) = watch::channel(machine.state().clone());

        let registered = {
            let mut slots = shared.slots();
            let closed = shared.closed.load(Ordering::Acquire);
            match slots.get(&session_id) {
                Some(Slot::Creating {
                    instance: i,
                    cancelled: false,
                }) if *i == instance && !closed => {
                    let supervisor = Supervisor {
                        session_id: session_id.clone(),
                        instance,
                        machine,
                        connection: Arc::clone(&connection),
                        events,
                        control,
                        cancel: cancel.clone(),
                        state_tx,
                        shared: Arc::clone(shared),
                    };
                    let task = tokio::spawn(supervisor.run());
                    let live = Arc::new(LiveSession {
                        instance,
                        owner_id: owner_id.to_string(),
                        policy,
                        connection: Arc::clone(&connection),
                        state,
                        control: control_tx,
                        cancel,
                        task: Mutex::new(Some(task)),
                    });
                    slots.insert(session_id.clone(), Slot::Live(Arc::clone(&live)));
                    Some(live)
                }
                Some(Slot::Creating { instance: i, .. }) if *i == instance => {
                    slots.remove(&session_id);
                    None
                }
                _ => None,
            }
        };

        let Some(live) = registered else {
            let closed = shared.closed.load(Ordering::Acquire);
            if closed {
                info!(%session_id, "registry shut down while session was being created");
            } else {
                info!(%session_id, "session was destroyed while being created");
            }
            shared
                .dispose(
                    &session_id,
                    connection.as_ref(),
                    Teardown {
                        logout: false,
                        wipe_credentials: !closed,
                    },
                )
                .await;
            if closed {
                return Err(shutting_down());
            }
            return Err(TetherError::Conflict(format!(
                "session {session_id} was destroyed during creation"
            )));
        };

        info!(%session_id, owner_id, instance, "session created");
        Ok(live.handle(&session_id))
    }

    /// Logs out and tears down `session_id`, wipes its credentials, and records `LOGGED_OUT`.
    ///
    /// Idempotent. Teardown failures are logged and never stop the remaining
    /// steps. Only a storage read failure is returned. A session still being
    /// reclaimed after a failure is waited for first.
    pub async fn destroy(&self, session_id: &SessionId) -> Result<(), TetherError> {
        let shared = &self.shared;
        let (removed, reclaiming) = {
            let mut slots = shared.slots();
            if let Some(Slot::Creating { cancelled, .. }) = slots.get_mut(session_id) {
                *cancelled = true;
                (None, None)
            } else if let Some(Slot::Reclaiming { done, .. }) = slots.get(session_id) {
                (None, Some(done.clone()))
            } else {
                match slots.remove(session_id) {
                    Some(Slot::Live(live)) => (Some(live), None),
                    _ => (None, None),
                }
            }
        };
        if let Some(done) = reclaiming {
            debug!(%session_id, "waiting for failed session to be reclaimed");
            done.cancelled().await;
        }

        let known = match removed {
            Some(live) => {
                live.stop(shared.config.teardown_timeout).await;
                let state = live.state.borrow().clone();
                shared
                    .dispose(
                        session_id,
                        live.connection.as_ref(),
                        Teardown {
                            logout: true,
                            wipe_credentials: true,
                        },
                    )
                    .await;
                Some((live.policy.clone(), state))
            }
            None => {
                shared.wipe_credentials(session_id).await;
                shared
                    .store
                    .load_session(session_id)
                    .await?
                    .map(|record| (record.policy.clone(), SessionState::from_record(&record)))
            }
        };

        let Some((policy, state)) = known else {
            debug!(%session_id, "destroy of unknown session is a no-op");
            return Ok(());
        };

        let mut machine = SessionMachine::resume(
            session_id.clone(),
            policy,
            shared.config.qr_max_retries,
            state,
        );
        shared
            .commit(session_id, machine.apply(Input::LogoutRequested))
            .await;
        info!(%session_id, "session destroyed");
        Ok(())
    }

    /// Destroys the session and creates a fresh Connection Object from its durable record.
    pub async fn restart(&self, session_id: &SessionId) -> Result<SessionHandle, TetherError> {
        let record = self
            .shared
            .store
            .load_session(session_id)
            .await?
            .ok_or_else(|| TetherError::session_not_found(session_id))?;
        self.destroy(session_id).await?;
        self.create(session_id.clone(), &record.owner_id, record.policy)
            .await
    }

    pub fn get(&self, session_id: &SessionId) -> Option<SessionHandle> {
        self.shared
            .live(session_id)
            .map(|live| live.handle(session_id))
    }

    pub fn live_count(&self) -> usize {
        self.shared
            .slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }

    /// The session's durable record overlaid with its live state.
    ///
    /// A record claiming a pre-auth status with nothing supervising it is
    /// stale: it is reported as `FAILED` and corrected in the background.
    pub async fn status(&self, session_id: &SessionId) -> Result<SessionRecord, TetherError> {
        let shared = &self.shared;
        let mut record = shared
            .store
            .load_session(session_id)
            .await?
            .ok_or_else(|| TetherError::session_not_found(session_id))?;

        let (live, creating) = {
            let slots = shared.slots();
            match slots.get(session_id) {
                Some(Slot::Live(live)) => (Some(Arc::clone(live)), false),
                Some(Slot::Creating { .. }) => (None, true),
                Some(Slot::Reclaiming { .. }) | None => (None, false),
            }
        };

        if let Some(live) = live {
            let update = live.state.borrow().to_update();
            record.apply(&update);
        } else if !creating && record.status.is_pre_auth() {
            let update = StatusUpdate::stale_from(&record);
            debug!(%session_id, stored = %record.status, "reporting stale session as failed");
            let store = Arc::clone(&shared.store);
            let id = session_id.clone();
            let correction = update.clone();
            tokio::spawn(async move {
                if let Err(e) = store.save_session_status(&id, &correction).await {
                    warn!(session_id = %id, error = %e, "failed to correct stale session status");
                }
            });
            record.apply(&update);
        }
        Ok(record)
    }

    /// Waits up to `limit` for the live session's state to change, then reports its status.
    ///
    /// Sessions that are not live return their status immediately.
    pub async fn wait_for_change(
        &self,
        session_id: &SessionId,
        limit: Duration,
    ) -> Result<SessionRecord, TetherError> {
        if let Some(live) = self.shared.live(session_id) {
            let mut state = live.state.clone();
            state.borrow_and_update();
            // a closed channel means the supervisor is gone; report what is stored
            let _ = tokio::time::timeout(limit, state.changed()).await;
        }
        self.status(session_id).await
    }

    /// Requests a phone-linking code. Valid only in `INITIALIZING` or `QR_READY`.
    ///
    /// Returns the code grouped for readability. Status is unchanged.
    pub async fn request_pairing_code(
        &self,
        session_id: &SessionId,
        phone: &str,
        method: PairingMethod,
    ) -> Result<String, TetherError> {
        const OPERATION: &str = "request a pairing code";

        let Some(live) = self.shared.live(session_id) else {
            let record = self.status(session_id).await?;
            return Err(TetherError::InvalidState {
                operation: OPERATION,
                status: record.status,
            });
        };

        let status = live.state.borrow().status;
        if !status.accepts_pairing_code() {
            return Err(TetherError::InvalidState {
                operation: OPERATION,
                status,
            });
        }

        let phone = normalize_phone(phone)?;
        let raw = live.connection.request_pairing_code(&phone, method).await?;
        let code = format_pairing_code(&raw);
        if live
            .control
            .send(Control::PairingCode(code.clone()))
            .await
            .is_err()
        {
            debug!(%session_id, "supervisor gone before pairing code was recorded");
        }
        info!(%session_id, %method, "pairing code issued");
        Ok(code)
    }

    /// Re-creates every session whose durable status implies it should be live.
    ///
    /// Pre-auth records left behind by a previous process are marked `FAILED`
    /// first. Individual failures are logged and skipped.
    pub async fn restore_all(&self) -> RestoreSummary {
        let store = &self.shared.store;
        let mut summary = RestoreSummary::default();

        for status in [
            SessionStatus::Initializing,
            SessionStatus::QrReady,
            SessionStatus::Authenticating,
        ] {
            let records = match store.list_sessions(Some(status)).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(%status, error = %e, "failed to list stale sessions");
                    continue;
                }
            };
            for record in records {
                if self.shared.slots().contains_key(&record.id) {
                    continue;
                }
                match store
                    .save_session_status(&record.id, &StatusUpdate::stale_from(&record))
                    .await
                {
                    Ok(()) => summary.marked_stale += 1,
                    Err(e) => {
                        warn!(session_id = %record.id, error = %e, "failed to mark stale session");
                    }
                }
            }
        }

        let records = match store.list_sessions_to_restore().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "failed to list sessions to restore");
                return summary;
            }
        };

        for record in records {
            match self
                .create(record.id.clone(), &record.owner_id, record.policy.clone())
                .await
            {
                Ok(_) => summary.restored.push(record.id),
                Err(e) => {
                    warn!(session_id = %record.id, error = %e, "failed to restore session");
                    summary.failed.push((record.id, e.to_string()));
                }
            }
        }

        info!(
            restored = summary.restored.len(),
            failed = summary.failed.len(),
            marked_stale = summary.marked_stale,
            "session restore complete"
        );
        summary
    }

    /// Tears down every live session concurrently, each bounded by `per_session`.
    ///
    /// Always completes and always leaves the map empty. Durable statuses are
    /// left untouched so the sessions restore on the next start.
    pub async fn shutdown(&self, per_session: Duration) -> ShutdownReport {
        self.shared.closed.store(true, Ordering::Release);
        let drained: Vec<(SessionId, Slot)> = self.shared.slots().drain().collect();

        let live: Vec<(SessionId, Arc<LiveSession>)> = drained
            .into_iter()
            .filter_map(|(session_id, slot)| match slot {
                Slot::Live(live) => Some((session_id, live)),
                Slot::Creating { .. } => {
                    debug!(%session_id, "abandoning in-flight creation");
                    None
                }
                Slot::Reclaiming { done, .. } => {
                    debug!(%session_id, "leaving failed session to finish reclaiming");
                    done.cancel();
                    None
                }
            })
            .collect();

        info!(count = live.len(), ?per_session, "shutting down live sessions");

        let outcomes = join_all(live.into_iter().map(|(session_id, live)| async move {
            let outcome = tokio::time::timeout(per_session, async {
                live.stop(per_session).await;
                live.connection.destroy().await
            })
            .await;
            (session_id, outcome)
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (session_id, outcome) in outcomes {
            match outcome {
                Ok(Ok(())) => report.closed.push(session_id),
                Ok(Err(e)) => {
                    warn!(%session_id, error = %e, "session teardown failed");
                    report.failed.push((session_id, e.to_string()));
                }
                Err(_) => {
                    warn!(%session_id, ?per_session, "session teardown timed out");
                    report.timed_out.push(session_id);
                }
            }
        }

        info!(
            closed = report.closed.len(),
            failed = report.failed.len(),
            timed_out = report.timed_out.len(),
            "session shutdown complete"
        );
        report
    }
}

fn shutting_down() -> TetherError {
    TetherError::Internal("session registry is shutting down".to_string())
}

/// Session ids become directory names, so path syntax is rejected.
pub fn validate_session_id(session_id: &SessionId) -> Result<(), TetherError> {
    let id = session_id.as_str();
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !id.contains("..");
    if valid {
        Ok(())
    } else {
        Err(TetherError::InvalidArgument(format!(
            "invalid session id `{id}`"
        )))
    }
}
