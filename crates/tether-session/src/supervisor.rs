// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-session supervisor task.
//!
//! One task per live session. It starts the Connection Object, feeds every
//! connection event, control message, and timer expiry through the
//! [`SessionMachine`], and performs the resulting effects in order. Status
//! transitions for a session are therefore strictly ordered.

use std::ops::ControlFlow;
use std::sync::Arc;

use tether_core::{Connection, ConnectionEvent, FailureReason, SessionId};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::machine::{Effect, Input, SessionMachine, SessionState};
use crate::registry::{Shared, Teardown};

/// Messages from the registry to a running supervisor.
#[derive(Debug)]
pub(crate) enum Control {
    PairingCode(String),
}

pub(crate) struct Supervisor {
    pub(crate) session_id: SessionId,
    pub(crate) instance: u64,
    pub(crate) machine: SessionMachine,
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) events: mpsc::Receiver<ConnectionEvent>,
    pub(crate) control: mpsc::Receiver<Control>,
    pub(crate) cancel: CancellationToken,
    pub(crate) state_tx: watch::Sender<SessionState>,
    pub(crate) shared: Arc<Shared>,
}

impl Supervisor {
    pub(crate) async fn run(mut self) {
        let mut auth_deadline: Option<Instant> = None;

        let effects = self.machine.start();
        if self.perform(effects, &mut auth_deadline).await.is_break() {
            return;
        }

        let connection = Arc::clone(&self.connection);
        let initialize = async move { connection.initialize().await };
        tokio::pin!(initialize);
        let mut initializing = true;
        let mut events_open = true;

        loop {
            let input = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!(session_id = %self.session_id, "supervisor cancelled");
                    return;
                }

                result = &mut initialize, if initializing => {
                    initializing = false;
                    match result {
                        Ok(()) => {
                            debug!(session_id = %self.session_id, "connection initialized");
                            continue;
                        }
                        Err(e) => {
                            warn!(session_id = %self.session_id, error = %e, "connection failed to initialize");
                            Input::InitializeFailed(e.to_string())
                        }
                    }
                }

                Some(control) = self.control.recv() => match control {
                    Control::PairingCode(code) => Input::PairingCodeIssued(code),
                },

                event = self.events.recv(), if events_open => match event {
                    Some(event) => Input::Connection(event),
                    None => {
                        debug!(session_id = %self.session_id, "connection event stream closed");
                        events_open = false;
                        continue;
                    }
                },

                _ = sleep_until(auth_deadline.unwrap_or_else(Instant::now)), if auth_deadline.is_some() => {
                    auth_deadline = None;
                    Input::AuthTimeoutElapsed
                }
            };

            let effects = self.machine.apply(input);
            if self.perform(effects, &mut auth_deadline).await.is_break() {
                return;
            }
        }
    }

    async fn perform(
        &mut self,
        effects: Vec<Effect>,
        auth_deadline: &mut Option<Instant>,
    ) -> ControlFlow<()> {
        for effect in effects {
            match effect {
                Effect::ArmAuthTimer => {
                    *auth_deadline = Some(Instant::now() + self.shared.config.auth_timeout);
                }
                Effect::DisarmAuthTimer => *auth_deadline = None,
                Effect::Persist(update) => {
                    self.shared.persist(&self.session_id, &update).await;
                    let state = self.machine.state().clone();
                    self.state_tx.send_if_modified(|current| {
                        if *current == state {
                            return false;
                        }
                        *current = state;
                        true
                    });
                }
                Effect::Publish(event) => {
                    self.shared.bus.publish(event);
                }
                Effect::Teardown(reason) => {
                    self.teardown(reason).await;
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }

    /// Reclaims the Connection Object after a terminal failure.
    ///
    /// The durable record already says `FAILED` by the time the session leaves
    /// the live map. The key stays reserved until the old Connection Object is
    /// destroyed and its credentials are gone.
    async fn teardown(&self, reason: FailureReason) {
        if self.cancel.is_cancelled() {
            // an explicit destroy owns the teardown
            return;
        }
        if !self.shared.begin_reclaim(&self.session_id, self.instance) {
            debug!(session_id = %self.session_id, "session already taken out of the live map");
            return;
        }
        info!(session_id = %self.session_id, %reason, "reclaiming failed session");
        self.shared
            .dispose(
                &self.session_id,
                self.connection.as_ref(),
                Teardown {
                    logout: false,
                    wipe_credentials: true,
                },
            )
            .await;
        self.shared.finish_reclaim(&self.session_id, self.instance);
    }
}
