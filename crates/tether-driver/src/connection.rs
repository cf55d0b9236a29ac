// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Child-process Connection Object.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tether_config::model::DriverConfig;
use tether_core::{
    Connection, ConnectionEvent, ConnectionFactory, ConnectionSpec, DisconnectReason, EventSink,
    PairingMethod, SessionId, TetherError,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::{self, Inbound, Op, Response};

const DESTROY_GRACE: Duration = Duration::from_secs(5);

type Pending = DashMap<u64, oneshot::Sender<Response>>;

/// Spawns one automation process per session.
#[derive(Debug, Clone)]
pub struct DriverFactory {
    command: String,
    args: Vec<String>,
    request_timeout: Duration,
}

impl DriverFactory {
    pub fn new(command: impl Into<String>, args: Vec<String>, request_timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            request_timeout,
        }
    }

    /// Fails when no driver command is configured.
    pub fn from_config(config: &DriverConfig) -> Result<Self, TetherError> {
        let command = config.command.clone().ok_or_else(|| {
            TetherError::Config("driver.command must be set to start sessions".to_string())
        })?;
        Ok(Self::new(command, config.args.clone(), config.request_timeout()))
    }
}

#[async_trait]
impl ConnectionFactory for DriverFactory {
    async fn connect(
        &self,
        spec: ConnectionSpec,
        events: EventSink,
    ) -> Result<Arc<dyn Connection>, TetherError> {
        tokio::fs::create_dir_all(&spec.auth_dir)
            .await
            .map_err(|e| TetherError::Connection {
                message: format!(
                    "failed to create credentials directory {}: {e}",
                    spec.auth_dir.display()
                ),
                source: Some(Box::new(e)),
            })?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .arg("--session")
            .arg(spec.session_id.as_str())
            .arg("--auth-dir")
            .arg(&spec.auth_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TetherError::Connection {
                message: format!("failed to spawn driver `{}`: {e}", self.command),
                source: Some(Box::new(e)),
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(TetherError::connection("driver stdio was not captured"));
        };
        debug!(
            session_id = %spec.session_id,
            pid = child.id(),
            command = %self.command,
            "driver process spawned"
        );

        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let closing = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_stdout(
            spec.session_id.clone(),
            stdout,
            Arc::clone(&pending),
            events,
            Arc::clone(&closing),
        ));
        let logger = tokio::spawn(log_stderr(spec.session_id.clone(), stderr));

        Ok(Arc::new(DriverConnection {
            spec,
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            pending,
            next_id: AtomicU64::new(1),
            closing,
            tasks: std::sync::Mutex::new(vec![reader, logger]),
            request_timeout: self.request_timeout,
        }))
    }
}

/// Connection Object driving one automation process over JSON lines.
pub struct DriverConnection {
    spec: ConnectionSpec,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    pending: Arc<Pending>,
    next_id: AtomicU64,
    closing: Arc<AtomicBool>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    request_timeout: Duration,
}

impl DriverConnection {
    async fn request(&self, op: Op<'_>, limit: Duration) -> Result<Value, TetherError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = op.name();
        let line = protocol::encode(id, op).map_err(|e| TetherError::Connection {
            message: format!("failed to encode `{name}` request: {e}"),
            source: Some(Box::new(e)),
        })?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.as_mut() {
                Some(stdin) => match stdin.write_all(&line).await {
                    Ok(()) => stdin.flush().await,
                    Err(e) => Err(e),
                },
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "driver stdin closed",
                )),
            }
        };
        if let Err(e) = written {
            self.pending.remove(&id);
            return Err(TetherError::Connection {
                message: format!("failed to send `{name}` to driver: {e}"),
                source: Some(Box::new(e)),
            });
        }

        match tokio::time::timeout(limit, rx).await {
            Ok(Ok(response)) if response.ok => Ok(response.result),
            Ok(Ok(response)) => Err(TetherError::connection(
                response
                    .error
                    .unwrap_or_else(|| format!("driver rejected `{name}`")),
            )),
            Ok(Err(_)) => Err(TetherError::connection(format!(
                "driver exited before answering `{name}`"
            ))),
            Err(_) => {
                self.pending.remove(&id);
                Err(TetherError::Timeout { duration: limit })
            }
        }
    }

    fn session_id(&self) -> &SessionId {
        &self.spec.session_id
    }
}

#[async_trait]
impl Connection for DriverConnection {
    async fn initialize(&self) -> Result<(), TetherError> {
        let policy = &self.spec.policy;
        self.request(
            Op::Initialize {
                sync_full_history: policy.sync_full_history,
                proxy: policy.proxy.as_deref(),
            },
            self.request_timeout,
        )
        .await?;
        Ok(())
    }

    async fn request_pairing_code(
        &self,
        phone: &str,
        method: PairingMethod,
    ) -> Result<String, TetherError> {
        let result = self
            .request(Op::RequestPairingCode { phone, method }, self.request_timeout)
            .await?;
        result
            .get("code")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TetherError::connection("driver returned no pairing code"))
    }

    async fn logout(&self) -> Result<(), TetherError> {
        self.request(Op::Logout, self.request_timeout).await?;
        Ok(())
    }

    /// Asks the driver to shut down, then kills it. Idempotent.
    async fn destroy(&self) -> Result<(), TetherError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let grace = DESTROY_GRACE.min(self.request_timeout);
        if let Err(e) = self.request(Op::Destroy, grace).await {
            debug!(session_id = %self.session_id(), error = %e, "driver did not acknowledge destroy");
        }
        self.stdin.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.start_kill() {
                debug!(session_id = %self.session_id(), error = %e, "driver already exited");
            }
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(session_id = %self.session_id(), %status, "driver process reaped");
                }
                Ok(Err(e)) => {
                    warn!(session_id = %self.session_id(), error = %e, "failed to reap driver process");
                }
                Err(_) => {
                    warn!(session_id = %self.session_id(), "driver process did not exit after kill");
                }
            }
        }

        let tasks = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for task in tasks {
            task.abort();
        }
        self.pending.clear();
        Ok(())
    }
}

async fn read_stdout(
    session_id: SessionId,
    stdout: impl AsyncRead + Unpin,
    pending: Arc<Pending>,
    events: EventSink,
    closing: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(%session_id, error = %e, "failed to read driver output");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match protocol::decode(&line) {
            Ok(Inbound::Response(response)) => match pending.remove(&response.id) {
                Some((_, tx)) => {
                    let _ = tx.send(response);
                }
                None => debug!(%session_id, id = response.id, "response for unknown request"),
            },
            Ok(Inbound::Event(event)) => {
                if !events.emit(event.into()).await {
                    debug!(%session_id, "event sink closed, dropping driver event");
                }
            }
            Err(e) => warn!(%session_id, error = %e, line = %line, "unparseable driver output"),
        }
    }

    // Dropping the senders fails every outstanding request.
    pending.clear();
    if !closing.load(Ordering::SeqCst) {
        warn!(%session_id, "driver process exited unexpectedly");
        let notice = ConnectionEvent::Disconnected {
            reason: DisconnectReason::Remote("driver_exited".to_string()),
        };
        if !events.emit(notice).await {
            debug!(%session_id, "event sink closed, dropping driver exit notice");
        }
    }
}

async fn log_stderr(session_id: SessionId, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(%session_id, "driver: {line}");
    }
}
