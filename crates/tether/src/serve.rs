// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tether serve` command implementation.
//!
//! Opens storage, wires the event bus, the session registry, and the webhook
//! delivery engine together, restores sessions from the previous run, and
//! blocks until a shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tether_bus::EventBus;
use tether_config::model::TetherConfig;
use tether_core::{DeliveryLog, SessionStore, TetherError, WebhookStore};
use tether_driver::DriverFactory;
use tether_session::{RegistryConfig, SessionRegistry};
use tether_storage::SqliteStore;
use tether_webhook::{DeliverySettings, WebhookEngine};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::shutdown;

/// Time in-flight webhook attempts get to finish after the signal.
const WEBHOOK_GRACE: Duration = Duration::from_secs(5);

/// Runs the `tether serve` command until SIGINT or SIGTERM.
pub async fn run_serve(config: TetherConfig) -> Result<(), TetherError> {
    init_tracing(&config.daemon.log_level);

    info!("starting tether serve");

    let factory = DriverFactory::from_config(&config.driver)?;

    let store = Arc::new(SqliteStore::open(&config.storage).await?);
    let sessions: Arc<dyn SessionStore> = store.clone();
    let webhooks: Arc<dyn WebhookStore> = store.clone();
    let deliveries: Arc<dyn DeliveryLog> = store.clone();

    let bus = EventBus::new(config.bus.capacity);

    let registry = SessionRegistry::new(
        sessions,
        bus.clone(),
        Arc::new(factory),
        RegistryConfig::from_config(&config.session),
    );

    let engine = WebhookEngine::new(
        webhooks,
        deliveries,
        DeliverySettings::from_config(&config.webhook),
    )?;
    let engine_cancel = CancellationToken::new();
    let engine_task = {
        let engine = engine.clone();
        let subscriber = bus.subscribe_lossless();
        let cancel = engine_cancel.clone();
        tokio::spawn(async move { engine.run(subscriber, cancel).await })
    };

    if config.session.restore_on_start {
        let summary = registry.restore_all().await;
        for (session_id, reason) in &summary.failed {
            warn!(%session_id, %reason, "session not restored");
        }
    }

    let cancel = shutdown::install_signal_handler();
    info!(live = registry.live_count(), "tether ready");
    cancel.cancelled().await;

    let report = registry.shutdown(config.session.shutdown_timeout()).await;
    if report.is_clean() {
        info!(closed = report.closed.len(), "all sessions closed");
    } else {
        warn!(
            closed = report.closed.len(),
            failed = report.failed.len(),
            timed_out = report.timed_out.len(),
            "some sessions did not close cleanly"
        );
    }

    engine_cancel.cancel();
    if let Err(e) = engine_task.await {
        error!(error = %e, "webhook engine task panicked");
    }
    if !engine.shutdown(WEBHOOK_GRACE).await {
        warn!("webhook deliveries abandoned at shutdown");
    }

    if let Err(e) = store.close().await {
        warn!(error = %e, "failed to checkpoint database on shutdown");
    }

    info!("tether stopped");
    Ok(())
}

/// Initializes the tracing subscriber. `RUST_LOG` wins over the config level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tether={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
