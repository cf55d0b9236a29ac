// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fan-out from the event bus to subscriber lanes.
//!
//! Each webhook gets its own lane: an unbounded queue drained by one task.
//! Deliveries to one subscriber therefore happen in event order, while a slow
//! or failing subscriber never holds up the others or the bus consumer. A lane
//! never drops work; its depth is tracked and logged as it grows. Idle lanes
//! exit and are recreated on the next matching event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tether_bus::BusSubscriber;
use tether_core::{
    DeliveryAttempt, DeliveryLog, DomainEvent, TetherError, Webhook, WebhookId, WebhookStore,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::delivery::{Deliverer, DeliverySettings};
use crate::payload;

const LANE_IDLE: Duration = Duration::from_secs(30);

struct Job {
    webhook: Webhook,
    event: Arc<DomainEvent>,
}

/// Sending half of a lane plus the number of jobs waiting in it.
struct Lane {
    tx: mpsc::UnboundedSender<Job>,
    depth: Arc<AtomicUsize>,
}

impl Lane {
    fn new(tx: mpsc::UnboundedSender<Job>) -> Self {
        Self {
            tx,
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queues `job`, handing it back if the lane task is gone.
    fn push(&self, job: Job, warn_every: usize) -> Result<(), Job> {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        let webhook_id = job.webhook.id.clone();
        if let Err(mpsc::error::SendError(job)) = self.tx.send(job) {
            return Err(job);
        }
        if depth % warn_every.max(1) == 0 {
            warn!(%webhook_id, depth, "webhook lane backlog growing");
        }
        Ok(())
    }
}

struct Inner {
    store: Arc<dyn WebhookStore>,
    deliverer: Deliverer,
    lanes: Mutex<HashMap<WebhookId, Lane>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Inner {
    fn lanes(&self) -> MutexGuard<'_, HashMap<WebhookId, Lane>> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Webhook delivery engine. Clones share lanes and state.
#[derive(Clone)]
pub struct WebhookEngine {
    inner: Arc<Inner>,
}

impl WebhookEngine {
    pub fn new(
        store: Arc<dyn WebhookStore>,
        log: Arc<dyn DeliveryLog>,
        settings: DeliverySettings,
    ) -> Result<Self, TetherError> {
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                deliverer: Deliverer::new(log, settings)?,
                lanes: Mutex::new(HashMap::new()),
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
            }),
        })
    }

    /// Queues `event` for every active webhook of its session subscribed to
    /// its category. Returns the number of subscribers matched.
    ///
    /// Delivery happens in the background; nothing is reported to the
    /// publisher.
    pub async fn dispatch(&self, event: Arc<DomainEvent>) -> usize {
        if self.inner.cancel.is_cancelled() {
            return 0;
        }
        let subscribers = match self
            .inner
            .store
            .list_active_subscribers(&event.session_id, event.category)
            .await
        {
            Ok(hooks) => hooks,
            Err(e) => {
                warn!(
                    session_id = %event.session_id,
                    category = %event.category,
                    error = %e,
                    "failed to resolve webhook subscribers"
                );
                return 0;
            }
        };

        let matched = subscribers.len();
        for webhook in subscribers {
            self.enqueue(Job {
                webhook,
                event: Arc::clone(&event),
            });
        }
        if matched > 0 {
            debug!(
                session_id = %event.session_id,
                category = %event.category,
                subscribers = matched,
                "event dispatched"
            );
        }
        matched
    }

    fn enqueue(&self, job: Job) {
        let warn_every = self.inner.deliverer.settings().lane_backlog_warn;
        let mut lanes = self.inner.lanes();
        let id = job.webhook.id.clone();
        let job = match lanes.get(&id) {
            Some(lane) => match lane.push(job, warn_every) {
                Ok(()) => return,
                // Lane task is gone without deregistering; replace it.
                Err(job) => job,
            },
            None => job,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let lane = Lane::new(tx);
        let depth = Arc::clone(&lane.depth);
        // rx is alive, so this cannot fail.
        let _ = lane.push(job, warn_every);
        lanes.insert(id.clone(), lane);
        self.inner
            .tracker
            .spawn(run_lane(Arc::clone(&self.inner), id, rx, depth));
    }

    /// Sends one synthetic `webhook.test` event, bypassing the retry loop and
    /// the category filter. The attempt is recorded like any other.
    pub async fn test(&self, webhook_id: &WebhookId) -> Result<DeliveryAttempt, TetherError> {
        let webhook = self
            .inner
            .store
            .get_webhook(webhook_id)
            .await?
            .ok_or_else(|| TetherError::webhook_not_found(webhook_id))?;
        let event = payload::test_event(&webhook);
        let attempt = self.inner.deliverer.deliver_once(&webhook, &event, 1).await;
        self.inner.deliverer.record(&attempt).await;
        info!(
            webhook_id = %webhook.id,
            success = attempt.success,
            status_code = ?attempt.status_code,
            "webhook test delivery"
        );
        Ok(attempt)
    }

    /// Consumes the bus until `cancel` fires or the bus closes.
    ///
    /// Pass a [`tether_bus::EventBus::subscribe_lossless`] cursor; a ring cursor
    /// skips events whenever dispatch falls behind the publishers.
    pub async fn run(&self, mut subscriber: BusSubscriber, cancel: CancellationToken) {
        info!("webhook engine started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = subscriber.recv() => match event {
                    Some(event) => {
                        self.dispatch(event).await;
                    }
                    None => break,
                },
            }
        }
        info!("webhook engine stopped consuming events");
    }

    /// Number of lanes currently running.
    pub fn active_lanes(&self) -> usize {
        self.inner.lanes().len()
    }

    /// Deliveries waiting behind the one in flight for `webhook_id`.
    pub fn queued(&self, webhook_id: &WebhookId) -> usize {
        self.inner
            .lanes()
            .get(webhook_id)
            .map_or(0, |lane| lane.depth.load(Ordering::Relaxed))
    }

    /// Stops accepting work, interrupts pending retry waits, and waits up to
    /// `grace` for in-flight attempts to finish.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        let drained = tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(
                lanes = self.inner.tracker.len(),
                "webhook lanes still running after shutdown grace"
            );
        }
        drained
    }
}

async fn run_lane(
    inner: Arc<Inner>,
    webhook_id: WebhookId,
    mut rx: mpsc::UnboundedReceiver<Job>,
    depth: Arc<AtomicUsize>,
) {
    debug!(%webhook_id, "webhook lane started");
    loop {
        let job = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            next = tokio::time::timeout(LANE_IDLE, rx.recv()) => match next {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(_) => {
                    // Senders only push while holding the map lock, so an
                    // empty queue here means no job can be lost.
                    let mut lanes = inner.lanes();
                    if rx.is_empty() {
                        lanes.remove(&webhook_id);
                        break;
                    }
                    continue;
                }
            },
        };
        depth.fetch_sub(1, Ordering::Relaxed);
        let _report = inner
            .deliverer
            .deliver_with_retry(&job.webhook, &job.event, &inner.cancel)
            .await;
    }
    debug!(%webhook_id, "webhook lane stopped");
}
