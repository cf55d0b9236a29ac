// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process event bus.
//!
//! Session supervisors publish [`DomainEvent`]s; the webhook engine (and any
//! realtime push channel) consumes them. Two kinds of cursor exist:
//!
//! - [`EventBus::subscribe`] reads a bounded broadcast ring. A slow consumer
//!   only loses its own oldest events and never stalls anyone else.
//! - [`EventBus::subscribe_lossless`] owns an unbounded queue. Nothing is
//!   ever dropped; a backlog past the bus capacity is logged instead.
//!
//! Neither kind blocks publishers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tether_core::DomainEvent;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Cloneable publish point for domain events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
    queues: Arc<Mutex<Vec<Queue>>>,
    capacity: usize,
}

/// Sending half of one lossless cursor.
#[derive(Debug)]
struct Queue {
    tx: mpsc::UnboundedSender<Arc<DomainEvent>>,
    depth: Arc<AtomicUsize>,
}

impl Queue {
    /// False once the cursor is gone.
    fn push(&self, event: &Arc<DomainEvent>, warn_every: usize) -> bool {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        if self.tx.send(Arc::clone(event)).is_err() {
            return false;
        }
        if depth % warn_every == 0 {
            warn!(depth, "lossless event bus subscriber is falling behind");
        }
        true
    }
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per ring subscriber.
    ///
    /// Lossless subscribers are unbounded; `capacity` is their backlog warning step.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            queues: Arc::new(Mutex::new(Vec::new())),
            capacity,
        }
    }

    /// Publishes an event without blocking. Returns how many subscribers will see it.
    ///
    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: DomainEvent) -> usize {
        debug!(
            session_id = %event.session_id,
            category = %event.category,
            event_id = %event.id,
            "publishing domain event"
        );
        let event = Arc::new(event);
        // held across the sends so every queue sees one global order
        let queued = {
            let mut queues = self.queues();
            queues.retain(|queue| queue.push(&event, self.capacity));
            queues.len()
        };
        queued + self.sender.send(event).unwrap_or(0)
    }

    /// Opens a ring cursor that sees events published from now on, unless it falls behind.
    pub fn subscribe(&self) -> BusSubscriber {
        BusSubscriber {
            cursor: Cursor::Ring(self.sender.subscribe()),
        }
    }

    /// Opens a cursor that sees every event published from now on.
    pub fn subscribe_lossless(&self) -> BusSubscriber {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        self.queues().push(Queue {
            tx,
            depth: Arc::clone(&depth),
        });
        BusSubscriber {
            cursor: Cursor::Queue { rx, depth },
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut queues = self.queues();
        queues.retain(|queue| !queue.tx.is_closed());
        queues.len() + self.sender.receiver_count()
    }

    fn queues(&self) -> MutexGuard<'_, Vec<Queue>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
enum Cursor {
    Ring(broadcast::Receiver<Arc<DomainEvent>>),
    Queue {
        rx: mpsc::UnboundedReceiver<Arc<DomainEvent>>,
        depth: Arc<AtomicUsize>,
    },
}

/// One consumer's cursor into the bus.
#[derive(Debug)]
pub struct BusSubscriber {
    cursor: Cursor,
}

impl BusSubscriber {
    /// Next event, or `None` once every [`EventBus`] handle is dropped.
    ///
    /// When a ring cursor falls behind, the overwritten events are skipped and logged.
    pub async fn recv(&mut self) -> Option<Arc<DomainEvent>> {
        match &mut self.cursor {
            Cursor::Ring(receiver) => loop {
                match receiver.recv().await {
                    Ok(event) => return Some(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event bus subscriber lagged; dropping oldest events");
                    }
                    Err(RecvError::Closed) => return None,
                }
            },
            Cursor::Queue { rx, depth } => {
                let event = rx.recv().await?;
                depth.fetch_sub(1, Ordering::Relaxed);
                Some(event)
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv). `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Arc<DomainEvent>> {
        match &mut self.cursor {
            Cursor::Ring(receiver) => loop {
                match receiver.try_recv() {
                    Ok(event) => return Some(event),
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!(skipped, "event bus subscriber lagged; dropping oldest events");
                    }
                    Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
                }
            },
            Cursor::Queue { rx, depth } => {
                let event = rx.try_recv().ok()?;
                depth.fetch_sub(1, Ordering::Relaxed);
                Some(event)
            }
        }
    }
}
