//! Fan-out of job events to independent subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard, Weak};

use forge_core::JobEvent;
use tokio::sync::mpsc;

/// Handle identifying one subscription on an [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subscriber-{}", self.0)
    }
}

type SubscriberMap = HashMap<SubscriberId, mpsc::Sender<JobEvent>>;
type Subscribers = RwLock<SubscriberMap>;

fn write(subscribers: &Subscribers) -> RwLockWriteGuard<'_, SubscriberMap> {
    subscribers.write().unwrap_or_else(PoisonError::into_inner)
}

/// Private read side of a subscription.
///
/// Dropping it deregisters the subscriber from its bus.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<JobEvent>,
    bus: Weak<Subscribers>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.bus.upgrade()
            && write(&subscribers).remove(&self.id).is_some()
        {
            tracing::debug!("Dropped {}", self.id);
        }
    }
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event. `None` once the subscription is removed.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }

    /// Take an already delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        self.rx.try_recv().ok()
    }
}

/// Best-effort broadcast with a bounded queue per subscriber.
///
/// A subscriber whose queue is full misses the event; everyone else still
/// gets it and [`publish`](Self::publish) never waits.
pub struct EventBus {
    subscribers: Arc<Subscribers>,
    next_id: AtomicU64,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);

        write(&self.subscribers).insert(id, tx);

        tracing::debug!("Registered {}", id);
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.subscribers),
        }
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = write(&self.subscribers).remove(&id).is_some();

        if removed {
            tracing::debug!("Removed {}", id);
        }
        removed
    }

    /// Offer `event` to every subscriber. Never blocks and never changes
    /// the subscriber set.
    pub fn publish(&self, event: JobEvent) {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        for (id, tx) in subscribers.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("Dropping {} event for slow {}", event.kind(), id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("Skipping closed {}", id);
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
