//! Event dispatcher - fan-out of fence transitions to subscribers
//!
//! Each subscriber owns a bounded mpsc receiver. Publishing uses `try_send` so
//! a slow subscriber never stalls position ingest: a full queue drops the event
//! for that subscriber only, and a closed receiver is pruned on the next publish.

use crate::domain::types::{FenceEvent, FenceState};
use crate::infra::metrics::Metrics;
use crate::services::registry::FenceRegistry;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Opaque subscription handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receiving side of a subscription
pub struct Subscription {
    pub id: SubscriptionId,
    pub rx: mpsc::Receiver<FenceEvent>,
}

/// Publish/subscribe hub for fence events
pub struct EventDispatcher {
    subscribers: Mutex<FxHashMap<SubscriptionId, mpsc::Sender<FenceEvent>>>,
    next_id: AtomicU64,
    buffer_size: usize,
    metrics: Arc<Metrics>,
    /// Rate limit for drop warnings
    last_drop_warn: Mutex<Instant>,
}

impl EventDispatcher {
    pub fn new(buffer_size: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            subscribers: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
            buffer_size: buffer_size.max(1),
            metrics,
            last_drop_warn: Mutex::new(Instant::now() - Duration::from_secs(2)),
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let count = {
            let mut subscribers = self.subscribers.lock();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        debug!(subscription = %id, subscribers = %count, "subscriber_added");
        Subscription { id, rx }
    }

    /// Register a subscriber and queue a one-shot replay of the current state
    ///
    /// Every fence currently inside replays as `entered`, followed by `dwell`
    /// when it is already dwelling. The replay only reaches this subscriber.
    ///
    /// The registry is read while the subscriber table is locked, so any
    /// transition evaluated after the snapshot is published to this subscriber
    /// too. Lock order is subscribers then registry; `publish` never holds the
    /// registry lock.
    pub fn subscribe_with_replay(&self, registry: &FenceRegistry) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.subscribers.lock();

        let snapshot = registry.list();
        let (tx, rx) = mpsc::channel(self.buffer_size.max(snapshot.len() * 2));
        let mut replayed = 0usize;
        for fence in snapshot.iter().filter(|f| f.inside) {
            let _ = tx.try_send(FenceEvent::new(fence.name.clone(), FenceState::Entered));
            replayed += 1;
            if fence.dwelling {
                let _ = tx.try_send(FenceEvent::new(fence.name.clone(), FenceState::Dwell));
                replayed += 1;
            }
        }

        subscribers.insert(id, tx);
        drop(subscribers);

        debug!(subscription = %id, replayed = %replayed, "subscriber_added_with_replay");
        Subscription { id, rx }
    }

    /// Remove a subscriber. Returns false for an unknown handle.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            debug!(subscription = %id, "subscriber_removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver one event to every current subscriber
    pub fn publish(&self, event: &FenceEvent) {
        let mut dropped = 0u64;
        let mut subscribers = self.subscribers.lock();

        subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscription = %id, "subscriber_closed");
                false
            }
        });
        drop(subscribers);

        self.metrics.record_event_published(event.state);
        if dropped > 0 {
            self.metrics.record_events_dropped(dropped);
            let mut last = self.last_drop_warn.lock();
            if last.elapsed() > Duration::from_secs(1) {
                warn!(name = %event.name, state = %event.state, dropped = %dropped, "fence_event_dropped: subscriber queue full");
                *last = Instant::now();
            }
        }
    }

    /// Deliver a batch of events in order
    pub fn publish_all<'a>(&self, events: impl IntoIterator<Item = &'a FenceEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}
