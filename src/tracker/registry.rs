// src/tracker/registry.rs - Dynamic set of live subscribers and window fan-out

use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, Mutex};

use crate::types::WindowStat;

/// Queue depth used by `register()`
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 8;

/// Opaque identity of one subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiving end handed to a sink adapter
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    receiver: mpsc::Receiver<WindowStat>,
}

impl Subscription {
    /// Wait for the next window; `None` once the registry dropped this subscriber
    pub async fn recv(&mut self) -> Option<WindowStat> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<WindowStat> {
        self.receiver.try_recv().ok()
    }
}

/// What happened during one broadcast pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Subscribers whose queue was full; they miss this window
    pub dropped: usize,
    /// Subscribers whose receiver was gone; removed from the set
    pub pruned: usize,
}

/// Concurrency-safe registry of subscriber queues.
///
/// Register, deregister and broadcast are serialized by one mutex. Broadcast
/// never waits on a subscriber: a full queue loses the window for that
/// subscriber only.
#[derive(Debug)]
pub struct SubscriberRegistry {
    subscribers: Mutex<BTreeMap<SubscriberId, mpsc::Sender<WindowStat>>>,
    next_id: AtomicU64,
    dropped_total: AtomicU64,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            dropped_total: AtomicU64::new(0),
        }
    }

    pub async fn register(&self) -> Subscription {
        self.register_with_capacity(DEFAULT_SUBSCRIBER_CAPACITY).await
    }

    /// Register with a specific queue depth (clamped to at least one)
    pub async fn register_with_capacity(&self, capacity: usize) -> Subscription {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut subscribers = self.subscribers.lock().await;
        subscribers.insert(id, sender);
        info!("Subscriber {} registered ({} active)", id, subscribers.len());

        Subscription { id, receiver }
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub async fn deregister(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock().await;
        let removed = subscribers.remove(&id).is_some();
        if removed {
            info!("Subscriber {} deregistered ({} active)", id, subscribers.len());
        } else {
            debug!("Subscriber {} already gone", id);
        }
        removed
    }

    /// Offer `stat` to every registered subscriber without blocking
    pub async fn broadcast(&self, stat: WindowStat) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut subscribers = self.subscribers.lock().await;

        subscribers.retain(|id, sender| match sender.try_send(stat) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Subscriber {} is lagging, dropped window {}", id, stat.timestamp);
                report.dropped += 1;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Subscriber {} receiver closed, pruning", id);
                report.pruned += 1;
                false
            }
        });

        if report.dropped > 0 {
            self.dropped_total.fetch_add(report.dropped as u64, Ordering::Relaxed);
        }
        report
    }

    pub async fn len(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscribers.lock().await.is_empty()
    }

    pub async fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().await.contains_key(&id)
    }

    /// Deliveries skipped because a queue was full, since startup
    pub fn total_dropped(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Drop every queue; subscribers see `recv()` return `None`
    pub async fn close_all(&self) {
        let mut subscribers = self.subscribers.lock().await;
        let count = subscribers.len();
        subscribers.clear();
        if count > 0 {
            info!("Closed {} subscriber queues", count);
        }
    }
}
