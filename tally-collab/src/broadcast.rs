//! Fan-out of snapshots to attached observers with backpressure.
//!
//! One tokio broadcast channel per group gives O(1) publish to every
//! observer. Each observer buffers up to `capacity` snapshots; a slower one
//! lags and skips ahead to the newest complete snapshot instead of blocking
//! the publisher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tally_core::{now_millis, Snapshot};
use tokio::sync::broadcast;
use uuid::Uuid;

/// An attached observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverInfo {
    pub observer_id: Uuid,
    pub name: String,
    /// Attach time (millis since epoch)
    pub attached_at: u64,
}

impl ObserverInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            observer_id: Uuid::new_v4(),
            name: name.into(),
            attached_at: now_millis(),
        }
    }
}

/// Statistics for monitoring fan-out health.
#[derive(Debug, Clone, Default)]
pub struct ObserverStats {
    pub snapshots_published: u64,
    /// Snapshots lagging observers never saw
    pub snapshots_skipped: u64,
    pub active_observers: usize,
}

struct AtomicObserverStats {
    snapshots_published: AtomicU64,
    snapshots_skipped: AtomicU64,
}

impl AtomicObserverStats {
    fn new() -> Self {
        Self {
            snapshots_published: AtomicU64::new(0),
            snapshots_skipped: AtomicU64::new(0),
        }
    }
}

/// Broadcast group for one sync layer.
///
/// Publishing never blocks and never takes an async lock, so it is safe to
/// call from a store listener.
pub struct ObserverGroup {
    /// None once the group is closed
    sender: Mutex<Option<broadcast::Sender<Arc<Snapshot>>>>,

    observers: Mutex<HashMap<Uuid, ObserverInfo>>,

    capacity: usize,

    atomic_stats: AtomicObserverStats,
}

impl ObserverGroup {
    /// Create a group buffering up to `capacity` snapshots per observer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
            observers: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            atomic_stats: AtomicObserverStats::new(),
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<broadcast::Sender<Arc<Snapshot>>>> {
        self.sender.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<Uuid, ObserverInfo>> {
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an observer and return its receiver.
    ///
    /// On a closed group the receiver reports closed immediately.
    pub fn add_observer(&self, info: ObserverInfo) -> broadcast::Receiver<Arc<Snapshot>> {
        let receiver = match self.sender().as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        };
        self.registry().insert(info.observer_id, info);
        receiver
    }

    pub fn remove_observer(&self, observer_id: &Uuid) -> Option<ObserverInfo> {
        self.registry().remove(observer_id)
    }

    /// Publish a snapshot to every observer.
    ///
    /// Returns the number of receivers reached.
    pub fn publish(&self, snapshot: Arc<Snapshot>) -> usize {
        let count = match self.sender().as_ref() {
            Some(sender) => sender.send(snapshot).unwrap_or(0),
            None => 0,
        };
        self.atomic_stats
            .snapshots_published
            .fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Drop the sender. Receivers drain what is buffered, then see closed.
    pub fn close(&self) {
        if self.sender().take().is_some() {
            log::debug!("Observer group closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    pub(crate) fn record_skipped(&self, count: u64) {
        self.atomic_stats
            .snapshots_skipped
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn observer_count(&self) -> usize {
        self.registry().len()
    }

    pub fn observers(&self) -> Vec<ObserverInfo> {
        self.registry().values().cloned().collect()
    }

    pub fn has_observer(&self, observer_id: &Uuid) -> bool {
        self.registry().contains_key(observer_id)
    }

    pub fn stats(&self) -> ObserverStats {
        ObserverStats {
            snapshots_published: self.atomic_stats.snapshots_published.load(Ordering::Relaxed),
            snapshots_skipped: self.atomic_stats.snapshots_skipped.load(Ordering::Relaxed),
            active_observers: self.observer_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
