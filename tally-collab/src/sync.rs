//! Sync layer: keeps a materialized snapshot current and fans it out.
//!
//! ```text
//!  Store ──listener──► SyncLayer ──ObserverGroup──┬──► Observer (cli view)
//!    ▲                  current: Arc<Snapshot>    ├──► Observer (test probe)
//!    └── list() once at start                     └──► ...
//! ```
//!
//! The layer is the single store subscriber for its process. Each delivery
//! replaces the whole snapshot; nothing is diffed. Snapshots carry the store
//! revision, and anything not newer than what is already current is
//! discarded, which covers the race between the initial `list` and the
//! first change notification. When the store's feed closes (a lost
//! connection) every observer stream ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tally_core::Snapshot;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::broadcast::{ObserverGroup, ObserverInfo, ObserverStats};
use crate::store::{Listener, Store, StoreError, Subscription};

/// Sync layer configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Snapshots buffered per observer before it starts skipping
    pub observer_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            observer_capacity: 64,
        }
    }
}

impl SyncConfig {
    pub fn for_testing() -> Self {
        Self {
            observer_capacity: 8,
        }
    }
}

struct Current {
    snapshot: Arc<Snapshot>,
    /// False until the first snapshot is accepted
    primed: bool,
}

struct Shared {
    current: RwLock<Current>,
    group: ObserverGroup,
    discarded: AtomicU64,
}

impl Shared {
    /// Accept `snapshot` if it is newer than the current one and publish it.
    fn offer(&self, snapshot: Arc<Snapshot>) -> bool {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        if current.primed && snapshot.revision <= current.snapshot.revision {
            log::debug!(
                "Discarding stale snapshot at revision {} (current {})",
                snapshot.revision,
                current.snapshot.revision
            );
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        current.snapshot = snapshot.clone();
        current.primed = true;
        // Published under the lock so attach() never misses a snapshot.
        self.group.publish(snapshot);
        true
    }

    fn current(&self) -> Arc<Snapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot
            .clone()
    }
}

/// Bridges a store's change feed to any number of observers.
pub struct SyncLayer {
    shared: Arc<Shared>,
    subscription: Mutex<Option<Subscription>>,
}

impl SyncLayer {
    /// Subscribe to `store`, then load and publish its current record set.
    pub async fn start(store: &dyn Store, config: SyncConfig) -> Result<Self, StoreError> {
        let shared = Arc::new(Shared {
            current: RwLock::new(Current {
                snapshot: Arc::new(Snapshot::default()),
                primed: false,
            }),
            group: ObserverGroup::new(config.observer_capacity),
            discarded: AtomicU64::new(0),
        });

        let sink = shared.clone();
        let listener: Listener = Arc::new(move |snapshot: Arc<Snapshot>| {
            sink.offer(snapshot);
        });
        // Subscribe before listing so no change falls between the two.
        let subscription = store.subscribe(listener).await?;
        let closer = shared.clone();
        subscription.on_close(move || {
            log::info!("Store feed closed, ending observer streams");
            closer.group.close();
        });
        let initial = store.list().await?;
        shared.offer(Arc::new(initial));

        log::debug!(
            "Sync layer started at revision {}",
            shared.current().revision
        );

        Ok(Self {
            shared,
            subscription: Mutex::new(Some(subscription)),
        })
    }

    /// The most recent accepted snapshot.
    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.shared.current()
    }

    /// Attach an observer. Its first `recv` yields the current snapshot.
    pub fn attach(&self, name: impl Into<String>) -> Observer {
        let info = ObserverInfo::new(name);
        let id = info.observer_id;
        let name = info.name.clone();

        // Read lock excludes offer(): everything after `pending` arrives on
        // the receiver.
        let current = self.shared.current.read().unwrap_or_else(|e| e.into_inner());
        let receiver = self.shared.group.add_observer(info);
        let pending = current.snapshot.clone();
        drop(current);

        log::debug!("Observer '{name}' ({id}) attached");
        Observer {
            id,
            name,
            receiver,
            pending: Some(pending),
            last_revision: None,
            shared: self.shared.clone(),
        }
    }

    /// Detach an observer. Equivalent to dropping it.
    pub fn detach(&self, observer: Observer) {
        drop(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.shared.group.observer_count()
    }

    pub fn stats(&self) -> ObserverStats {
        self.shared.group.stats()
    }

    /// Snapshots dropped for not being newer than the current one.
    pub fn discarded(&self) -> u64 {
        self.shared.discarded.load(Ordering::Relaxed)
    }

    /// False once stopped or once the store's feed has closed.
    pub fn is_running(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
            && !self.shared.group.is_closed()
    }

    /// Release the store subscription and end every observer stream.
    pub fn stop(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(subscription) = subscription {
            subscription.release();
            self.shared.group.close();
            log::debug!("Sync layer stopped");
        }
    }
}

impl Drop for SyncLayer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A consumer of snapshots attached to a [`SyncLayer`].
pub struct Observer {
    id: Uuid,
    name: String,
    receiver: broadcast::Receiver<Arc<Snapshot>>,
    /// Snapshot current at attach time, handed out first
    pending: Option<Arc<Snapshot>>,
    last_revision: Option<u64>,
    shared: Arc<Shared>,
}

impl Observer {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next newer snapshot. `None` once the layer has stopped.
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        if let Some(snapshot) = self.take_pending() {
            return Some(snapshot);
        }
        loop {
            match self.receiver.recv().await {
                Ok(snapshot) => {
                    if let Some(snapshot) = self.accept(snapshot) {
                        return Some(snapshot);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Like [`recv`](Self::recv) but returns `None` when nothing newer is
    /// buffered right now.
    pub fn try_recv(&mut self) -> Option<Arc<Snapshot>> {
        if let Some(snapshot) = self.take_pending() {
            return Some(snapshot);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(snapshot) => {
                    if let Some(snapshot) = self.accept(snapshot) {
                        return Some(snapshot);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(_) => return None,
            }
        }
    }

    /// Stop receiving. Equivalent to dropping the observer.
    pub fn detach(self) {}

    fn take_pending(&mut self) -> Option<Arc<Snapshot>> {
        let snapshot = self.pending.take()?;
        self.last_revision = Some(snapshot.revision);
        Some(snapshot)
    }

    fn accept(&mut self, snapshot: Arc<Snapshot>) -> Option<Arc<Snapshot>> {
        if self.last_revision.is_some_and(|last| snapshot.revision <= last) {
            return None;
        }
        self.last_revision = Some(snapshot.revision);
        Some(snapshot)
    }

    fn lagged(&self, skipped: u64) {
        log::warn!(
            "Observer '{}' lagged, skipped {skipped} snapshots",
            self.name
        );
        self.shared.group.record_skipped(skipped);
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        if self.shared.group.remove_observer(&self.id).is_some() {
            log::debug!("Observer '{}' ({}) detached", self.name, self.id);
        }
    }
}
