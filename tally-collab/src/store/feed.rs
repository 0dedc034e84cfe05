//! Push-based change feed for store listeners.
//!
//! Every registered listener is invoked with the full snapshot once per
//! logical change. The owning store calls [`ChangeFeed::publish`] from inside
//! its write critical section, so deliveries reach each listener in revision
//! order, none dropped or duplicated.
//!
//! ```text
//! write ──► commit ──► publish(snapshot) ──┬──► listener A
//!                                          ├──► listener B
//!                                          └──► listener C
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tally_core::Snapshot;
use uuid::Uuid;

/// Callback invoked with the full record set after each change.
///
/// Runs on the writer's task; keep it short and never call back into the
/// store from it.
pub type Listener = Arc<dyn Fn(Arc<Snapshot>) + Send + Sync>;

/// Callback run once when the feed closes.
pub type CloseHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Registry {
    /// Registration order
    listeners: Vec<(Uuid, Listener)>,
    close_hooks: HashMap<Uuid, CloseHook>,
    closed: bool,
}

impl Registry {
    fn contains(&self, id: &Uuid) -> bool {
        self.listeners.iter().any(|(l, _)| l == id)
    }

    fn remove(&mut self, id: &Uuid) -> bool {
        self.close_hooks.remove(id);
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| l != id);
        self.listeners.len() != before
    }
}

struct FeedInner {
    registry: Mutex<Registry>,
    delivered: AtomicU64,
}

impl FeedInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for FeedInner {
    fn drop(&mut self) {
        let registry = self.registry.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, hook) in registry.close_hooks.drain() {
            hook();
        }
    }
}

/// Listener registry with synchronous, ordered fan-out.
///
/// A feed whose source goes away is closed: listeners are dropped and every
/// close hook runs once. Dropping the last handle to the feed closes it too.
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FeedInner {
                registry: Mutex::new(Registry::default()),
                delivered: AtomicU64::new(0),
            }),
        }
    }

    /// Register a listener. Delivery stops when the returned handle is
    /// released or dropped. On a closed feed the handle is inactive from
    /// the start.
    pub fn register(&self, listener: Listener) -> Subscription {
        let id = Uuid::new_v4();
        let mut registry = self.inner.registry();
        if registry.closed {
            log::debug!("Store listener {id} registered on a closed feed");
        } else {
            registry.listeners.push((id, listener));
            log::debug!("Store listener {id} registered");
        }
        Subscription {
            id,
            feed: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver a snapshot to every registered listener, in registration
    /// order.
    ///
    /// Each listener is checked right before its call, so one released
    /// earlier in the same pass (even by another listener) is skipped.
    /// Returns the number of listeners reached.
    pub fn publish(&self, snapshot: Arc<Snapshot>) -> usize {
        // Copied out of the lock so a listener may release a handle.
        let listeners = self.inner.registry().listeners.clone();
        let mut reached = 0;
        for (id, listener) in &listeners {
            if !self.inner.registry().contains(id) {
                continue;
            }
            listener(snapshot.clone());
            reached += 1;
        }
        self.inner
            .delivered
            .fetch_add(reached as u64, Ordering::Relaxed);
        reached
    }

    /// Drop every listener and run the close hooks. Later registrations
    /// are inactive. Idempotent.
    pub fn close(&self) {
        let hooks: Vec<CloseHook> = {
            let mut registry = self.inner.registry();
            if registry.closed {
                return;
            }
            registry.closed = true;
            registry.listeners.clear();
            registry.close_hooks.drain().map(|(_, hook)| hook).collect()
        };
        log::debug!("Change feed closed, running {} close hooks", hooks.len());
        for hook in hooks {
            hook();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.registry().closed
    }

    /// Number of active listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.registry().listeners.len()
    }

    /// Total deliveries made since creation.
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one registered listener.
pub struct Subscription {
    id: Uuid,
    feed: Weak<FeedInner>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the listener is still registered.
    pub fn is_active(&self) -> bool {
        self.feed
            .upgrade()
            .is_some_and(|inner| inner.registry().contains(&self.id))
    }

    /// Run `hook` once when the feed closes. If it already has, the hook
    /// runs now. Releasing the handle first discards the hook unrun.
    pub fn on_close(&self, hook: impl FnOnce() + Send + 'static) {
        let Some(inner) = self.feed.upgrade() else {
            hook();
            return;
        };
        let mut registry = inner.registry();
        if registry.closed {
            drop(registry);
            hook();
            return;
        }
        registry.close_hooks.insert(self.id, Box::new(hook));
    }

    /// Stop delivery. Equivalent to dropping the handle.
    ///
    /// No delivery to this listener starts after `release` returns. A
    /// delivery already running on another thread may still finish.
    pub fn release(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.feed.upgrade() {
            if inner.registry().remove(&self.id) {
                log::debug!("Store listener {} released", self.id);
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
