//! In-process change notification fan-out.
//!
//! Stores call [`ChangeBus::publish`] after every committed ledger write.
//! Callbacks registered for that record key run synchronously on the
//! publisher's task, against a snapshot of the subscriber list taken before
//! dispatch, so a callback may subscribe or unsubscribe (itself included)
//! without deadlocking. A panicking callback is logged and skipped; the rest
//! still run. Async consumers can instead take a broadcast receiver from
//! [`ChangeBus::events`].
//!
//! The event only says *which* record changed and its new version. Consumers
//! re-read the store for the value.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: String,
    pub version: u64,
}

pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Identifies one registration. Unsubscribing it twice is harmless.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    key: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &str {
        &self.key
    }
}

pub struct ChangeBus {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<String, Vec<(u64, ChangeCallback)>>>,
    events: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl ChangeBus {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe<F>(&self, key: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .entry(key.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        SubscriptionHandle {
            key: key.to_string(),
            id,
        }
    }

    /// Like [`Self::subscribe`], but unregisters when the guard drops.
    pub fn subscribe_scoped<F>(self: &Arc<Self>, key: &str, callback: F) -> SubscriptionGuard
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let handle = self.subscribe(key, callback);
        SubscriptionGuard {
            bus: Arc::downgrade(self),
            handle: Some(handle),
        }
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut subscribers = self.subscribers.write();
        if let Some(entries) = subscribers.get_mut(&handle.key) {
            entries.retain(|(id, _)| *id != handle.id);
            if entries.is_empty() {
                subscribers.remove(&handle.key);
            }
        }
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.subscribers.read().get(key).map_or(0, Vec::len)
    }

    /// Async feed of every change on every key.
    pub fn events(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Notify everyone watching `key`. Returns how many callbacks completed.
    pub fn publish(&self, key: &str, version: u64) -> usize {
        let event = ChangeEvent {
            key: key.to_string(),
            version,
        };

        let snapshot: Vec<(u64, ChangeCallback)> = self
            .subscribers
            .read()
            .get(key)
            .map(|entries| entries.iter().map(|(id, cb)| (*id, Arc::clone(cb))).collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::warn!(
                    key,
                    subscription = id,
                    "Change subscriber panicked; continuing delivery"
                ),
            }
        }

        // No receivers is fine.
        let _ = self.events.send(event);
        tracing::debug!(key, version, delivered, "Change published");
        delivered
    }
}

/// Unsubscribes on drop. Holds the bus weakly, so it never keeps it alive.
pub struct SubscriptionGuard {
    bus: Weak<ChangeBus>,
    handle: Option<SubscriptionHandle>,
}

impl SubscriptionGuard {
    pub fn handle(&self) -> Option<&SubscriptionHandle> {
        self.handle.as_ref()
    }

    /// Keep the subscription alive past the guard; returns its handle.
    pub fn detach(mut self) -> Option<SubscriptionHandle> {
        self.handle.take()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let (Some(handle), Some(bus)) = (self.handle.take(), self.bus.upgrade()) {
            bus.unsubscribe(&handle);
        }
    }
}
