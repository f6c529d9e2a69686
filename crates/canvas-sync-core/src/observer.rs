//! Subscriber registries.
//!
//! Callbacks run in registration order, with no registry lock held, so a
//! callback may subscribe or unsubscribe (itself included). The entry list is
//! snapshotted when a notification starts: callbacks added during a
//! notification first run on the next one, callbacks removed during a
//! notification are skipped if they have not run yet.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// An ordered list of callbacks for values of type `T`.
pub struct Observers<T> {
    entries: Mutex<Vec<(SubscriptionId, Callback<T>)>>,
}

impl<T> Observers<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Callback<T>)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a callback.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns false if it was not registered here.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.lock().iter().any(|(entry_id, _)| *entry_id == id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Call every registered callback with `value`.
    pub fn notify(&self, value: &T) {
        self.notify_while(value, || true);
    }

    /// Like `notify`, but stops as soon as `live` returns false. `live` is
    /// checked before each callback, with no registry lock held.
    pub fn notify_while<F>(&self, value: &T, live: F)
    where
        F: Fn() -> bool,
    {
        let snapshot: Vec<_> = self.lock().clone();
        for (id, callback) in snapshot {
            if !live() {
                return;
            }
            if self.contains(id) {
                callback(value);
            }
        }
    }
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}
