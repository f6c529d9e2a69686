//! Applies authoritative snapshots and fans them out to subscribers.
//!
//! Every inbound snapshot replaces the held state wholesale (no merge).
//! Subscribers are then called synchronously, in registration order, with a
//! shared read-only reference. Callers must serialize `apply_inbound`; the
//! engine does so with its pump guard, and uses `replace` + `notify_while`
//! so that fan-out stops once its connection is gone.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::canvas::CanvasState;
use crate::codec::Snapshot;
use crate::observer::{Observers, SubscriptionId};

/// Result of applying a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// State replaced and subscribers notified.
    Applied,
    /// Sequence number not newer than the last applied one; ignored.
    Stale { sequence: u64, last: u64 },
}

#[derive(Debug, Default)]
struct Held {
    current: Arc<CanvasState>,
    last_sequence: Option<u64>,
}

/// Owner of the client's copy of the canvas.
pub struct StateReconciler {
    held: Mutex<Held>,
    reject_stale: bool,
    observers: Observers<CanvasState>,
}

impl StateReconciler {
    /// Create a reconciler holding an empty canvas.
    ///
    /// With `reject_stale` set, snapshots carrying a sequence number at or
    /// below the last applied one are dropped. Snapshots without a sequence
    /// number are always applied.
    pub fn new(reject_stale: bool) -> Self {
        Self {
            held: Mutex::new(Held::default()),
            reject_stale,
            observers: Observers::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Held> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the held state with `snapshot` and notify subscribers.
    pub fn apply_inbound(&self, snapshot: Snapshot) -> ApplyOutcome {
        match self.store(snapshot) {
            Ok(state) => {
                self.observers.notify(&state);
                ApplyOutcome::Applied
            }
            Err(stale) => stale,
        }
    }

    /// Replace the held state without notifying. Returns the new state, or
    /// `None` if the snapshot was stale.
    pub fn replace(&self, snapshot: Snapshot) -> Option<Arc<CanvasState>> {
        self.store(snapshot).ok()
    }

    /// Notify subscribers of `state`, checking `live` before each one.
    pub fn notify_while<F>(&self, state: &CanvasState, live: F)
    where
        F: Fn() -> bool,
    {
        self.observers.notify_while(state, live);
    }

    fn store(&self, snapshot: Snapshot) -> Result<Arc<CanvasState>, ApplyOutcome> {
        let mut held = self.lock();
        if let (true, Some(sequence), Some(last)) = (self.reject_stale, snapshot.sequence, held.last_sequence) {
            if sequence <= last {
                log::debug!("Dropping stale snapshot {} (last applied {})", sequence, last);
                return Err(ApplyOutcome::Stale { sequence, last });
            }
        }
        if snapshot.sequence.is_some() {
            held.last_sequence = snapshot.sequence;
        }
        held.current = Arc::new(snapshot.state);
        Ok(held.current.clone())
    }

    /// The last applied state.
    pub fn current_state(&self) -> Arc<CanvasState> {
        self.lock().current.clone()
    }

    /// Sequence number of the last applied snapshot, if it had one.
    pub fn last_sequence(&self) -> Option<u64> {
        self.lock().last_sequence
    }

    /// Forget the last sequence number, e.g. when a new connection opens
    /// against an authority that may have restarted its numbering.
    pub fn reset_sequence(&self) {
        self.lock().last_sequence = None;
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&CanvasState) + Send + Sync + 'static,
    {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }
}

impl Default for StateReconciler {
    fn default() -> Self {
        Self::new(true)
    }
}
