//! A small generalization of [`raft::atomic::AtomicCell`] to values too large to fit in a word:
//! immutable snapshots published by atomic pointer swap.
//!
//! [`AllowedNetworks`](crate::registry::AllowedNetworks), the handler list
//! ([`MessageHandlerList`](crate::handlers::MessageHandlerList)), and member metadata are all
//! read far more often than they're written, so readers clone an `Arc` out from under a short-lived
//! lock rather than holding any lock across their own work. Writers replace the whole snapshot
//! rather than mutating it in place, the same copy-on-write shape [`mpb::MPB`] uses for its
//! subscriber list.

use std::sync::{Arc, Mutex};

/// An immutable snapshot of `T`, published by whole-value replacement.
///
/// Readers call [`load`](Self::load) to get a cheap `Arc` clone of the current snapshot; they never
/// block a concurrent [`store`](Self::store)/[`swap`](Self::swap), and a writer never blocks a reader
/// that already captured its reference. The lock is held only for the instant it takes to clone or
/// replace the pointer, never across any caller-supplied work.
pub struct AtomicSwap<T> {
    current: Mutex<Arc<T>>,
}

impl<T> AtomicSwap<T> {
    /// Constructs a new cell holding `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            current: Mutex::new(Arc::new(initial)),
        }
    }

    /// Returns a clone of the current snapshot.
    pub fn load(&self) -> Arc<T> {
        self.current
            .lock()
            .expect("AtomicSwap mutex poisoned")
            .clone()
    }

    /// Replaces the snapshot with `new`, returning the previous one.
    pub fn store(&self, new: T) -> Arc<T> {
        self.swap(Arc::new(new))
    }

    /// Replaces the snapshot with `new`, returning the previous one.
    pub fn swap(&self, new: Arc<T>) -> Arc<T> {
        let mut current = self.current.lock().expect("AtomicSwap mutex poisoned");
        std::mem::replace(&mut *current, new)
    }

    /// Publishes a new snapshot computed from the current one, e.g. appending to an immutable list.
    ///
    /// `f` must not itself call [`load`](Self::load)/[`store`](Self::store)/[`swap`](Self::swap) on
    /// this same cell, or it will deadlock.
    pub fn rcu(&self, f: impl FnOnce(&T) -> T) {
        let mut current = self.current.lock().expect("AtomicSwap mutex poisoned");
        let new = f(&current);
        *current = Arc::new(new);
    }
}
