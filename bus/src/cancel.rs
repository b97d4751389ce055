//! Cancellation tokens, linked across a request/parent lifecycle.
//!
//! Every inbound RPC and every leader-router retry loop carries a [`CancelToken`]. The node's own
//! lifecycle token is linked as the parent of each request token, so that shutting the node down
//! cancels every outstanding request without each one having to poll the node's state directly —
//! the same "drop the sender and every receiver wakes up" idiom the teacher's `ServerState` bus uses
//! in its server loop, generalized from a single channel to an arbitrary tree of tokens.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

/// A cancellable, clonable signal.
///
/// Cloning a [`CancelToken`] shares the same underlying flag: cancelling any clone cancels all of
/// them. [`linked_child`](Self::linked_child) instead produces an independent token that becomes
/// cancelled whenever *either* it or `self` is cancelled, without affecting `self` when the child is
/// cancelled on its own.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    // The one live sender for this token's close channel, or `None` once cancelled. Dropping it is
    // what wakes every `wait()`-blocked receiver at once, rather than delivering to just one of them.
    close_tx: Arc<Mutex<Option<Sender<()>>>>,
    close_rx: Receiver<()>,
}

impl CancelToken {
    /// Constructs a new, unlinked, not-yet-cancelled token.
    pub fn new() -> Self {
        let (close_tx, close_rx) = bounded(0);
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            close_tx: Arc::new(Mutex::new(Some(close_tx))),
            close_rx,
        }
    }

    /// Returns whether this token (or a parent it is linked to) has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cancels this token. Idempotent.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            // Dropping the last sender disconnects the channel, which wakes every `wait()` blocked
            // in `recv()`, not merely one of them.
            self.close_tx.lock().expect("CancelToken mutex poisoned").take();
        }
    }

    /// Blocks the calling thread until this token is cancelled.
    ///
    /// Returns immediately if already cancelled.
    pub fn wait(&self) {
        if self.is_cancelled() {
            return;
        }
        let _ = self.close_rx.recv();
    }

    /// Produces a new token that is independently cancellable, but which also becomes cancelled
    /// whenever `self` is cancelled.
    ///
    /// Spawns one watcher thread per call, bounded to the lifetime of the child token (the watcher
    /// exits once the child is cancelled, whether that happened because the parent fired or because
    /// the child was cancelled directly).
    pub fn linked_child(&self) -> Self {
        let child = Self::new();
        let parent = self.clone();
        let watched_child = child.clone();
        thread::spawn(move || {
            parent.wait();
            watched_child.cancel();
        });
        child
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn new_token_is_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_observed_by_is_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clone_shares_the_same_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn wait_returns_once_cancelled() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = thread::spawn(move || waiter.wait());
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        handle.join().expect("waiter thread panicked");
    }

    #[test]
    fn linked_child_is_cancelled_when_parent_is() {
        let parent = CancelToken::new();
        let child = parent.linked_child();
        assert!(!child.is_cancelled());

        parent.cancel();
        child.wait();
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_cancellation_does_not_cancel_parent() {
        let parent = CancelToken::new();
        let child = parent.linked_child();
        child.cancel();
        assert!(!parent.is_cancelled());
    }
}
