//! A small single-word atomic cell, generic over anything that fits in a [`u64`].
//!
//! [`State`](crate::core::State) is driven from a single thread of control (one call to
//! [`receive`](crate::node::Node::receive)/[`timer_tick`](crate::node::Node::timer_tick) at a time), but callers that
//! expose a [`State`](crate::core::State) to multiple threads — for example to let a reader learn the current term or
//! leader hint without taking the lock that serializes state transitions — need a lock-free way to publish those
//! fields. [`AtomicCell`] is that primitive: a volatile read/write, a compare-and-swap, and a functional `update` loop
//! that retries until it wins the race.

use core::sync::atomic::{AtomicU64, Ordering};

/// A value which can be losslessly packed into and out of a [`u64`] for storage in an [`AtomicCell`].
pub trait AtomicWord: Copy {
    /// Packs `self` into a [`u64`].
    fn into_word(self) -> u64;
    /// Unpacks a [`u64`] produced by [`into_word`](Self::into_word) back into `Self`.
    fn from_word(word: u64) -> Self;
}

impl AtomicWord for u64 {
    fn into_word(self) -> u64 {
        self
    }
    fn from_word(word: u64) -> Self {
        word
    }
}

impl AtomicWord for u32 {
    fn into_word(self) -> u64 {
        self as u64
    }
    fn from_word(word: u64) -> Self {
        word as u32
    }
}

impl AtomicWord for bool {
    fn into_word(self) -> u64 {
        self as u64
    }
    fn from_word(word: u64) -> Self {
        word != 0
    }
}

/// A single-word value with volatile read/write and compare-and-swap semantics, usable from `no_std`.
///
/// Used by callers that layer concurrency on top of [`State`](crate::core::State) — for example to publish the
/// current term, a role tag, or a generation counter — without serializing readers behind the same lock that
/// guards state transitions.
pub struct AtomicCell<T> {
    word: AtomicU64,
    _marker: core::marker::PhantomData<T>,
}

/// The number of failed compare-and-swap attempts in [`AtomicCell::update`] after which the retry loop backs off
/// with [`core::hint::spin_loop`] instead of retrying immediately.
const SPIN_THRESHOLD: u32 = 8;

impl<T: AtomicWord> AtomicCell<T> {
    /// Constructs a new cell holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            word: AtomicU64::new(value.into_word()),
            _marker: core::marker::PhantomData,
        }
    }

    /// Volatile load of the current value.
    pub fn read(&self) -> T {
        T::from_word(self.word.load(Ordering::Acquire))
    }

    /// Volatile store of `value`.
    pub fn write(&self, value: T) {
        self.word.store(value.into_word(), Ordering::Release);
    }

    /// Atomically replaces the current value with `update` if it equals `expected`, returning the value observed
    /// just before the attempt (which equals `expected` iff the exchange succeeded).
    pub fn compare_exchange(&self, expected: T, update: T) -> T {
        match self.word.compare_exchange(
            expected.into_word(),
            update.into_word(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(observed) | Err(observed) => T::from_word(observed),
        }
    }

    /// Atomically replaces the current value with `update` if it equals `expected`, returning whether it did.
    pub fn compare_and_set(&self, expected: T, update: T) -> bool {
        self.word
            .compare_exchange(
                expected.into_word(),
                update.into_word(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Applies `f` to the current value in a compare-and-swap retry loop, storing and returning `(old, new)` once
    /// the exchange succeeds.
    ///
    /// Spins tightly for the first [`SPIN_THRESHOLD`] failed attempts (the expected case under light contention),
    /// then falls back to yielding the thread between attempts so a `no_std` target without a scheduler can still
    /// make progress via busy-waiting alone.
    pub fn update(&self, mut f: impl FnMut(T) -> T) -> (T, T) {
        let mut attempts: u32 = 0;
        loop {
            let old = self.read();
            let new = f(old);
            let observed = self.compare_exchange(old, new);
            if observed.into_word() == old.into_word() {
                return (old, new);
            }
            attempts = attempts.saturating_add(1);
            if attempts > SPIN_THRESHOLD {
                core::hint::spin_loop();
            }
        }
    }

    /// Combines the current value with `x` via `g`, storing and returning `(old, new)` once the exchange succeeds.
    ///
    /// A thin convenience wrapper over [`update`](Self::update) for the common case of folding in an external value
    /// rather than transforming the current one in place.
    pub fn accumulate<X: Copy>(&self, x: X, mut g: impl FnMut(T, X) -> T) -> (T, T) {
        self.update(|old| g(old, x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_round_trips() {
        let cell = AtomicCell::new(3u64);
        assert_eq!(cell.read(), 3);
        cell.write(7);
        assert_eq!(cell.read(), 7);
    }

    #[test]
    fn compare_and_set_only_succeeds_on_match() {
        let cell = AtomicCell::new(1u32);
        assert!(!cell.compare_and_set(0, 5));
        assert_eq!(cell.read(), 1);
        assert!(cell.compare_and_set(1, 5));
        assert_eq!(cell.read(), 5);
    }

    #[test]
    fn update_applies_function_exactly_once_per_success() {
        let cell = AtomicCell::new(10u64);
        let (old, new) = cell.update(|v| v + 1);
        assert_eq!((old, new), (10, 11));
        assert_eq!(cell.read(), 11);
    }

    #[test]
    fn accumulate_folds_external_value() {
        let cell = AtomicCell::new(2u64);
        let (old, new) = cell.accumulate(5, |v, x| v * x);
        assert_eq!((old, new), (2, 10));
    }
}
