//! Atomic State
//!
//! Lock-free read/write/compare-exchange words used for task lifecycle
//! state and cancellation counters.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

/// A state enum that can be stored in a 32-bit atomic word
pub trait AtomicRepr: Copy + Eq {
    /// Encode to the raw word
    fn into_raw(self) -> u32;

    /// Decode from the raw word
    ///
    /// Only values previously produced by [`AtomicRepr::into_raw`] are ever
    /// stored, so implementations may treat anything else as unreachable.
    fn from_raw(raw: u32) -> Self;
}

/// Typed atomic state word
pub struct AtomicState<S> {
    raw: AtomicU32,
    _state: PhantomData<fn() -> S>,
}

impl<S: AtomicRepr> AtomicState<S> {
    /// Create with an initial state
    pub fn new(initial: S) -> Self {
        Self {
            raw: AtomicU32::new(initial.into_raw()),
            _state: PhantomData,
        }
    }

    /// Read the current state
    pub fn load(&self) -> S {
        S::from_raw(self.raw.load(Ordering::Acquire))
    }

    /// Overwrite the current state
    pub fn store(&self, state: S) {
        self.raw.store(state.into_raw(), Ordering::Release);
    }

    /// Swap in a new state, returning the previous one
    pub fn swap(&self, state: S) -> S {
        S::from_raw(self.raw.swap(state.into_raw(), Ordering::AcqRel))
    }

    /// Compare-exchange, returning the observed state on failure
    pub fn compare_exchange(&self, current: S, new: S) -> Result<S, S> {
        self.raw
            .compare_exchange(
                current.into_raw(),
                new.into_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(S::from_raw)
            .map_err(S::from_raw)
    }

    /// Move from `from` to `to`; false if another thread got there first
    pub fn transition(&self, from: S, to: S) -> bool {
        self.compare_exchange(from, to).is_ok()
    }
}

impl<S: AtomicRepr + fmt::Debug> fmt::Debug for AtomicState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicState").field(&self.load()).finish()
    }
}

/// 64-bit atomic counter
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicI64);

impl AtomicCounter {
    /// Create with an initial value
    pub fn new(value: i64) -> Self {
        Self(AtomicI64::new(value))
    }

    /// Read the current value
    pub fn read(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Overwrite the current value
    pub fn write(&self, value: i64) {
        self.0.store(value, Ordering::SeqCst);
    }

    /// Increment, returning the new value
    pub fn increment(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrement, returning the new value
    pub fn decrement(&self) -> i64 {
        self.0.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Swap in a new value, returning the previous one
    pub fn exchange(&self, value: i64) -> i64 {
        self.0.swap(value, Ordering::SeqCst)
    }

    /// Compare-exchange, returning the observed value on failure
    pub fn compare_exchange(&self, current: i64, new: i64) -> Result<i64, i64> {
        self.0
            .compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
    }
}
