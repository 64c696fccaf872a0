//! Process-wide call accounting.
//!
//! Lock-free atomics: `active` calls currently being served, `executed`
//! calls ever started, and `errors` calls that ended in a failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Atomic active / executed / error counters.
#[derive(Debug, Default)]
pub struct ConnectionCounter {
    active: AtomicU64,
    executed: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub active: u64,
    pub executed: u64,
    pub errors: u64,
}

impl ConnectionCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of a call.
    pub fn on_start(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the end of a call. Never drops `active` below zero.
    pub fn on_end(&self) {
        let mut current = self.active.load(Ordering::Acquire);
        while current > 0 {
            match self.active.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Records a failed call.
    pub fn on_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            active: self.active.load(Ordering::Acquire),
            executed: self.executed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Starts a call and returns a guard that ends it on drop.
    ///
    /// The guard also runs during unwinding, so a panicking call still
    /// leaves `active` balanced.
    #[must_use]
    pub fn guard(self: &Arc<Self>) -> CallGuard {
        self.on_start();
        CallGuard {
            counter: Arc::clone(self),
        }
    }
}

/// RAII handle for one in-progress call.
#[derive(Debug)]
pub struct CallGuard {
    counter: Arc<ConnectionCounter>,
}

impl CallGuard {
    /// Marks the guarded call as failed.
    pub fn fail(&self) {
        self.counter.on_error();
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.counter.on_end();
    }
}
