//! Debug-only reentrancy detector for exclusive passes.
//!
//! While a thread runs an exclusive pass (clear or compaction) it holds the
//! quiesce-token. If that same thread calls back into the cache, for
//! example from a `DataSource::cleanup` implementation, it would block on
//! the quiesce-token forever. In debug builds this panics instead. In
//! release builds it compiles to a no-op.

#[cfg(not(debug_assertions))]
use core::marker::PhantomData;
#[cfg(debug_assertions)]
use parking_lot::Mutex;
#[cfg(debug_assertions)]
use std::thread::{self, ThreadId};

/// Per-cache record of which thread, if any, is inside an exclusive pass.
#[derive(Debug, Default)]
pub struct DebugReentrancy {
    #[cfg(debug_assertions)]
    owner: Mutex<Option<ThreadId>>,
}

impl DebugReentrancy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the current thread as inside an exclusive pass until the guard
    /// drops.
    #[inline]
    pub fn enter(&self) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            let mut owner = self.owner.lock();
            assert!(owner.is_none(), "nested exclusive pass");
            *owner = Some(thread::current().id());
            ReentrancyGuard { owner: self }
        }

        #[cfg(not(debug_assertions))]
        {
            ReentrancyGuard { _z: PhantomData }
        }
    }

    /// Panic in debug builds if the current thread is inside an exclusive
    /// pass on this cache.
    #[inline]
    pub fn check(&self) {
        #[cfg(debug_assertions)]
        {
            let mine = *self.owner.lock() == Some(thread::current().id());
            assert!(
                !mine,
                "reentrancy detected: cache called from inside its own exclusive pass"
            );
        }
    }
}

/// RAII guard returned by `DebugReentrancy::enter`.
pub struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
}

impl<'a> Drop for ReentrancyGuard<'a> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            *self.owner.owner.lock() = None;
        }
    }
}
