//! Linear checkout tokens and the per-entry metadata-token.
//!
//! A `Token` is a zero-sized proof that one checkout was taken from a
//! particular counter. Dropping a token panics; the only valid way to
//! dispose of it is to hand it back to the originating counter via
//! `Count::put`. Handles own exactly one token each, which is how the
//! checkout count is guaranteed to be decremented exactly once.

use core::marker::PhantomData;
use parking_lot::{Condvar, Mutex};
use std::time::Instant;

/// Zero-sized, linear token tied to its originating counter type.
pub struct Token<'a, C: ?Sized> {
    _lt: PhantomData<&'a ()>,
    _ctr: PhantomData<*const C>,
}

impl<'a, C: ?Sized> Token<'a, C> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            _lt: PhantomData,
            _ctr: PhantomData,
        }
    }
}

impl<'a, C: ?Sized> Drop for Token<'a, C> {
    fn drop(&mut self) {
        // Fail fast on misuse: a token must be consumed by Count::put.
        panic!("Token dropped without Count::put");
    }
}

/// A source of counted checkouts, enforced by linear token flow.
pub trait Count {
    type Token<'a>: Sized
    where
        Self: 'a;

    /// Take one checkout and return a linear token for it.
    fn get(&self) -> Self::Token<'static>;

    /// Return (consume) a previously acquired token.
    /// Returns true if the count is now zero.
    fn put<'a>(&'a self, t: Self::Token<'a>) -> bool;
}

/// Lifecycle of a cache entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntryState {
    /// The write-token holder is running `load`; no payload yet.
    Loading,
    /// Loaded and available for checkout.
    Live,
    /// Logically deleted; the next request reloads it, compaction erases it.
    PendingDeletion,
    /// Physically erased from the table. Only stale handles still see it.
    Erased,
}

#[derive(Debug)]
struct Meta {
    checked_out: usize,
    last_access: Instant,
    state: EntryState,
    footprint: u64,
}

/// The metadata-token of one entry: checkout count, last access, state
/// and charged footprint, plus a condition variable signalled whenever
/// the checkout count drops to zero.
#[derive(Debug)]
pub struct CheckoutCount {
    meta: Mutex<Meta>,
    idle: Condvar,
}

impl CheckoutCount {
    pub fn new(state: EntryState) -> Self {
        Self {
            meta: Mutex::new(Meta {
                checked_out: 0,
                last_access: Instant::now(),
                state,
                footprint: 0,
            }),
            idle: Condvar::new(),
        }
    }

    pub fn checked_out(&self) -> usize {
        self.meta.lock().checked_out
    }

    pub fn last_access(&self) -> Instant {
        self.meta.lock().last_access
    }

    pub fn touch(&self) {
        self.meta.lock().last_access = Instant::now();
    }

    pub fn state(&self) -> EntryState {
        self.meta.lock().state
    }

    pub fn set_state(&self, state: EntryState) {
        self.meta.lock().state = state;
    }

    pub fn footprint(&self) -> u64 {
        self.meta.lock().footprint
    }

    /// Replace the charged footprint, returning the previous one.
    pub fn swap_footprint(&self, bytes: u64) -> u64 {
        core::mem::replace(&mut self.meta.lock().footprint, bytes)
    }

    /// Block until no checkouts are outstanding.
    pub fn wait_until_idle(&self) {
        let mut meta = self.meta.lock();
        while meta.checked_out > 0 {
            self.idle.wait(&mut meta);
        }
    }
}

impl Count for CheckoutCount {
    type Token<'a>
        = Token<'a, Self>
    where
        Self: 'a;

    /// Checking out also refreshes the last-access time.
    #[inline]
    fn get(&self) -> Self::Token<'static> {
        let mut meta = self.meta.lock();
        meta.checked_out = meta
            .checked_out
            .checked_add(1)
            .unwrap_or_else(|| std::process::abort());
        meta.last_access = Instant::now();
        Token::new()
    }

    #[inline]
    fn put<'a>(&'a self, t: Self::Token<'a>) -> bool {
        let idle = {
            let mut meta = self.meta.lock();
            assert!(meta.checked_out > 0, "CheckoutCount underflow");
            meta.checked_out -= 1;
            meta.checked_out == 0
        };
        core::mem::forget(t);
        if idle {
            self.idle.notify_all();
        }
        idle
    }
}
