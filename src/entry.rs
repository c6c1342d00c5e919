//! Entry: one cache slot plus its synchronization metadata.

use crate::tokens::{CheckoutCount, EntryState};
use parking_lot::{
    ArcMutexGuard, ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawMutex, RawRwLock, RwLock,
};
use std::sync::Arc;

/// Exclusive claim on an entry's write-token. Writers, loaders and
/// evictors hold one for as long as they need the entry to themselves.
pub(crate) type WriteClaim = ArcMutexGuard<RawMutex, ()>;
pub(crate) type SharedPayload<P> = ArcRwLockReadGuard<RawRwLock, Option<P>>;
pub(crate) type ExclusivePayload<P> = ArcRwLockWriteGuard<RawRwLock, Option<P>>;

pub(crate) struct Entry<K, P> {
    key: K,
    write_token: Arc<Mutex<()>>,
    payload: Arc<RwLock<Option<P>>>,
    pub(crate) checkouts: CheckoutCount,
}

impl<K, P> Entry<K, P> {
    /// A fresh stub in the `Loading` state with no payload.
    pub(crate) fn stub(key: K) -> Self {
        Self {
            key,
            write_token: Arc::new(Mutex::new(())),
            payload: Arc::new(RwLock::new(None)),
            checkouts: CheckoutCount::new(EntryState::Loading),
        }
    }

    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    pub(crate) fn state(&self) -> EntryState {
        self.checkouts.state()
    }

    /// Block until the write-token is free and take it.
    pub(crate) fn claim(&self) -> WriteClaim {
        self.write_token.lock_arc()
    }

    #[cfg(test)]
    pub(crate) fn try_claim(&self) -> Option<WriteClaim> {
        self.write_token.try_lock_arc()
    }

    /// Shared view of the payload. Only taken after the write-token has
    /// been passed through, so it never waits on a writer.
    pub(crate) fn share(&self) -> SharedPayload<P> {
        self.payload.read_arc()
    }

    /// Exclusive view of the payload. The caller holds the write-token and
    /// has waited for the checkout count to reach zero.
    pub(crate) fn exclusive(&self) -> ExclusivePayload<P> {
        self.payload.write_arc()
    }

    /// Take the payload out of the slot, leaving it empty. Requires the
    /// write-token and no outstanding checkouts.
    pub(crate) fn take_payload(&self) -> Option<P> {
        self.payload.write().take()
    }

    #[cfg(test)]
    pub(crate) fn is_loaded(&self) -> bool {
        self.payload.read().is_some()
    }
}
