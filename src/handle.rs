//! Scoped access to one cached payload.
//!
//! A handle owns one checkout token of its entry and a guard on the
//! payload slot, and a `WriteHandle` additionally owns the entry's
//! write-token. Releasing (explicitly or on drop) gives all of them back
//! exactly once; afterwards the accessors return `None`.

use crate::entry::{Entry, ExclusivePayload, SharedPayload, WriteClaim};
use crate::source::DataSource;
use crate::tokens::{CheckoutCount, Count, Token};
use core::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

struct ReadCheckout<K, P> {
    entry: Arc<Entry<K, P>>,
    payload: SharedPayload<P>,
    token: Token<'static, CheckoutCount>,
}

/// Shared view of a cached payload. Any number may be live at once.
pub struct ReadHandle<'c, K, P> {
    checkout: Option<ReadCheckout<K, P>>,
    _cache: PhantomData<&'c ()>,
}

impl<'c, K, P> ReadHandle<'c, K, P> {
    /// Take a read claim while holding the write-token, then give the
    /// write-token back. The count is raised before the token is released.
    pub(crate) fn new(entry: Arc<Entry<K, P>>, claim: WriteClaim) -> Self {
        let token = entry.checkouts.get();
        let payload = entry.share();
        drop(claim);
        Self {
            checkout: Some(ReadCheckout {
                entry,
                payload,
                token,
            }),
            _cache: PhantomData,
        }
    }

    pub fn read(&self) -> Option<&P> {
        let c = self.checkout.as_ref()?;
        Option::as_ref(&*c.payload)
    }

    pub fn key(&self) -> Option<&K> {
        self.checkout.as_ref().map(|c| c.entry.key())
    }

    pub fn last_access(&self) -> Option<Instant> {
        self.checkout
            .as_ref()
            .map(|c| c.entry.checkouts.last_access())
    }

    pub fn is_valid(&self) -> bool {
        self.checkout.is_some()
    }

    /// Give the checkout back. Calling this again is a no-op.
    pub fn release(&mut self) {
        if let Some(ReadCheckout {
            entry,
            payload,
            token,
        }) = self.checkout.take()
        {
            drop(payload);
            entry.checkouts.put(token);
        }
    }
}

impl<'c, K, P> Drop for ReadHandle<'c, K, P> {
    fn drop(&mut self) {
        self.release();
    }
}

struct WriteCheckout<K, P> {
    entry: Arc<Entry<K, P>>,
    payload: ExclusivePayload<P>,
    token: Token<'static, CheckoutCount>,
    claim: WriteClaim,
}

/// Exclusive view of a cached payload. Holds the entry's write-token, so
/// readers, other writers and evictors of the same key wait until it is
/// released.
pub struct WriteHandle<'c, K, P> {
    checkout: Option<WriteCheckout<K, P>>,
    usage: &'c AtomicU64,
}

impl<'c, K, P> WriteHandle<'c, K, P> {
    /// The caller holds the write-token and has waited for the entry to
    /// have no outstanding checkouts.
    pub(crate) fn new(entry: Arc<Entry<K, P>>, claim: WriteClaim, usage: &'c AtomicU64) -> Self {
        let token = entry.checkouts.get();
        let payload = entry.exclusive();
        Self {
            checkout: Some(WriteCheckout {
                entry,
                payload,
                token,
                claim,
            }),
            usage,
        }
    }

    pub fn read(&self) -> Option<&P> {
        let c = self.checkout.as_ref()?;
        Option::as_ref(&*c.payload)
    }

    pub fn write(&mut self) -> Option<&mut P> {
        let c = self.checkout.as_mut()?;
        Option::as_mut(&mut *c.payload)
    }

    pub fn key(&self) -> Option<&K> {
        self.checkout.as_ref().map(|c| c.entry.key())
    }

    pub fn last_access(&self) -> Option<Instant> {
        self.checkout
            .as_ref()
            .map(|c| c.entry.checkouts.last_access())
    }

    pub fn is_valid(&self) -> bool {
        self.checkout.is_some()
    }

    /// Re-measure the payload after an in-place change and move the
    /// cache's memory usage by the difference. Returns the new footprint.
    pub fn refresh_footprint<D>(&mut self, source: &D) -> Option<u64>
    where
        D: DataSource<Key = K, Payload = P>,
    {
        let c = self.checkout.as_ref()?;
        let bytes = source.size_in_memory(Option::as_ref(&*c.payload)?);
        let old = c.entry.checkouts.swap_footprint(bytes);
        if bytes >= old {
            self.usage.fetch_add(bytes - old, Ordering::AcqRel);
        } else {
            self.usage.fetch_sub(old - bytes, Ordering::AcqRel);
        }
        Some(bytes)
    }

    /// Give the checkout and the write-token back. Calling this again is a
    /// no-op.
    pub fn release(&mut self) {
        if let Some(WriteCheckout {
            entry,
            payload,
            token,
            claim,
        }) = self.checkout.take()
        {
            drop(payload);
            entry.checkouts.put(token);
            drop(claim);
        }
    }
}

impl<'c, K, P> Drop for WriteHandle<'c, K, P> {
    fn drop(&mut self) {
        self.release();
    }
}
