//! Eviction engine: cooperative age-ordered passes, exclusive clears and
//! stub compaction.
//!
//! Cooperative passes evict one entry per acquisition of the table-token
//! and release it around every long wait, so other threads keep using the
//! cache. Evicted entries stay in the table as `PendingDeletion` stubs
//! until a request reloads them or compaction erases them.
//!
//! Exclusive passes hold the quiesce-token and the table-token for their
//! whole duration. They are meant for shutdown and reset.

use crate::cache::{EntryRef, SimpleCache, TableState};
use crate::entry::WriteClaim;
use crate::error::{Error, Result};
use crate::source::DataSource;
use crate::table::Slot;
use crate::tokens::EntryState;
use parking_lot::MutexGuard;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Which entries an eviction pass may evict, and when it stops. Shared by
/// `SimpleCache` and `UnsyncCache` so both pick victims the same way.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Sweep {
    /// Only entries idle for longer than this. `None` means every entry.
    pub(crate) older_than: Option<Duration>,
    /// Stop as soon as usage is at or below the memory limit.
    pub(crate) down_to_size: bool,
}

impl Sweep {
    /// Entries idle for longer than `age`; `Duration::ZERO` means all.
    pub(crate) fn older_than(age: Duration) -> Self {
        Self {
            older_than: (!age.is_zero()).then_some(age),
            down_to_size: false,
        }
    }

    /// Oldest first until usage fits the limit.
    pub(crate) fn down_to_size() -> Self {
        Self {
            older_than: None,
            down_to_size: true,
        }
    }

    pub(crate) fn is_candidate(&self, last_access: Instant, now: Instant) -> bool {
        match self.older_than {
            None => true,
            Some(age) => now.saturating_duration_since(last_access) > age,
        }
    }

    /// True once a size-bound pass has nothing left to do.
    pub(crate) fn satisfied(&self, usage: u64, limit: u64) -> bool {
        self.down_to_size && usage <= limit
    }
}

impl<D: DataSource> SimpleCache<D> {
    /// Evict entries idle for longer than `age`, oldest first, without
    /// locking the whole table. `Duration::ZERO` evicts every entry.
    ///
    /// Waits for outstanding handles on each victim to be released.
    /// Returns the number of entries evicted.
    pub fn remove_old_images(&self, age: Duration, source: &mut D) -> Result<usize, D::Error> {
        self.sweep(Sweep::older_than(age), source)
    }

    /// Evict the oldest entries until memory usage is at or below the
    /// memory limit, without locking the whole table.
    ///
    /// Returns the number of entries evicted.
    pub fn delete_objects_to_get_down_to_size(&self, source: &mut D) -> Result<usize, D::Error> {
        self.sweep(Sweep::down_to_size(), source)
    }

    fn sweep(&self, sweep: Sweep, source: &mut D) -> Result<usize, D::Error> {
        self.reentrancy.check();
        let mut evicted = 0;
        // Other threads may insert faster than we evict; never evict more
        // entries than the table held when the pass started.
        let mut bound = None;
        loop {
            if sweep.satisfied(self.memory_usage(), self.memory_limit()) {
                break;
            }
            let mut table = self.table.lock();
            let bound = *bound.get_or_insert(table.entries.len());
            if evicted >= bound {
                break;
            }
            let Some((entry, claim)) = self.claim_victim(&mut table, sweep)? else {
                break;
            };

            let bytes = entry.checkouts.swap_footprint(0);
            let usage = self
                .usage
                .fetch_sub(bytes, Ordering::AcqRel)
                .saturating_sub(bytes);
            entry.checkouts.set_state(EntryState::PendingDeletion);
            drop(table);

            // Cleanup runs with only the write-token held.
            let mut payload = entry.take_payload();
            if let Some(p) = payload.as_mut() {
                if let Err(e) = source.cleanup(p) {
                    warn!(key = ?entry.key(), error = %e, "cleanup during eviction failed");
                    return Err(Error::Cleanup(e));
                }
            }
            drop(payload);
            drop(claim);

            evicted += 1;
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = ?entry.key(), bytes, usage, "evicted");
        }
        Ok(evicted)
    }

    /// Walk live entries oldest first and return the first one that is
    /// still evictable once its write-token is held and its readers are
    /// gone. The table-token is released while waiting on each candidate.
    fn claim_victim(
        &self,
        table: &mut MutexGuard<'_, TableState<D>>,
        sweep: Sweep,
    ) -> Result<Option<(EntryRef<D>, WriteClaim)>, D::Error> {
        let mut candidates: Vec<(Instant, EntryRef<D>)> = table
            .entries
            .iter()
            .filter(|(_, _, e)| e.state() == EntryState::Live)
            .map(|(_, _, e)| (e.checkouts.last_access(), e.clone()))
            .collect();
        // Stable, so equal timestamps keep table order.
        candidates.sort_by_key(|(last_access, _)| *last_access);

        let now = Instant::now();
        for (last_access, entry) in candidates {
            if sweep.satisfied(self.memory_usage(), self.memory_limit()) {
                return Ok(None);
            }
            if !sweep.is_candidate(last_access, now) || entry.state() != EntryState::Live {
                continue;
            }

            table.pending_writers += 1;
            let claim = MutexGuard::unlocked(table, || {
                let claim = entry.claim();
                entry.checkouts.wait_until_idle();
                claim
            });
            table.pending_writers -= 1;
            if table.pending_writers == 0 {
                self.writers_drained.notify_all();
            }

            let still_mapped = table
                .entries
                .find(entry.key())
                .and_then(|slot| table.entries.get(slot))
                .map(|(_, e)| Arc::ptr_eq(e, &entry))
                .unwrap_or(false);
            if !still_mapped {
                warn!(key = ?entry.key(), "eviction candidate vanished from the table");
                return Err(Error::Corruption {
                    reason: format!(
                        "entry {:?} no longer matches its key after acquiring its write-token",
                        entry.key()
                    ),
                });
            }

            // Someone may have used or evicted it while we waited.
            if entry.state() != EntryState::Live
                || !sweep.is_candidate(entry.checkouts.last_access(), now)
            {
                trace!(key = ?entry.key(), "candidate no longer evictable");
                drop(claim);
                continue;
            }
            return Ok(Some((entry, claim)));
        }
        Ok(None)
    }

    /// Empty the cache, giving every payload the chance to clean up.
    ///
    /// Blocks new requests, waits for registered writers to be served,
    /// then waits for every outstanding handle to be released. Must not be
    /// called by a thread that still holds a handle from this cache.
    pub fn clear_cache(&self, source: &mut D) -> Result<(), D::Error> {
        let mut q = self.quiesce();
        let entries = Self::snapshot(&q.table);
        let total = entries.len();
        for (slot, entry) in entries {
            let _claim = entry.claim();
            self.uncharge(&entry);
            entry.checkouts.wait_until_idle();
            // Flag first so a failed cleanup leaves a stub that reloads.
            entry.checkouts.set_state(EntryState::PendingDeletion);
            if let Some(mut payload) = entry.take_payload() {
                if let Err(e) = source.cleanup(&mut payload) {
                    warn!(key = ?entry.key(), error = %e, "cleanup during clear failed");
                    return Err(Error::Cleanup(e));
                }
            }
            Self::erase(&mut q.table, slot, &entry);
        }
        self.usage.store(0, Ordering::Release);
        debug!(entries = total, "cache cleared");
        Ok(())
    }

    /// Empty the cache without calling `cleanup`. Outstanding read
    /// handles keep their payloads alive until they are released.
    pub fn clear_cache_without_cleanup(&self) {
        let mut q = self.quiesce();
        let entries = Self::snapshot(&q.table);
        let total = entries.len();
        for (slot, entry) in entries {
            let _claim = entry.claim();
            self.uncharge(&entry);
            Self::erase(&mut q.table, slot, &entry);
        }
        self.usage.store(0, Ordering::Release);
        debug!(entries = total, "cache cleared without cleanup");
    }

    fn snapshot(table: &TableState<D>) -> Vec<(Slot, EntryRef<D>)> {
        table
            .entries
            .iter()
            .map(|(slot, _, e)| (slot, e.clone()))
            .collect()
    }

    /// Stop charging the entry's footprint against the budget.
    fn uncharge(&self, entry: &EntryRef<D>) {
        let bytes = entry.checkouts.swap_footprint(0);
        self.usage.fetch_sub(bytes, Ordering::AcqRel);
    }

    /// Requires the entry's write-token and the table-token.
    fn erase(table: &mut TableState<D>, slot: Slot, entry: &EntryRef<D>) {
        entry.checkouts.set_state(EntryState::Erased);
        table.entries.remove(slot);
    }

    /// Physically erase every pending-deletion stub left behind by
    /// cooperative eviction. Locks the whole table while it runs.
    ///
    /// Returns the number of stubs erased.
    pub fn pause_everything_to_clean_up_internal_structures(&self) -> usize {
        let mut q = self.quiesce();
        let stubs: Vec<(Slot, EntryRef<D>)> = q
            .table
            .entries
            .iter()
            .filter(|(_, _, e)| e.state() == EntryState::PendingDeletion)
            .map(|(slot, _, e)| (slot, e.clone()))
            .collect();
        let mut erased = 0;
        for (slot, entry) in stubs {
            // An evictor may still be running cleanup on it.
            let _claim = entry.claim();
            if entry.state() != EntryState::PendingDeletion {
                continue;
            }
            Self::erase(&mut q.table, slot, &entry);
            erased += 1;
        }
        debug!(erased, remaining = q.table.entries.len(), "compacted stubs");
        erased
    }
}
