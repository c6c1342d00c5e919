//! UnsyncCache: the cache for a single owner thread.
//!
//! Same table, memory budget and eviction order as `SimpleCache`, with no
//! tokens, handles or two-phase deletion. Exclusive access comes from
//! `&mut self`, so a miss loads before anything is inserted and evicted
//! entries are erased on the spot.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::eviction::Sweep;
use crate::source::DataSource;
use crate::table::{Slot, Table};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct Resident<P> {
    payload: P,
    last_access: Instant,
    footprint: u64,
}

/// A memory-bounded cache of `D::Payload` keyed by `D::Key`, for callers
/// that never share it across threads.
pub struct UnsyncCache<D: DataSource> {
    entries: Table<D::Key, Resident<D::Payload>>,
    usage: u64,
    max_usage: u64,
}

impl<D: DataSource> Default for UnsyncCache<D> {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl<D: DataSource> UnsyncCache<D> {
    pub fn new(config: Config) -> Self {
        Self {
            entries: Table::new(),
            usage: 0,
            max_usage: config.max_memory_usage,
        }
    }

    pub fn with_memory_limit(bytes: u64) -> Self {
        Self::new(Config::with_max_memory_usage(bytes))
    }

    pub fn set_memory_limit(&mut self, bytes: u64) {
        self.max_usage = bytes;
    }

    pub fn memory_limit(&self) -> u64 {
        self.max_usage
    }

    pub fn memory_usage(&self) -> u64 {
        self.usage
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &D::Key) -> bool {
        self.entries.contains_key(key)
    }

    /// The payload for `id`, loading it on a miss.
    pub fn get_for_read(&mut self, id: &D::Id, source: &mut D) -> Result<&D::Payload, D::Error> {
        let slot = self.checkout(id, source)?;
        match self.entries.get(slot) {
            Some((_, r)) => Ok(&r.payload),
            None => Err(Error::Corruption {
                reason: "slot vanished right after checkout".to_string(),
            }),
        }
    }

    /// Mutable access to the payload for `id`, loading it on a miss. Call
    /// `refresh_footprint` afterwards if the change altered its size.
    pub fn get_for_write(
        &mut self,
        id: &D::Id,
        source: &mut D,
    ) -> Result<&mut D::Payload, D::Error> {
        let slot = self.checkout(id, source)?;
        match self.entries.get_mut(slot) {
            Some((_, r)) => Ok(&mut r.payload),
            None => Err(Error::Corruption {
                reason: "slot vanished right after checkout".to_string(),
            }),
        }
    }

    /// Re-measure a resident payload and move usage by the difference.
    /// Returns the new footprint, or `None` if `key` is not resident.
    pub fn refresh_footprint(&mut self, key: &D::Key, source: &D) -> Option<u64> {
        let slot = self.entries.find(key)?;
        let (_, r) = self.entries.get_mut(slot)?;
        let bytes = source.size_in_memory(&r.payload);
        let old = core::mem::replace(&mut r.footprint, bytes);
        self.usage = self.usage - old + bytes;
        Some(bytes)
    }

    fn checkout(&mut self, id: &D::Id, source: &mut D) -> Result<Slot, D::Error> {
        let key = source.key_of(id);
        let now = Instant::now();
        if let Some(slot) = self.entries.find(&key) {
            if let Some((_, r)) = self.entries.get_mut(slot) {
                r.last_access = now;
            }
            return Ok(slot);
        }

        let payload = match source.load(id) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(?key, error = %e, "load failed");
                return Err(Error::Load(e));
            }
        };
        let footprint = source.size_in_memory(&payload);
        let slot = self
            .entries
            .insert_with(key.clone(), || Resident {
                payload,
                last_access: now,
                footprint,
            })
            .map_err(|_| Error::Corruption {
                reason: format!("key {key:?} present after a miss"),
            })?;
        self.usage += footprint;
        debug!(?key, bytes = footprint, usage = self.usage, "loaded");
        Ok(slot)
    }

    /// Evict entries idle for longer than `age`, oldest first.
    /// `Duration::ZERO` evicts every entry. Returns the number evicted.
    pub fn remove_old_images(&mut self, age: Duration, source: &mut D) -> Result<usize, D::Error> {
        self.sweep(Sweep::older_than(age), source)
    }

    /// Evict the oldest entries until usage is at or below the limit.
    /// Returns the number evicted.
    pub fn delete_objects_to_get_down_to_size(&mut self, source: &mut D) -> Result<usize, D::Error> {
        self.sweep(Sweep::down_to_size(), source)
    }

    fn sweep(&mut self, sweep: Sweep, source: &mut D) -> Result<usize, D::Error> {
        let now = Instant::now();
        let mut victims: Vec<(Instant, Slot)> = self
            .entries
            .iter()
            .filter(|(_, _, r)| sweep.is_candidate(r.last_access, now))
            .map(|(slot, _, r)| (r.last_access, slot))
            .collect();
        // Stable, so equal timestamps keep table order.
        victims.sort_by_key(|(last_access, _)| *last_access);

        let mut evicted = 0;
        for (_, slot) in victims {
            if sweep.satisfied(self.usage, self.max_usage) {
                break;
            }
            let Some((key, mut r)) = self.entries.remove(slot) else {
                continue;
            };
            self.usage -= r.footprint;
            if let Err(e) = source.cleanup(&mut r.payload) {
                warn!(?key, error = %e, "cleanup during eviction failed");
                return Err(Error::Cleanup(e));
            }
            evicted += 1;
            debug!(?key, bytes = r.footprint, usage = self.usage, "evicted");
        }
        Ok(evicted)
    }

    /// Empty the cache, cleaning up every payload. Every entry is erased
    /// even if some cleanups fail; the first failure is returned.
    pub fn clear_cache(&mut self, source: &mut D) -> Result<(), D::Error> {
        let mut first_failure = None;
        let total = self.entries.len();
        for (key, mut r) in self.entries.drain() {
            if let Err(e) = source.cleanup(&mut r.payload) {
                warn!(?key, error = %e, "cleanup during clear failed");
                first_failure.get_or_insert(e);
            }
        }
        self.usage = 0;
        debug!(entries = total, "cache cleared");
        match first_failure {
            Some(e) => Err(Error::Cleanup(e)),
            None => Ok(()),
        }
    }

    /// Empty the cache without calling `cleanup`.
    pub fn clear_cache_without_cleanup(&mut self) {
        let total = self.entries.len();
        self.entries.drain().for_each(drop);
        self.usage = 0;
        debug!(entries = total, "cache cleared without cleanup");
    }
}
