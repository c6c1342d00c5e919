//! SimpleCache: the lookup-or-create path and the coordination tokens.

use crate::config::Config;
use crate::entry::{Entry, WriteClaim};
use crate::error::{Error, Result};
use crate::handle::{ReadHandle, WriteHandle};
use crate::reentrancy::{DebugReentrancy, ReentrancyGuard};
use crate::source::DataSource;
use crate::table::Table;
use crate::tokens::EntryState;
use core::marker::PhantomData;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub(crate) type EntryRef<D> = Arc<Entry<<D as DataSource>::Key, <D as DataSource>::Payload>>;

/// Everything guarded by the table-token.
pub(crate) struct TableState<D: DataSource> {
    pub(crate) entries: Table<D::Key, EntryRef<D>>,
    /// Threads that registered under the table-token and then released it
    /// to wait on some entry's write-token. Exclusive passes wait for this
    /// to drain before they take write-tokens under the table-token.
    pub(crate) pending_writers: usize,
}

/// A thread-safe, memory-bounded cache of `D::Payload` keyed by `D::Key`.
///
/// Lookups lock the table only long enough to find or insert an entry;
/// loading, waiting for a writer and waiting for readers all happen with
/// the table-token released, so unrelated keys stay available.
pub struct SimpleCache<D: DataSource> {
    pub(crate) quiesce: Mutex<()>,
    pub(crate) table: Mutex<TableState<D>>,
    pub(crate) writers_drained: Condvar,
    pub(crate) usage: AtomicU64,
    pub(crate) max_usage: AtomicU64,
    pub(crate) reentrancy: DebugReentrancy,
    pub(crate) counters: Counters,
    _source: PhantomData<fn(&mut D)>,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) loads: AtomicU64,
    pub(crate) hits: AtomicU64,
    pub(crate) evictions: AtomicU64,
}

/// Point-in-time view of the cache, taken under the table-token.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    /// Rows in the table, including pending-deletion stubs.
    pub entries: usize,
    pub pending_deletion: usize,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub loads: u64,
    pub hits: u64,
    pub evictions: u64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Access {
    Read,
    Write,
}

/// The quiesce-token and table-token held together with pending writers
/// drained. Fields drop in declaration order: table first.
pub(crate) struct Quiesced<'a, D: DataSource> {
    pub(crate) table: MutexGuard<'a, TableState<D>>,
    _reentry: ReentrancyGuard<'a>,
    _quiesce: MutexGuard<'a, ()>,
}

impl<D: DataSource> Default for SimpleCache<D> {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl<D: DataSource> SimpleCache<D> {
    pub fn new(config: Config) -> Self {
        Self {
            quiesce: Mutex::new(()),
            table: Mutex::new(TableState {
                entries: Table::new(),
                pending_writers: 0,
            }),
            writers_drained: Condvar::new(),
            usage: AtomicU64::new(0),
            max_usage: AtomicU64::new(config.max_memory_usage),
            reentrancy: DebugReentrancy::new(),
            counters: Counters::default(),
            _source: PhantomData,
        }
    }

    pub fn with_memory_limit(bytes: u64) -> Self {
        Self::new(Config::with_max_memory_usage(bytes))
    }

    pub fn set_memory_limit(&self, bytes: u64) {
        self.max_usage.store(bytes, Ordering::Release);
    }

    pub fn memory_limit(&self) -> u64 {
        self.max_usage.load(Ordering::Acquire)
    }

    /// Bytes currently charged by loaded entries.
    pub fn memory_usage(&self) -> u64 {
        self.usage.load(Ordering::Acquire)
    }

    /// Rows in the table, including pending-deletion stubs that have not
    /// been compacted yet.
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().entries.is_empty()
    }

    /// True if `key` is present and loaded.
    pub fn contains_key(&self, key: &D::Key) -> bool {
        let table = self.table.lock();
        table
            .entries
            .find(key)
            .and_then(|slot| table.entries.get(slot))
            .map(|(_, e)| e.state() == EntryState::Live)
            .unwrap_or(false)
    }

    pub fn stats(&self) -> CacheStats {
        let table = self.table.lock();
        let pending_deletion = table
            .entries
            .iter()
            .filter(|(_, _, e)| e.state() == EntryState::PendingDeletion)
            .count();
        CacheStats {
            entries: table.entries.len(),
            pending_deletion,
            memory_usage: self.memory_usage(),
            memory_limit: self.memory_limit(),
            loads: self.counters.loads.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Shared access to the payload for `id`, loading it on a miss.
    ///
    /// Blocks while a writer, loader or evictor holds the entry.
    pub fn get_for_read(
        &self,
        id: &D::Id,
        source: &mut D,
    ) -> Result<ReadHandle<'_, D::Key, D::Payload>, D::Error> {
        let (entry, claim) = self.acquire(id, source, Access::Read)?;
        Ok(ReadHandle::new(entry, claim))
    }

    /// Exclusive access to the payload for `id`, loading it on a miss.
    ///
    /// Blocks until every outstanding handle on the entry is released.
    pub fn get_for_write(
        &self,
        id: &D::Id,
        source: &mut D,
    ) -> Result<WriteHandle<'_, D::Key, D::Payload>, D::Error> {
        let (entry, claim) = self.acquire(id, source, Access::Write)?;
        Ok(WriteHandle::new(entry, claim, &self.usage))
    }

    /// Resolve `id` to a loaded, live entry and return it with its
    /// write-token held. For write access the entry also has no
    /// outstanding checkouts.
    fn acquire(
        &self,
        id: &D::Id,
        source: &mut D,
        access: Access,
    ) -> Result<(EntryRef<D>, WriteClaim), D::Error> {
        self.reentrancy.check();
        let key = source.key_of(id);

        // Wait out any exclusive pass; it will have finished before we look.
        drop(self.quiesce.lock());
        let mut table = self.table.lock();

        let found = table
            .entries
            .find(&key)
            .and_then(|slot| table.entries.get(slot))
            .map(|(_, e)| e.clone());

        let entry = match found {
            Some(entry) => entry,
            None => {
                let entry = Arc::new(Entry::stub(key.clone()));
                if table
                    .entries
                    .insert_with(key, || entry.clone())
                    .is_err()
                {
                    return Err(Error::Corruption {
                        reason: format!("key {:?} appeared while the table was locked", entry.key()),
                    });
                }
                let claim = entry.claim();
                drop(table);
                trace!(key = ?entry.key(), "miss");
                self.load_into(&entry, id, source)?;
                return Ok((entry, claim));
            }
        };

        // Queue behind whoever holds the write-token, readers included, so a
        // read cannot overtake a write that started waiting earlier.
        table.pending_writers += 1;
        let claim = MutexGuard::unlocked(&mut table, || {
            let claim = entry.claim();
            if access == Access::Write {
                entry.checkouts.wait_until_idle();
            }
            claim
        });
        table.pending_writers -= 1;
        if table.pending_writers == 0 {
            self.writers_drained.notify_all();
        }

        match entry.state() {
            EntryState::Live => {
                drop(table);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = ?entry.key(), ?access, "hit");
                Ok((entry, claim))
            }
            // Evicted, failed, or abandoned by a loader that panicked.
            EntryState::PendingDeletion | EntryState::Loading => {
                entry.checkouts.set_state(EntryState::Loading);
                drop(table);
                entry.checkouts.wait_until_idle();
                self.reload(&entry, id, source)?;
                Ok((entry, claim))
            }
            EntryState::Erased => {
                warn!(key = ?entry.key(), "entry erased while a request was registered on it");
                Err(Error::Corruption {
                    reason: format!("entry {:?} erased while a request was pending", entry.key()),
                })
            }
        }
    }

    /// Clean up whatever a pending-deletion entry still holds, then load it
    /// again. The caller holds the write-token.
    fn reload(&self, entry: &EntryRef<D>, id: &D::Id, source: &mut D) -> Result<(), D::Error> {
        if let Some(mut stale) = entry.take_payload() {
            if let Err(e) = source.cleanup(&mut stale) {
                entry.checkouts.set_state(EntryState::PendingDeletion);
                warn!(key = ?entry.key(), error = %e, "cleanup before reload failed");
                return Err(Error::Cleanup(e));
            }
        }
        debug!(key = ?entry.key(), "reloading pending-deletion entry");
        self.load_into(entry, id, source)
    }

    /// Run `load` with the write-token held and the table-token released,
    /// then publish the payload and charge its footprint.
    fn load_into(&self, entry: &EntryRef<D>, id: &D::Id, source: &mut D) -> Result<(), D::Error> {
        let payload = match source.load(id) {
            Ok(payload) => payload,
            Err(e) => {
                // The table-token is gone, so the stub cannot be erased
                // here. Flag it; the next request reloads it.
                entry.checkouts.set_state(EntryState::PendingDeletion);
                warn!(key = ?entry.key(), error = %e, "load failed");
                return Err(Error::Load(e));
            }
        };
        let bytes = source.size_in_memory(&payload);
        *entry.exclusive() = Some(payload);
        entry.checkouts.swap_footprint(bytes);
        entry.checkouts.touch();
        entry.checkouts.set_state(EntryState::Live);
        let usage = self.usage.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.counters.loads.fetch_add(1, Ordering::Relaxed);
        debug!(key = ?entry.key(), bytes, usage, limit = self.memory_limit(), "loaded");
        Ok(())
    }

    /// Take the quiesce-token, then the table-token once no registered
    /// writer is still waiting on an entry.
    pub(crate) fn quiesce(&self) -> Quiesced<'_, D> {
        self.reentrancy.check();
        let quiesce = self.quiesce.lock();
        let mut table = self.table.lock();
        while table.pending_writers > 0 {
            trace!(pending = table.pending_writers, "waiting for pending writers");
            self.writers_drained.wait(&mut table);
        }
        Quiesced {
            table,
            _reentry: self.reentrancy.enter(),
            _quiesce: quiesce,
        }
    }
}
