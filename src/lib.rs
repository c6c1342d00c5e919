//! simple-cache: a thread-safe, memory-bounded object cache that sits in
//! front of an expensive loader and locks per entry rather than globally.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: serve concurrent readers and writers of expensive-to-load
//!   objects while keeping unrelated keys available when one key is being
//!   loaded, written or evicted.
//! - Layers:
//!   - Table<K, V, S>: structural map with generational slot handles
//!     (slotmap storage, hashbrown index with stored hashes). Unsynchronized.
//!   - Entry: one payload slot plus its write-token, metadata-token
//!     (`tokens::CheckoutCount`) and tagged state.
//!   - SimpleCache<D>: the table behind the table-token, the quiesce-token
//!     for exclusive passes, a pending-writer counter and memory accounting.
//!   - ReadHandle / WriteHandle: scoped checkouts that give everything back
//!     exactly once on release or drop.
//!   - UnsyncCache<D>: the same table, budget and eviction order with no
//!     locks at all, for a cache owned by one thread. It borrows payloads
//!     out through `&mut self` instead of handing out handles.
//!
//! Locks, in acquisition order
//! - quiesce-token: held by exclusive passes (clear, compaction); every
//!   request passes through it first.
//! - table-token: guards the map and `pending_writers`. Held only for short
//!   sections. Released around loads and around every wait on an entry.
//! - write-token (per entry): at most one writer, loader or evictor.
//!   Readers pass through it too, which keeps a read from overtaking a
//!   write that started waiting earlier.
//! - payload slot (per entry): `RwLock` whose guards live inside handles.
//! - metadata-token (per entry): checkout count, last access, state and
//!   charged footprint. Signals a condition variable when the count drops
//!   to zero.
//!
//! A thread holding a write-token re-takes the table-token only while it is
//! registered in `pending_writers`. Exclusive passes wait for that counter
//! to drain before taking write-tokens under the table-token, which is what
//! makes the inversion deadlock-free.
//!
//! Two-phase deletion
//! - Cooperative eviction cleans up a payload and marks its entry
//!   `PendingDeletion` without erasing it, since it no longer holds the
//!   table-token by then. The next request for that key reloads it in
//!   place; `pause_everything_to_clean_up_internal_structures` erases the
//!   stubs nobody asked for again.
//! - Exclusive clears erase entries immediately.
//!
//! Memory accounting
//! - Each entry records the footprint it charged when loaded. Eviction
//!   subtracts exactly that, and `WriteHandle::refresh_footprint` moves it
//!   after an in-place change, so usage never drifts from the sum of
//!   footprints of loaded entries.
//!
//! Notes and non-goals
//! - No cross-process sharing or persistence.
//! - Eviction order is approximately oldest-first by last checkout.
//! - No fairness among concurrent writers of one key.
//! - Waits have no timeout. A thread that calls an eviction or clear while
//!   it still holds a handle on an affected entry waits on itself.

mod cache;
mod config;
mod entry;
mod error;
mod eviction;
mod handle;
mod reentrancy;
mod source;
mod table;
mod table_proptest;
pub mod tokens;
mod unsync;

// Public surface
pub use cache::{CacheStats, SimpleCache};
pub use config::Config;
pub use error::{Error, Result};
pub use handle::{ReadHandle, WriteHandle};
pub use source::DataSource;
pub use tokens::EntryState;
pub use unsync::UnsyncCache;
