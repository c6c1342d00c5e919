//! The capability contract the cache needs from whatever produces payloads.

use core::fmt::Debug;
use core::hash::Hash;

/// Supplies payloads to a [`SimpleCache`](crate::SimpleCache).
///
/// The cache owns no knowledge of how payloads are fetched; it only calls
/// these hooks. A source is passed by `&mut` into every cache operation
/// that may need to load or clean up, so each thread can bring its own
/// connection or file handle.
pub trait DataSource {
    /// Domain identifier the caller asks for.
    type Id: ?Sized;
    /// Table key derived from an id.
    type Key: Clone + Eq + Ord + Hash + Debug;
    /// The cached object.
    type Payload;
    type Error: std::error::Error + 'static;

    /// Map an id to its key. Must be deterministic and pure.
    fn key_of(&self, id: &Self::Id) -> Self::Key;

    /// Fetch the payload for `id`.
    fn load(&mut self, id: &Self::Id) -> Result<Self::Payload, Self::Error>;

    /// Release any external resources the payload holds. Called once
    /// before a payload is discarded (except by
    /// `clear_cache_without_cleanup`).
    fn cleanup(&mut self, payload: &mut Self::Payload) -> Result<(), Self::Error>;

    /// Bytes the payload occupies, charged against the memory limit.
    fn size_in_memory(&self, payload: &Self::Payload) -> u64;
}
