use thiserror::Error;

/// Errors surfaced by cache operations, generic over the source's error.
///
/// Lock and idle waits are never errors; they block until satisfied.
#[derive(Debug, Error)]
pub enum Error<E> {
    /// `DataSource::load` failed. The entry was marked for deletion and is
    /// never handed to another caller.
    #[error("load failed: {0}")]
    Load(#[source] E),
    /// `DataSource::cleanup` failed during eviction, reload or clear.
    #[error("cleanup failed: {0}")]
    Cleanup(#[source] E),
    /// An internal consistency check failed; the current pass was aborted.
    #[error("cache corrupted: {reason}")]
    Corruption { reason: String },
}

pub type Result<T, E> = core::result::Result<T, Error<E>>;
