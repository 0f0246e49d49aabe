//! Chunk store abstraction consumed by the parser.
//!
//! The parser never owns the dataset's bytes. It talks to a [`ChunkStore`]
//! that hands out immutable chunks by `(dataset key, chunk index)`. The store
//! itself (replication, placement, atomic append) lives outside this crate;
//! only the read side is modelled here.
//!
//! ## Contract
//!
//! - [`ChunkStore::resolve`] reports whether a key exists, whether it is a
//!   chunked value, how many chunks it has and the per-chunk size ceiling.
//! - [`ChunkStore::fetch_chunk`] returns a chunk's bytes, or `Ok(None)` when the
//!   chunk does not exist. `max_bytes` lets callers ask for a short prefix
//!   (the parser's lookahead is at most [`LOOKAHEAD_BYTES`]).
//! - [`ChunkStore::chunk_offset`] and [`ChunkStore::chunk_index`] place a chunk
//!   in the dataset's logical byte space.
//!
//! Every chunk except the last is exactly `max_chunk_size` bytes long. The last
//! chunk may be shorter, or longer when the store folds a short remainder into
//! it.
//!
//! Chunks are shared as `Arc<[u8]>` snapshots, so any number of sessions may
//! hold the same chunk without coordination.
//!
//! ## Implementations
//!
//! - [`MemoryChunkStore`] keeps everything in process memory and is what the
//!   tests and single-node tools use.

pub mod memory;

pub use memory::MemoryChunkStore;

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Size cap for the short lookahead fetched past the end of a session's range.
pub const LOOKAHEAD_BYTES: usize = 1024;

/// Immutable chunk bytes as returned by the store.
pub type Chunk = Arc<[u8]>;

// ============================================================================
// Error Type
// ============================================================================

/// Error raised by a chunk store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// A key or chunk that was expected to exist is gone.
    NotFound,
    /// A chunk's size disagrees with the dataset layout.
    Corrupt,
    /// The caller passed something the store cannot accept.
    InvalidInput,
    /// The store could not be reached.
    Unavailable,
    Internal,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for StoreError {}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, message)
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Corrupt, message)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Keys
// ============================================================================

/// Name of a logical dataset. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetKey(Arc<str>);

impl DatasetKey {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of this dataset's chunk `index`.
    #[must_use]
    pub fn chunk(&self, index: usize) -> ChunkKey {
        ChunkKey::new(self.clone(), index)
    }
}

impl From<&str> for DatasetKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for DatasetKey {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&DatasetKey> for DatasetKey {
    fn from(key: &DatasetKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of a single chunk of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub dataset: DatasetKey,
    pub index: usize,
}

impl ChunkKey {
    pub fn new(dataset: impl Into<DatasetKey>, index: usize) -> Self {
        Self {
            dataset: dataset.into(),
            index,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.dataset, self.index)
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// What [`ChunkStore::resolve`] knows about a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetInfo {
    pub exists: bool,
    /// `false` for a plain value stored as a single buffer.
    pub is_chunked: bool,
    pub chunk_count: usize,
    pub max_chunk_size: usize,
}

impl DatasetInfo {
    #[must_use]
    pub const fn missing() -> Self {
        Self {
            exists: false,
            is_chunked: false,
            chunk_count: 0,
            max_chunk_size: 0,
        }
    }
}

/// Read side of a chunked key-value store.
///
/// Implementations must be safe to share between the worker threads of a
/// tiled parse; every method takes `&self`.
pub trait ChunkStore: Send + Sync {
    /// Describe the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried. A missing key is not an
    /// error; it resolves to [`DatasetInfo::missing`].
    fn resolve(&self, key: &DatasetKey) -> StoreResult<DatasetInfo>;

    /// Fetch chunk `index` of `key`, truncated to `max_bytes` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried. A missing chunk is
    /// reported as `Ok(None)`.
    fn fetch_chunk(
        &self,
        key: &DatasetKey,
        index: usize,
        max_bytes: Option<usize>,
    ) -> StoreResult<Option<Chunk>>;

    /// Logical offset of the chunk's first byte.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset cannot be resolved.
    fn chunk_offset(&self, chunk: &ChunkKey) -> StoreResult<u64> {
        let info = self.resolve(&chunk.dataset)?;
        if !info.exists {
            return Err(StoreError::not_found(format!("dataset {} not found", chunk.dataset)));
        }
        Ok(chunk.index as u64 * info.max_chunk_size as u64)
    }

    /// Position of the chunk within its dataset.
    fn chunk_index(&self, chunk: &ChunkKey) -> usize {
        chunk.index
    }
}
