//! In-process chunk store.
//!
//! Holds every dataset in memory, split into fixed-size chunks at insert time.
//! Clones share the same storage, so a test can keep a handle for inserting
//! data while sessions read through an `Arc<dyn ChunkStore>`.

use crate::store::{
    Chunk, ChunkStore, DatasetInfo, DatasetKey, StoreError, StoreErrorKind, StoreResult,
};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

type ValueMap = Arc<RwLock<HashMap<DatasetKey, StoredValue>>>;

struct StoredValue {
    chunks: Vec<Chunk>,
    max_chunk_size: usize,
    is_chunked: bool,
}

#[derive(Clone, Default)]
pub struct MemoryChunkStore {
    values: ValueMap,
    fetches: Arc<AtomicU64>,
}

impl MemoryChunkStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A shared trait-object handle onto the same storage.
    #[must_use]
    pub fn shared(&self) -> Arc<dyn ChunkStore> {
        Arc::new(self.clone())
    }

    /// Store `bytes` as a chunked dataset with chunks of `max_chunk_size` bytes.
    /// The last chunk holds whatever is left over.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_chunk_size` is zero.
    pub fn put_dataset(
        &self,
        key: impl Into<DatasetKey>,
        bytes: &[u8],
        max_chunk_size: usize,
    ) -> StoreResult<DatasetKey> {
        self.insert_chunked(key.into(), bytes, max_chunk_size, false)
    }

    /// Like [`put_dataset`](Self::put_dataset), but a trailing remainder shorter
    /// than a full chunk is appended to the previous chunk instead of becoming
    /// its own chunk, so the final chunk can be up to twice the maximum size.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_chunk_size` is zero.
    pub fn put_dataset_folded(
        &self,
        key: impl Into<DatasetKey>,
        bytes: &[u8],
        max_chunk_size: usize,
    ) -> StoreResult<DatasetKey> {
        self.insert_chunked(key.into(), bytes, max_chunk_size, true)
    }

    /// Store `bytes` as a single unchunked value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn put_value(&self, key: impl Into<DatasetKey>, bytes: &[u8]) -> StoreResult<DatasetKey> {
        let key = key.into();
        let value = StoredValue {
            chunks: vec![Chunk::from(bytes)],
            max_chunk_size: bytes.len(),
            is_chunked: false,
        };
        self.write()?.insert(key.clone(), value);
        Ok(key)
    }

    /// Load a file from disk as a chunked dataset.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the chunk size is zero.
    pub fn put_file(
        &self,
        key: impl Into<DatasetKey>,
        path: impl AsRef<Path>,
        max_chunk_size: usize,
    ) -> Result<DatasetKey> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let key = self
            .put_dataset(key, &bytes, max_chunk_size)
            .with_context(|| format!("store {}", path.display()))?;
        Ok(key)
    }

    /// Remove a value; returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn remove(&self, key: &DatasetKey) -> StoreResult<bool> {
        Ok(self.write()?.remove(key).is_some())
    }

    /// Total number of successful chunk fetches served.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn reset_fetch_count(&self) {
        self.fetches.store(0, Ordering::Relaxed);
    }

    fn insert_chunked(
        &self,
        key: DatasetKey,
        bytes: &[u8],
        max_chunk_size: usize,
        fold_remainder: bool,
    ) -> StoreResult<DatasetKey> {
        if max_chunk_size == 0 {
            return Err(StoreError::new(
                StoreErrorKind::InvalidInput,
                format!("chunk size for {key} must be positive"),
            ));
        }
        let mut chunks: Vec<Chunk> = bytes.chunks(max_chunk_size).map(Chunk::from).collect();
        if fold_remainder
            && chunks.len() > 1
            && chunks.last().is_some_and(|c| c.len() < max_chunk_size)
        {
            let start = (chunks.len() - 2) * max_chunk_size;
            chunks.truncate(chunks.len() - 2);
            chunks.push(Chunk::from(&bytes[start..]));
        }
        let value = StoredValue {
            chunks,
            max_chunk_size,
            is_chunked: true,
        };
        self.write()?.insert(key.clone(), value);
        Ok(key)
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<DatasetKey, StoredValue>>> {
        self.values
            .read()
            .map_err(|_| StoreError::new(StoreErrorKind::Internal, "store lock poisoned"))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<DatasetKey, StoredValue>>> {
        self.values
            .write()
            .map_err(|_| StoreError::new(StoreErrorKind::Internal, "store lock poisoned"))
    }
}

impl ChunkStore for MemoryChunkStore {
    fn resolve(&self, key: &DatasetKey) -> StoreResult<DatasetInfo> {
        Ok(self
            .read()?
            .get(key)
            .map_or_else(DatasetInfo::missing, |v| DatasetInfo {
                exists: true,
                is_chunked: v.is_chunked,
                chunk_count: v.chunks.len(),
                max_chunk_size: v.max_chunk_size,
            }))
    }

    fn fetch_chunk(
        &self,
        key: &DatasetKey,
        index: usize,
        max_bytes: Option<usize>,
    ) -> StoreResult<Option<Chunk>> {
        let values = self.read()?;
        let Some(chunk) = values.get(key).and_then(|v| v.chunks.get(index)) else {
            return Ok(None);
        };
        let chunk = match max_bytes {
            Some(n) if n < chunk.len() => Chunk::from(&chunk[..n]),
            _ => Arc::clone(chunk),
        };
        drop(values);
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(Some(chunk))
    }
}
