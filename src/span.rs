//! Deferred text: field spans and the chunk source they read through.
//!
//! A [`FieldSpan`] is an owned `(dataset, logical offset, length)` triple. It
//! never borrows a chunk buffer, because the chunk it points into may have
//! been slid out of the session's window by the time the caller looks at it.
//! Reading a span goes through its [`ChunkSource`], which serves chunks the
//! session currently holds and fetches anything else from the store.
//!
//! Quoted fields that contained doubled quotes (`"a""b"`) keep their raw byte
//! range and count the doubled pairs; every read collapses those pairs, so the
//! span behaves like the text `a"b`.

use crate::error::{ParseError, ParseResult};
use crate::layout::ChunkLayout;
use crate::store::{Chunk, ChunkStore, DatasetKey, StoreError};
use std::cmp::Ordering;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone)]
pub(crate) struct ResidentChunk {
    pub index: usize,
    pub bytes: Chunk,
    /// `false` when `bytes` is a truncated prefix of the chunk.
    pub complete: bool,
}

/// Per-session handle on one dataset's chunks.
///
/// Shared by the session and every span it hands out. The session pins the
/// chunks of its current window here so that span reads inside the window
/// cost no fetch.
pub struct ChunkSource {
    store: Arc<dyn ChunkStore>,
    key: DatasetKey,
    layout: ChunkLayout,
    resident: RwLock<[Option<ResidentChunk>; 2]>,
    fetches: AtomicU64,
}

impl fmt::Debug for ChunkSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkSource")
            .field("key", &self.key)
            .field("layout", &self.layout)
            .field("fetches", &self.fetch_count())
            .finish_non_exhaustive()
    }
}

impl ChunkSource {
    pub(crate) fn new(store: Arc<dyn ChunkStore>, key: DatasetKey, layout: ChunkLayout) -> Self {
        Self {
            store,
            key,
            layout,
            resident: RwLock::new([None, None]),
            fetches: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn key(&self) -> &DatasetKey {
        &self.key
    }

    #[must_use]
    pub const fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    /// Number of store fetches issued through this source.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(AtomicOrdering::Relaxed)
    }

    /// Fetch chunk `index` from the store, failing if it is missing.
    ///
    /// A full fetch of any chunk but the last must come back exactly
    /// `max_chunk_size` bytes long, otherwise logical offsets would drift.
    pub(crate) fn fetch(&self, index: usize, max_bytes: Option<usize>) -> ParseResult<Chunk> {
        let chunk = self
            .store
            .fetch_chunk(&self.key, index, max_bytes)?
            .ok_or_else(|| StoreError::not_found(format!("chunk {}#{index} not found", self.key)))?;
        self.fetches.fetch_add(1, AtomicOrdering::Relaxed);
        if self.layout.is_chunked
            && !self.layout.is_last(index)
            && chunk.len() != self.layout.max_chunk_size
            && max_bytes.is_none_or(|n| chunk.len() < n.min(self.layout.max_chunk_size))
        {
            return Err(StoreError::corrupt(format!(
                "chunk {}#{index} holds {} bytes, expected {}",
                self.key,
                chunk.len(),
                self.layout.max_chunk_size
            ))
            .into());
        }
        Ok(chunk)
    }

    pub(crate) fn pin(&self, current: ResidentChunk, next: Option<ResidentChunk>) {
        *self.slots_mut() = [Some(current), next];
    }

    pub(crate) fn release(&self) {
        *self.slots_mut() = [None, None];
    }

    // The slots are only ever replaced whole, so a poisoned lock still holds
    // a usable pair.
    fn slots(&self) -> RwLockReadGuard<'_, [Option<ResidentChunk>; 2]> {
        self.resident.read().unwrap_or_else(|poisoned| {
            log::debug!("{}: resident chunk lock poisoned, recovering", self.key);
            PoisonError::into_inner(poisoned)
        })
    }

    fn slots_mut(&self) -> RwLockWriteGuard<'_, [Option<ResidentChunk>; 2]> {
        self.resident.write().unwrap_or_else(|poisoned| {
            log::debug!("{}: resident chunk lock poisoned, recovering", self.key);
            PoisonError::into_inner(poisoned)
        })
    }

    /// Bytes of chunk `index`, at least the first `min_len` of them when the
    /// chunk is that long.
    fn chunk(&self, index: usize, min_len: usize) -> ParseResult<Chunk> {
        let hit = self
            .slots()
            .iter()
            .flatten()
            .find(|c| c.index == index && (c.complete || c.bytes.len() >= min_len))
            .map(|c| Arc::clone(&c.bytes));
        match hit {
            Some(bytes) => Ok(bytes),
            None => self.fetch(index, Some(min_len)),
        }
    }

    /// Walk the raw bytes of `[offset, offset + len)` chunk by chunk.
    pub(crate) fn for_each_segment(
        &self,
        offset: u64,
        len: usize,
        mut f: impl FnMut(&[u8]) -> ControlFlow<()>,
    ) -> ParseResult<()> {
        let mut pos = offset;
        let mut remaining = len;
        while remaining > 0 {
            let (index, intra) = self.layout.locate(pos);
            let chunk = self.chunk(index, intra + remaining)?;
            let available = chunk.len().saturating_sub(intra);
            let take = available.min(remaining);
            if take == 0 {
                return Err(StoreError::corrupt(format!(
                    "dataset {} ends before offset {pos}",
                    self.key
                ))
                .into());
            }
            if f(&chunk[intra..intra + take]).is_break() {
                return Ok(());
            }
            pos += take as u64;
            remaining -= take;
        }
        Ok(())
    }

    /// Copy `[offset, offset + len)` out of the store.
    pub(crate) fn read_range(&self, offset: u64, len: usize) -> ParseResult<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        self.for_each_segment(offset, len, |seg| {
            out.extend_from_slice(seg);
            ControlFlow::Continue(())
        })?;
        Ok(out)
    }
}

/// Zero-copy reference to a field's text.
///
/// Equality is identity of the referenced range: two spans are equal when they
/// point at the same bytes of the same dataset. Use
/// [`compare_bytes`](Self::compare_bytes) or [`eq_bytes`](Self::eq_bytes) to
/// compare contents.
#[derive(Clone)]
pub struct FieldSpan {
    source: Arc<ChunkSource>,
    offset: u64,
    raw_len: usize,
    escapes: usize,
}

impl FieldSpan {
    pub(crate) const fn new(
        source: Arc<ChunkSource>,
        offset: u64,
        raw_len: usize,
        escapes: usize,
    ) -> Self {
        Self {
            source,
            offset,
            raw_len,
            escapes,
        }
    }

    #[must_use]
    pub fn dataset(&self) -> &DatasetKey {
        self.source.key()
    }

    /// Logical offset of the first raw byte.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of bytes the span covers in the dataset.
    #[must_use]
    pub const fn raw_len(&self) -> usize {
        self.raw_len
    }

    /// Length of the text after doubled quotes are collapsed.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.raw_len - self.escapes
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feed every text byte to `f`, collapsing doubled quotes.
    fn walk(&self, mut f: impl FnMut(u8) -> ControlFlow<()>) -> ParseResult<()> {
        let mut collapsed = 0usize;
        let mut after_quote = false;
        self.source.for_each_segment(self.offset, self.raw_len, |seg| {
            for &b in seg {
                if self.escapes > collapsed && after_quote && b == b'"' {
                    collapsed += 1;
                    after_quote = false;
                    continue;
                }
                after_quote = b == b'"';
                if f(b).is_break() {
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        })
    }

    /// Byte `index` of the text.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is past the end or a chunk cannot be fetched.
    pub fn byte_at(&self, index: usize) -> ParseResult<u8> {
        let len = self.len();
        if index >= len {
            return Err(ParseError::SpanOutOfBounds { index, len });
        }
        if self.escapes == 0 {
            let (chunk, intra) = self.source.layout().locate(self.offset + index as u64);
            let bytes = self.source.chunk(chunk, intra + 1)?;
            return bytes.get(intra).copied().ok_or_else(|| {
                StoreError::corrupt(format!("chunk {}#{chunk} too short", self.dataset())).into()
            });
        }
        let mut seen = 0usize;
        let mut found = None;
        self.walk(|b| {
            if seen == index {
                found = Some(b);
                return ControlFlow::Break(());
            }
            seen += 1;
            ControlFlow::Continue(())
        })?;
        found.ok_or(ParseError::SpanOutOfBounds { index, len })
    }

    /// The text as bytes, doubled quotes collapsed.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk cannot be fetched.
    pub fn to_bytes(&self) -> ParseResult<Vec<u8>> {
        if self.escapes == 0 {
            return self.source.read_range(self.offset, self.raw_len);
        }
        let mut out = Vec::with_capacity(self.len());
        self.walk(|b| {
            out.push(b);
            ControlFlow::Continue(())
        })?;
        Ok(out)
    }

    /// Materialize the text. Invalid UTF-8 is replaced, not rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk cannot be fetched.
    pub fn materialize(&self) -> ParseResult<String> {
        let bytes = self.to_bytes()?;
        Ok(String::from_utf8(bytes)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
    }

    /// Span over text bytes `[start, end)`; no bytes are copied.
    ///
    /// # Errors
    ///
    /// Returns an error if the bounds are invalid.
    pub fn sub_span(&self, start: usize, end: usize) -> ParseResult<Self> {
        let len = self.len();
        if start > end || end > len {
            return Err(ParseError::SpanOutOfBounds {
                index: end.max(start),
                len,
            });
        }
        if self.escapes == 0 {
            return Ok(Self::new(
                Arc::clone(&self.source),
                self.offset + start as u64,
                end - start,
                0,
            ));
        }

        // Map text positions to raw positions; a collapsed pair maps to its
        // first quote.
        let mut raw = 0usize;
        let mut text = 0usize;
        let mut raw_start = None;
        let mut raw_end = self.raw_len;
        let mut escapes_inside = 0usize;
        let mut collapsed = 0usize;
        let mut after_quote = false;
        self.source.for_each_segment(self.offset, self.raw_len, |seg| {
            for &b in seg {
                if self.escapes > collapsed && after_quote && b == b'"' {
                    collapsed += 1;
                    after_quote = false;
                    if raw_start.is_some() {
                        escapes_inside += 1;
                    }
                    raw += 1;
                    continue;
                }
                if text == start && raw_start.is_none() {
                    raw_start = Some(raw);
                }
                if text == end {
                    raw_end = raw;
                    return ControlFlow::Break(());
                }
                after_quote = b == b'"';
                text += 1;
                raw += 1;
            }
            ControlFlow::Continue(())
        })?;
        let raw_start = raw_start.unwrap_or(raw_end);
        Ok(Self::new(
            Arc::clone(&self.source),
            self.offset + raw_start as u64,
            raw_end - raw_start,
            escapes_inside,
        ))
    }

    /// Three-way lexicographic comparison of the text against `other`.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk cannot be fetched.
    pub fn compare_bytes(&self, other: &[u8]) -> ParseResult<Ordering> {
        let mut i = 0usize;
        let mut decided = None;
        self.walk(|b| {
            let Some(&o) = other.get(i) else {
                decided = Some(Ordering::Greater);
                return ControlFlow::Break(());
            };
            match b.cmp(&o) {
                Ordering::Equal => {
                    i += 1;
                    ControlFlow::Continue(())
                }
                ord => {
                    decided = Some(ord);
                    ControlFlow::Break(())
                }
            }
        })?;
        Ok(decided.unwrap_or_else(|| i.cmp(&other.len())))
    }

    /// # Errors
    ///
    /// Returns an error if a chunk cannot be fetched.
    pub fn eq_bytes(&self, other: &[u8]) -> ParseResult<bool> {
        if self.len() != other.len() {
            return Ok(false);
        }
        Ok(self.compare_bytes(other)? == Ordering::Equal)
    }
}

impl PartialEq for FieldSpan {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
            && self.raw_len == other.raw_len
            && self.source.key() == other.source.key()
    }
}

impl Eq for FieldSpan {}

impl fmt::Debug for FieldSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpan")
            .field("dataset", self.dataset())
            .field("offset", &self.offset)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryChunkStore;
    use std::panic::{self, AssertUnwindSafe};

    fn source(bytes: &[u8], chunk_size: usize) -> ChunkSource {
        let store = MemoryChunkStore::new();
        let key = store.put_dataset("d", bytes, chunk_size).expect("store dataset");
        let info = store.resolve(&key).expect("resolve");
        ChunkSource::new(store.shared(), key, ChunkLayout::from_info(&info))
    }

    #[test]
    fn pinned_chunk_is_served_without_a_fetch() {
        let source = source(b"abcdef", 3);
        source.pin(
            ResidentChunk {
                index: 0,
                bytes: Chunk::from(&b"abc"[..]),
                complete: true,
            },
            None,
        );
        assert_eq!(source.read_range(0, 3).expect("read"), b"abc");
        assert_eq!(source.fetch_count(), 0);

        assert_eq!(source.read_range(3, 3).expect("read"), b"def");
        assert_eq!(source.fetch_count(), 1);
    }

    #[test]
    fn pin_and_release_survive_a_poisoned_lock() {
        let source = source(b"abcdef", 3);
        let _ = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = source.resident.write();
            panic!("writer died holding the resident slots");
        }));
        assert!(source.resident.is_poisoned());

        source.pin(
            ResidentChunk {
                index: 0,
                bytes: Chunk::from(&b"abc"[..]),
                complete: true,
            },
            None,
        );
        assert_eq!(source.read_range(0, 3).expect("read"), b"abc");
        assert_eq!(source.fetch_count(), 0);

        source.release();
        assert_eq!(source.read_range(0, 3).expect("read"), b"abc");
        assert_eq!(source.fetch_count(), 1);
    }
}
