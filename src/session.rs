//! Parser sessions: one forward-only parse over a chunk range.
//!
//! A session holds a window of at most two chunks, the current one and the
//! one after it. The window slides one chunk at a time as the cursor moves;
//! fields that began in a chunk which has since slid out stay addressable by
//! their logical offsets and are read back through the session's
//! [`ChunkSource`].
//!
//! ## Ranges
//!
//! A session over `[min, max)` skips the record under the first byte of chunk
//! `min` (unless `min` is 0) and stops after the last record that starts at or
//! before the first byte of chunk `max`. Sessions whose ranges tile a dataset
//! therefore see every record exactly once between them.
//!
//! ```
//! use chunked_csv::{ChunkStore, MemoryChunkStore, ParseRange, ParserConfig, ParserSession, RecordShape};
//!
//! let store = MemoryChunkStore::new();
//! let key = store.put_dataset("people", b"ada,36\ngrace,85\nalan,41\n", 8)?;
//! let shape = RecordShape::parse("text,int")?;
//! let chunks = store.resolve(&key)?.chunk_count;
//!
//! let mut total = 0;
//! for range in ParseRange::tile(chunks, 2) {
//!     let session = ParserSession::open_range(store.shared(), &key, shape.clone(), ParserConfig::default(), range)?;
//!     for record in session {
//!         total += record?.int(1).unwrap_or_default();
//!     }
//! }
//! assert_eq!(total, 36 + 85 + 41);
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::config::{ColumnType, ParserConfig, RecordShape};
use crate::error::{ParseError, ParseResult};
use crate::layout::{ChunkLayout, ParseRange};
use crate::numeric::{DecimalScanner, scan_int};
use crate::record::{Record, Value};
use crate::span::{ChunkSource, FieldSpan, ResidentChunk};
use crate::store::{Chunk, ChunkKey, ChunkStore, DatasetKey, LOOKAHEAD_BYTES, StoreError};
use crate::tokenizer::{FieldRange, FieldSink, RecordClose, Tokenizer};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Statistics
// ============================================================================

/// Counters collected by a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    /// Records handed to the caller, filled ones included.
    pub records: u64,
    /// Partial records left out under the drop policy.
    pub dropped: u64,
    /// Partial records completed with defaults.
    pub filled: u64,
    /// Records at the range start left to the previous range.
    pub skipped: u64,
    /// Empty or whitespace-only lines. Each one is also counted under the
    /// outcome the partial-record policy gave it.
    pub blank: u64,
    pub int_fallbacks: u64,
    pub float_fallbacks: u64,
    pub double_fallbacks: u64,
    pub chunk_fetches: u64,
}

impl ParseStats {
    pub fn merge(&mut self, other: &Self) {
        self.records += other.records;
        self.dropped += other.dropped;
        self.filled += other.filled;
        self.skipped += other.skipped;
        self.blank += other.blank;
        self.int_fallbacks += other.int_fallbacks;
        self.float_fallbacks += other.float_fallbacks;
        self.double_fallbacks += other.double_fallbacks;
        self.chunk_fetches += other.chunk_fetches;
    }

    /// Numeric fields that fell back to their default.
    #[must_use]
    pub const fn fallbacks(&self) -> u64 {
        self.int_fallbacks + self.float_fallbacks + self.double_fallbacks
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("serialize parse stats")
    }
}

// ============================================================================
// Chunk window
// ============================================================================

struct Window {
    current: Chunk,
    index: usize,
    /// Logical offset of `current[0]`.
    start: u64,
    /// Chunk `index + 1`, possibly only its first [`LOOKAHEAD_BYTES`].
    next: Option<Chunk>,
    next_complete: bool,
}

impl Window {
    #[inline]
    fn get(&self, pos: u64) -> Option<u8> {
        let rel = usize::try_from(pos.checked_sub(self.start)?).ok()?;
        if let Some(&b) = self.current.get(rel) {
            return Some(b);
        }
        self.next.as_ref()?.get(rel - self.current.len()).copied()
    }

    /// `[start, end)` as up to two slices, if all of it is buffered.
    fn slices(&self, start: u64, end: u64) -> Option<(&[u8], &[u8])> {
        let from = usize::try_from(start.checked_sub(self.start)?).ok()?;
        let to = usize::try_from(end.checked_sub(self.start)?).ok()?;
        let cur = self.current.len();
        if to <= cur {
            let empty: &[u8] = &[];
            return Some((&self.current[from..to], empty));
        }
        let next = self.next.as_deref().unwrap_or(&[]);
        let tail = next.get(from.saturating_sub(cur)..to - cur)?;
        Some((&self.current[from.min(cur)..], tail))
    }

    fn pin(&self, source: &ChunkSource) {
        let next = self.next.as_ref().map(|bytes| ResidentChunk {
            index: self.index + 1,
            bytes: Arc::clone(bytes),
            complete: self.next_complete,
        });
        source.pin(
            ResidentChunk {
                index: self.index,
                bytes: Arc::clone(&self.current),
                complete: true,
            },
            next,
        );
    }
}

/// Fetch the chunk after `index`, cut to a short lookahead when it lies past
/// the range.
fn lookahead(
    source: &ChunkSource,
    range: ParseRange,
    index: usize,
) -> ParseResult<(Option<Chunk>, bool)> {
    if source.layout().is_last(index) {
        return Ok((None, true));
    }
    let next = index + 1;
    let max_bytes = (next >= range.end).then_some(LOOKAHEAD_BYTES);
    let chunk = source.fetch(next, max_bytes)?;
    let complete = max_bytes.is_none_or(|n| chunk.len() < n);
    Ok((Some(chunk), complete))
}

// ============================================================================
// Field writer
// ============================================================================

/// Writes closed fields into the session's record.
struct RecordWriter<'a> {
    record: &'a mut Record,
    shape: &'a RecordShape,
    config: &'a ParserConfig,
    scanner: &'a mut DecimalScanner,
    stats: &'a mut ParseStats,
    source: &'a Arc<ChunkSource>,
    window: Option<&'a Window>,
}

impl RecordWriter<'_> {
    fn scan<T>(
        &mut self,
        field: &FieldRange,
        scan: impl FnOnce(&mut dyn Iterator<Item = u8>, &mut DecimalScanner) -> Option<T>,
    ) -> ParseResult<Option<T>> {
        if let Some((head, tail)) = self.window.and_then(|w| w.slices(field.start, field.end)) {
            let mut bytes = head.iter().chain(tail).copied();
            return Ok(scan(&mut bytes, &mut *self.scanner));
        }
        let len = field.len()?;
        log::debug!(
            "{}: out-of-band read of {} bytes at offset {}",
            self.source.key(),
            len,
            field.start
        );
        let bytes = self.source.read_range(field.start, len)?;
        Ok(scan(&mut bytes.into_iter(), &mut *self.scanner))
    }
}

impl FieldSink for RecordWriter<'_> {
    fn field(&mut self, field: FieldRange) -> ParseResult<()> {
        let Some(ty) = self.shape.column(field.column) else {
            return Ok(());
        };
        let defaults = self.config.defaults;
        let value = match ty {
            ColumnType::Text => Value::Text(FieldSpan::new(
                Arc::clone(self.source),
                field.start,
                field.len()?,
                field.escapes,
            )),
            _ if field.filled => {
                let empty = FieldSpan::new(Arc::clone(self.source), field.start, 0, 0);
                Value::default_for(ty, &defaults, &empty)
            }
            ColumnType::Int => {
                let radix = self.config.radix;
                if let Some(v) = self.scan(&field, |bytes, _| scan_int(bytes, radix))? {
                    Value::Int(v)
                } else {
                    self.stats.int_fallbacks += 1;
                    Value::Int(defaults.int)
                }
            }
            ColumnType::Float => {
                if let Some(v) = self.scan(&field, |bytes, s| s.scan_f32(bytes))? {
                    Value::Float(v)
                } else {
                    self.stats.float_fallbacks += 1;
                    Value::Float(defaults.float)
                }
            }
            ColumnType::Double => {
                if let Some(v) = self.scan(&field, |bytes, s| s.scan_f64(bytes))? {
                    Value::Double(v)
                } else {
                    self.stats.double_fallbacks += 1;
                    Value::Double(defaults.double)
                }
            }
        };
        self.record.set(field.column, value);
        Ok(())
    }
}

// ============================================================================
// Session
// ============================================================================

/// Lazy, forward-only parse of one chunk range of a dataset.
///
/// The session reuses a single [`Record`]: [`advance`](Self::advance)
/// overwrites it and [`record`](Self::record) borrows it. The [`Iterator`]
/// implementation clones it out instead.
pub struct ParserSession {
    store: Arc<dyn ChunkStore>,
    key: DatasetKey,
    shape: RecordShape,
    config: ParserConfig,
    range: ParseRange,
    source: Arc<ChunkSource>,
    window: Option<Window>,
    tokenizer: Tokenizer,
    cursor: u64,
    /// Records starting past this offset belong to the next range.
    end_boundary: u64,
    record: Record,
    scanner: DecimalScanner,
    stats: ParseStats,
    at_end: bool,
    exhausted: bool,
}

impl fmt::Debug for ParserSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserSession")
            .field("key", &self.key)
            .field("range", &self.range)
            .field("cursor", &self.cursor)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl ParserSession {
    /// Open a session over the whole dataset.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or shape is invalid, the dataset
    /// does not exist, or its first chunks cannot be fetched.
    pub fn open(
        store: Arc<dyn ChunkStore>,
        key: impl Into<DatasetKey>,
        shape: RecordShape,
        config: ParserConfig,
    ) -> ParseResult<Self> {
        Self::start(store, key.into(), shape, config, None)
    }

    /// Open a session over chunks `[range.start, range.end)`.
    ///
    /// Sessions over one dataset must use gap-free, non-overlapping ranges;
    /// [`ParseRange::tile`] produces such a set.
    ///
    /// # Errors
    ///
    /// As for [`open`](Self::open), and if the range lies outside the dataset.
    pub fn open_range(
        store: Arc<dyn ChunkStore>,
        key: impl Into<DatasetKey>,
        shape: RecordShape,
        config: ParserConfig,
        range: ParseRange,
    ) -> ParseResult<Self> {
        Self::start(store, key.into(), shape, config, Some(range))
    }

    /// Open a session over the single chunk `chunk` names.
    ///
    /// # Errors
    ///
    /// As for [`open_range`](Self::open_range).
    pub fn open_chunk(
        store: Arc<dyn ChunkStore>,
        chunk: &ChunkKey,
        shape: RecordShape,
        config: ParserConfig,
    ) -> ParseResult<Self> {
        let index = store.chunk_index(chunk);
        let key = chunk.dataset.clone();
        Self::start(store, key, shape, config, Some(ParseRange::single(index)))
    }

    fn start(
        store: Arc<dyn ChunkStore>,
        key: DatasetKey,
        shape: RecordShape,
        config: ParserConfig,
        range: Option<ParseRange>,
    ) -> ParseResult<Self> {
        config.validate()?;
        shape.validate()?;
        let (layout, range) = resolve(store.as_ref(), &key, range)?;
        let source = Arc::new(ChunkSource::new(Arc::clone(&store), key.clone(), layout));
        let empty = FieldSpan::new(Arc::clone(&source), 0, 0, 0);
        let record = Record::blank(&shape, &config.defaults, &empty);
        let tokenizer = Tokenizer::new(&config, shape.arity(), range.start > 0);

        let mut session = Self {
            store,
            key,
            shape,
            config,
            range,
            source,
            window: None,
            tokenizer,
            cursor: 0,
            end_boundary: layout.boundary(range.end),
            record,
            scanner: DecimalScanner::new(),
            stats: ParseStats::default(),
            at_end: false,
            exhausted: false,
        };
        session.load()?;
        Ok(session)
    }

    /// Fetch the range's first chunk and reset all parse state.
    fn load(&mut self) -> ParseResult<()> {
        let layout = *self.source.layout();
        self.tokenizer = Tokenizer::new(&self.config, self.shape.arity(), self.range.start > 0);
        self.stats = ParseStats::default();
        self.end_boundary = layout.boundary(self.range.end);
        self.window = None;
        self.at_end = false;
        self.exhausted = false;

        if layout.chunk_count == 0 {
            log::debug!("{}: empty dataset", self.key);
            self.exhausted = true;
            return Ok(());
        }

        let index = self.range.start;
        let start = self.store.chunk_offset(&self.key.chunk(index))?;
        let current = self.source.fetch(index, None)?;
        let (next, next_complete) = lookahead(&self.source, self.range, index)?;
        let window = Window {
            current,
            index,
            start,
            next,
            next_complete,
        };
        window.pin(&self.source);
        self.window = Some(window);
        self.cursor = start;

        log::debug!(
            "{}: session over chunks [{}, {}) of {} opened at offset {start}",
            self.key,
            self.range.start,
            self.range.end,
            layout.chunk_count
        );
        Ok(())
    }

    /// Re-resolve the dataset and start over from the range's first chunk.
    ///
    /// Statistics and the observed column maximum are reset. Spans handed
    /// out before the restart stay readable.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset no longer resolves or the range no
    /// longer fits it.
    pub fn restart(&mut self) -> ParseResult<()> {
        self.source.release();
        let (layout, range) = resolve(self.store.as_ref(), &self.key, Some(self.range))?;
        self.range = range;
        self.source = Arc::new(ChunkSource::new(
            Arc::clone(&self.store),
            self.key.clone(),
            layout,
        ));
        let empty = FieldSpan::new(Arc::clone(&self.source), 0, 0, 0);
        self.record = Record::blank(&self.shape, &self.config.defaults, &empty);
        self.load()
    }

    /// Parse the next record into [`record`](Self::record).
    ///
    /// Returns `false` once the range is exhausted. After an error the
    /// session is exhausted as well.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk cannot be fetched or a partial record is
    /// met under [`PartialRecordPolicy::Error`](crate::PartialRecordPolicy::Error).
    pub fn advance(&mut self) -> ParseResult<bool> {
        if self.exhausted {
            return Ok(false);
        }
        match self.next_record() {
            Ok(true) => Ok(true),
            other => {
                self.exhausted = true;
                self.source.release();
                other
            }
        }
    }

    fn next_record(&mut self) -> ParseResult<bool> {
        loop {
            if self.at_end {
                return Ok(false);
            }
            if !self.tokenizer.is_skipping() && self.cursor > self.end_boundary {
                log::debug!(
                    "{}: range [{}, {}) done at offset {}",
                    self.key,
                    self.range.start,
                    self.range.end,
                    self.cursor
                );
                return Ok(false);
            }
            let Some(close) = self.scan_record()? else {
                return Ok(false);
            };
            match close {
                RecordClose::Emit { observed, filled } => {
                    self.record.set_observed(observed);
                    self.stats.records += 1;
                    if filled {
                        self.stats.filled += 1;
                    }
                    if observed == 0 {
                        self.stats.blank += 1;
                    }
                    return Ok(true);
                }
                RecordClose::Dropped { observed } => {
                    self.stats.dropped += 1;
                    if observed == 0 {
                        self.stats.blank += 1;
                    }
                }
                RecordClose::Skipped => {
                    log::trace!(
                        "{}: left partial record ending at {} to the previous range",
                        self.key,
                        self.cursor
                    );
                    self.stats.skipped += 1;
                }
            }
        }
    }

    /// Feed bytes to the tokenizer until one record closes or the data ends.
    fn scan_record(&mut self) -> ParseResult<Option<RecordClose>> {
        self.tokenizer.begin_record(self.cursor);
        loop {
            let byte = self.byte(self.cursor)?;
            let mut sink = RecordWriter {
                record: &mut self.record,
                shape: &self.shape,
                config: &self.config,
                scanner: &mut self.scanner,
                stats: &mut self.stats,
                source: &self.source,
                window: self.window.as_ref(),
            };
            let Some(b) = byte else {
                log::debug!("{}: end of data at offset {}", self.key, self.cursor);
                self.at_end = true;
                return self.tokenizer.finish(self.cursor, &mut sink);
            };
            let step = self.tokenizer.step(b, self.cursor, &mut sink)?;
            if step.consumed {
                self.cursor += 1;
            }
            if step.closed.is_some() {
                return Ok(step.closed);
            }
        }
    }

    #[inline]
    fn byte(&mut self, pos: u64) -> ParseResult<Option<u8>> {
        loop {
            let Some(window) = self.window.as_ref() else {
                return Ok(None);
            };
            if let Some(b) = window.get(pos) {
                return Ok(Some(b));
            }
            if !self.grow()? {
                return Ok(None);
            }
        }
    }

    /// Extend the window by one step; `false` at the end of the data.
    fn grow(&mut self) -> ParseResult<bool> {
        let Some(window) = self.window.as_mut() else {
            return Ok(false);
        };
        match window.next.take() {
            None => return Ok(false),
            Some(_) if !window.next_complete => {
                // the short lookahead ran out; fetch the whole chunk
                let index = window.index + 1;
                log::debug!("{}: completing lookahead chunk {index}", self.key);
                window.next = Some(self.source.fetch(index, None)?);
                window.next_complete = true;
            }
            Some(next) => {
                window.start += window.current.len() as u64;
                window.current = next;
                window.index += 1;
                let (next, next_complete) = lookahead(&self.source, self.range, window.index)?;
                window.next = next;
                window.next_complete = next_complete;
                log::debug!(
                    "{}: window slid to chunk {} at offset {}",
                    self.key,
                    window.index,
                    window.start
                );
            }
        }
        window.pin(&self.source);
        Ok(true)
    }

    /// The record filled by the last successful [`advance`](Self::advance).
    #[must_use]
    pub const fn record(&self) -> &Record {
        &self.record
    }

    #[must_use]
    pub fn column_count_declared(&self) -> usize {
        self.shape.arity()
    }

    /// Highest field count seen on any line parsed so far; fields beyond the
    /// declared arity are counted but not stored. Default-filled fields do not
    /// count.
    #[must_use]
    pub const fn max_column_observed(&self) -> usize {
        self.tokenizer.max_observed()
    }

    #[must_use]
    pub fn stats(&self) -> ParseStats {
        ParseStats {
            chunk_fetches: self.source.fetch_count(),
            ..self.stats
        }
    }

    #[must_use]
    pub const fn range(&self) -> ParseRange {
        self.range
    }

    #[must_use]
    pub fn layout(&self) -> &ChunkLayout {
        self.source.layout()
    }

    #[must_use]
    pub const fn dataset(&self) -> &DatasetKey {
        &self.key
    }

    #[must_use]
    pub const fn shape(&self) -> &RecordShape {
        &self.shape
    }

    #[must_use]
    pub const fn config(&self) -> &ParserConfig {
        &self.config
    }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl Iterator for ParserSession {
    type Item = ParseResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(true) => Some(Ok(self.record.clone())),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl Drop for ParserSession {
    fn drop(&mut self) {
        self.source.release();
    }
}

/// Resolve `key` and check `range` against its chunk count.
fn resolve(
    store: &dyn ChunkStore,
    key: &DatasetKey,
    range: Option<ParseRange>,
) -> ParseResult<(ChunkLayout, ParseRange)> {
    let info = store.resolve(key)?;
    if !info.exists {
        return Err(StoreError::not_found(format!("dataset {key} not found")).into());
    }
    let layout = ChunkLayout::from_info(&info);
    let range = range.unwrap_or(ParseRange::whole(layout.chunk_count));
    let fits = range.end <= layout.chunk_count && (layout.chunk_count == 0 || !range.is_empty());
    if !fits {
        return Err(ParseError::Config(format!(
            "range [{}, {}) outside {} chunks of {key}",
            range.start, range.end, layout.chunk_count
        )));
    }
    Ok((layout, range))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(current: &[u8], next: Option<&[u8]>) -> Window {
        Window {
            current: Chunk::from(current),
            index: 0,
            start: 100,
            next: next.map(Chunk::from),
            next_complete: true,
        }
    }

    #[test]
    fn window_get_spans_both_chunks() {
        let w = window(b"abc", Some(b"de"));
        assert_eq!(w.get(99), None);
        assert_eq!(w.get(100), Some(b'a'));
        assert_eq!(w.get(103), Some(b'd'));
        assert_eq!(w.get(104), Some(b'e'));
        assert_eq!(w.get(105), None);
    }

    #[test]
    fn window_slices_split_at_the_chunk_boundary() {
        let w = window(b"abc", Some(b"de"));
        assert_eq!(w.slices(101, 103), Some((&b"bc"[..], &b""[..])));
        assert_eq!(w.slices(102, 105), Some((&b"c"[..], &b"de"[..])));
        assert_eq!(w.slices(103, 104), Some((&b""[..], &b"d"[..])));
        assert_eq!(w.slices(98, 101), None);
        assert_eq!(w.slices(102, 106), None);
    }

    #[test]
    fn stats_merge_adds_counters() {
        let mut a = ParseStats {
            records: 2,
            skipped: 1,
            ..ParseStats::default()
        };
        let b = ParseStats {
            records: 3,
            int_fallbacks: 4,
            ..ParseStats::default()
        };
        a.merge(&b);
        assert_eq!(a.records, 5);
        assert_eq!(a.skipped, 1);
        assert_eq!(a.fallbacks(), 4);
    }
}
