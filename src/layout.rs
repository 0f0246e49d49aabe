//! Logical offset arithmetic and parse ranges.
//!
//! A dataset's bytes form one logical stream. Chunk `i` starts at
//! `i * max_chunk_size`; the final chunk may run past its stride when the store
//! folded a remainder into it, so offset decomposition clamps the chunk index
//! to the last chunk.

use crate::error::{ParseError, ParseResult};
use crate::store::DatasetInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    pub chunk_count: usize,
    pub max_chunk_size: usize,
    pub is_chunked: bool,
}

impl ChunkLayout {
    #[must_use]
    pub const fn from_info(info: &DatasetInfo) -> Self {
        Self {
            chunk_count: info.chunk_count,
            max_chunk_size: info.max_chunk_size,
            is_chunked: info.is_chunked,
        }
    }

    /// Logical offset of chunk `index`'s first byte.
    #[must_use]
    pub const fn chunk_start(&self, index: usize) -> u64 {
        index as u64 * self.max_chunk_size as u64
    }

    #[must_use]
    pub const fn is_last(&self, index: usize) -> bool {
        index + 1 >= self.chunk_count
    }

    /// Last record start owned by a range ending at chunk `end`.
    ///
    /// A range that reaches the final chunk owns everything up to the end of
    /// data.
    #[must_use]
    pub const fn boundary(&self, end: usize) -> u64 {
        if end >= self.chunk_count {
            u64::MAX
        } else {
            self.chunk_start(end)
        }
    }

    /// Split a logical offset into `(chunk index, offset within chunk)`.
    ///
    /// Offsets past the last chunk's stride stay in the last chunk.
    #[must_use]
    pub fn locate(&self, offset: u64) -> (usize, usize) {
        if self.max_chunk_size == 0 || self.chunk_count <= 1 {
            return (0, offset as usize);
        }
        let computed = (offset / self.max_chunk_size as u64) as usize;
        let index = computed.min(self.chunk_count - 1);
        (index, (offset - self.chunk_start(index)) as usize)
    }
}

/// Half-open chunk index interval `[start, end)` parsed by one session.
///
/// A session owns every record whose first byte lies after the first byte of
/// chunk `start` and at or before the first byte of chunk `end`; the session
/// starting at chunk 0 also owns the record at offset 0. Sessions covering one
/// dataset must tile it without gaps or overlaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParseRange {
    pub start: usize,
    pub end: usize,
}

impl ParseRange {
    /// # Errors
    ///
    /// Returns an error if the range is empty.
    pub fn new(start: usize, end: usize) -> ParseResult<Self> {
        if start >= end {
            return Err(ParseError::Config(format!(
                "empty parse range [{start}, {end})"
            )));
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub const fn single(index: usize) -> Self {
        Self {
            start: index,
            end: index + 1,
        }
    }

    #[must_use]
    pub const fn whole(chunk_count: usize) -> Self {
        Self {
            start: 0,
            end: chunk_count,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    #[must_use]
    pub const fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }

    /// Split `[0, chunk_count)` into up to `tiles` contiguous, gap-free ranges.
    ///
    /// The remainder is spread over the leading tiles, so sizes differ by at
    /// most one chunk. Returns no ranges for an empty dataset.
    #[must_use]
    pub fn tile(chunk_count: usize, tiles: usize) -> Vec<Self> {
        let tiles = tiles.max(1).min(chunk_count.max(1));
        let base = chunk_count / tiles;
        let rem = chunk_count % tiles;

        let mut out = Vec::with_capacity(tiles);
        let mut start = 0usize;
        for idx in 0..tiles {
            let extra = usize::from(idx < rem);
            let end = start + base + extra;
            if start < end {
                out.push(Self { start, end });
            }
            start = end;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(chunk_count: usize, max_chunk_size: usize) -> ChunkLayout {
        ChunkLayout {
            chunk_count,
            max_chunk_size,
            is_chunked: true,
        }
    }

    #[test]
    fn locate_splits_by_stride() {
        let l = layout(4, 10);
        assert_eq!(l.locate(0), (0, 0));
        assert_eq!(l.locate(9), (0, 9));
        assert_eq!(l.locate(10), (1, 0));
        assert_eq!(l.locate(35), (3, 5));
    }

    #[test]
    fn locate_keeps_oversized_tail_in_last_chunk() {
        // last chunk folded a remainder and is 17 bytes long
        let l = layout(3, 10);
        assert_eq!(l.locate(29), (2, 9));
        assert_eq!(l.locate(30), (2, 10));
        assert_eq!(l.locate(36), (2, 16));
    }

    #[test]
    fn locate_unchunked_value() {
        let l = ChunkLayout {
            chunk_count: 1,
            max_chunk_size: 100,
            is_chunked: false,
        };
        assert_eq!(l.locate(150), (0, 150));
    }

    #[test]
    fn boundary_is_open_ended_for_the_last_range() {
        let l = layout(4, 10);
        assert_eq!(l.boundary(2), 20);
        assert_eq!(l.boundary(4), u64::MAX);
    }

    #[test]
    fn tile_covers_without_gaps() {
        let ranges = ParseRange::tile(10, 3);
        assert_eq!(
            ranges,
            vec![
                ParseRange { start: 0, end: 4 },
                ParseRange { start: 4, end: 7 },
                ParseRange { start: 7, end: 10 },
            ]
        );
    }

    #[test]
    fn tile_clamps_tile_count() {
        assert_eq!(ParseRange::tile(2, 8).len(), 2);
        assert!(ParseRange::tile(0, 4).is_empty());
        assert_eq!(ParseRange::tile(5, 0), vec![ParseRange::whole(5)]);
    }

    #[test]
    fn empty_range_is_rejected() {
        assert!(ParseRange::new(3, 3).is_err());
        assert!(ParseRange::new(1, 2).is_ok());
    }
}
