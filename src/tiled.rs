//! Tiled parsing: one session per chunk range, run on the rayon pool.
//!
//! The dataset's chunk range is split into contiguous, gap-free tiles with
//! [`ParseRange::tile`]. Each tile gets its own [`ParserSession`]; the skip
//! rule at tile starts keeps the union of all tiles equal to a single
//! whole-dataset parse, record for record.

use crate::config::{ParserConfig, RecordShape};
use crate::error::ParseResult;
use crate::layout::ParseRange;
use crate::record::Record;
use crate::session::{ParseStats, ParserSession};
use crate::store::{ChunkStore, DatasetKey, StoreError};
use rayon::prelude::*;
use std::sync::Arc;

/// Results of a tiled parse, in range order.
#[derive(Debug, Clone)]
pub struct TiledOutput<T> {
    pub tiles: Vec<(ParseRange, Vec<T>)>,
    /// Counters of all sessions added together.
    pub stats: ParseStats,
    /// Largest field count any session saw.
    pub max_column_observed: usize,
}

impl<T> TiledOutput<T> {
    /// Flatten the per-tile results, keeping dataset order.
    #[must_use]
    pub fn into_values(self) -> Vec<T> {
        self.tiles.into_iter().flat_map(|(_, v)| v).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.iter().map(|(_, v)| v.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse `key` with one session per tile and map every record through `f`.
///
/// * `tiles`: number of sessions. If `None`, defaults to `num_cpus::get()`
///   (at least 2), clamped to `[1, chunk_count]`.
///
/// Output is in dataset order regardless of thread scheduling.
///
/// # Errors
///
/// Returns the first error raised by a session or by `f`.
pub fn parse_tiled<T, F>(
    store: &Arc<dyn ChunkStore>,
    key: impl Into<DatasetKey>,
    shape: &RecordShape,
    config: &ParserConfig,
    tiles: Option<usize>,
    f: F,
) -> ParseResult<TiledOutput<T>>
where
    T: Send,
    F: Fn(&Record) -> ParseResult<T> + Sync,
{
    let key = key.into();
    let info = store.resolve(&key)?;
    if !info.exists {
        return Err(StoreError::not_found(format!("dataset {key} not found")).into());
    }
    let tile_count = tiles
        .unwrap_or_else(|| num_cpus::get().max(2))
        .clamp(1, info.chunk_count.max(1));
    let ranges = ParseRange::tile(info.chunk_count, tile_count);
    log::debug!(
        "{key}: tiled parse of {} chunks over {} sessions",
        info.chunk_count,
        ranges.len()
    );

    let results = ranges
        .into_par_iter()
        .map(|range| {
            let mut session = ParserSession::open_range(
                Arc::clone(store),
                key.clone(),
                shape.clone(),
                config.clone(),
                range,
            )?;
            let mut values = Vec::new();
            while session.advance()? {
                values.push(f(session.record())?);
            }
            Ok((range, values, session.stats(), session.max_column_observed()))
        })
        .collect::<ParseResult<Vec<_>>>()?;

    let mut stats = ParseStats::default();
    let mut max_column_observed = 0;
    let tiles = results
        .into_iter()
        .map(|(range, values, tile_stats, max_cols)| {
            stats.merge(&tile_stats);
            max_column_observed = max_column_observed.max(max_cols);
            (range, values)
        })
        .collect();

    Ok(TiledOutput {
        tiles,
        stats,
        max_column_observed,
    })
}

/// Count the records of `key` with a tiled parse.
///
/// # Errors
///
/// See [`parse_tiled`].
pub fn count_records_tiled(
    store: &Arc<dyn ChunkStore>,
    key: impl Into<DatasetKey>,
    shape: &RecordShape,
    config: &ParserConfig,
    tiles: Option<usize>,
) -> ParseResult<u64> {
    let out = parse_tiled(store, key, shape, config, tiles, |_| Ok(()))?;
    Ok(out.stats.records)
}
