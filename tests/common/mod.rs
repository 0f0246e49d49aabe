#![allow(dead_code)]

use anyhow::Result;
use chunked_csv::{
    ChunkStore, DatasetKey, MemoryChunkStore, ParseRange, ParserConfig, ParserSession, RecordShape,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Store `bytes` as dataset "data" with the given chunk size.
pub fn dataset(bytes: &[u8], chunk_size: usize) -> (MemoryChunkStore, DatasetKey) {
    let store = MemoryChunkStore::new();
    let key = store
        .put_dataset("data", bytes, chunk_size)
        .expect("store dataset");
    (store, key)
}

/// Drain a session into materialized rows.
pub fn rows(session: ParserSession) -> Result<Vec<Vec<String>>> {
    let mut out = Vec::new();
    for record in session {
        out.push(record?.materialize()?);
    }
    Ok(out)
}

/// Parse `bytes` with a single session over the whole dataset.
pub fn parse(
    bytes: &[u8],
    chunk_size: usize,
    shape: &str,
    config: ParserConfig,
) -> Result<Vec<Vec<String>>> {
    let (store, key) = dataset(bytes, chunk_size);
    let session = ParserSession::open(store.shared(), &key, RecordShape::parse(shape)?, config)?;
    rows(session)
}

/// Parse `bytes` with one session per tile, run one after another, and return
/// the rows of every tile in order.
pub fn parse_tiles(
    bytes: &[u8],
    chunk_size: usize,
    shape: &str,
    config: &ParserConfig,
    tiles: usize,
) -> Result<Vec<Vec<Vec<String>>>> {
    let (store, key) = dataset(bytes, chunk_size);
    let shape = RecordShape::parse(shape)?;
    let chunks = store.resolve(&key)?.chunk_count;
    ParseRange::tile(chunks, tiles)
        .into_iter()
        .map(|range| {
            let session =
                ParserSession::open_range(store.shared(), &key, shape.clone(), config.clone(), range)?;
            rows(session)
        })
        .collect()
}

pub fn owned(rows: &[&[&str]]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|r| r.iter().map(|s| (*s).to_string()).collect())
        .collect()
}
