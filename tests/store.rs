mod common;

use anyhow::Result;
use chunked_csv::{
    Chunk, ChunkStore, DatasetInfo, DatasetKey, MemoryChunkStore, ParseError, ParserConfig,
    ParserSession, RecordShape, StoreErrorKind, StoreResult,
};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::sync::Arc;

#[test]
fn put_dataset_splits_into_fixed_chunks() -> Result<()> {
    let store = MemoryChunkStore::new();
    let key = store.put_dataset("d", b"0123456789", 4)?;

    let info = store.resolve(&key)?;
    assert_eq!(
        info,
        DatasetInfo {
            exists: true,
            is_chunked: true,
            chunk_count: 3,
            max_chunk_size: 4,
        }
    );
    assert_eq!(&store.fetch_chunk(&key, 0, None)?.expect("chunk 0")[..], b"0123");
    assert_eq!(&store.fetch_chunk(&key, 2, None)?.expect("chunk 2")[..], b"89");
    assert!(store.fetch_chunk(&key, 3, None)?.is_none());
    Ok(())
}

#[test]
fn fetch_honours_max_bytes() -> Result<()> {
    let store = MemoryChunkStore::new();
    let key = store.put_dataset("d", b"abcdefgh", 8)?;
    store.reset_fetch_count();

    assert_eq!(&store.fetch_chunk(&key, 0, Some(3))?.expect("prefix")[..], b"abc");
    assert_eq!(&store.fetch_chunk(&key, 0, Some(100))?.expect("whole")[..], b"abcdefgh");
    assert!(store.fetch_chunk(&key, 5, Some(3))?.is_none());
    // misses are not counted
    assert_eq!(store.fetch_count(), 2);
    Ok(())
}

#[test]
fn zero_chunk_size_is_rejected() {
    let store = MemoryChunkStore::new();
    let err = store.put_dataset("d", b"abc", 0).unwrap_err();
    assert_eq!(err.kind, StoreErrorKind::InvalidInput);
    assert!(err.to_string().contains("must be positive"));
}

#[test]
fn folding_merges_a_short_remainder() -> Result<()> {
    let store = MemoryChunkStore::new();
    let key = store.put_dataset_folded("f", b"0123456789", 4)?;
    assert_eq!(store.resolve(&key)?.chunk_count, 2);
    assert_eq!(&store.fetch_chunk(&key, 1, None)?.expect("tail")[..], b"456789");

    // nothing to fold when the data divides evenly
    let even = store.put_dataset_folded("e", b"01234567", 4)?;
    assert_eq!(store.resolve(&even)?.chunk_count, 2);
    Ok(())
}

#[test]
fn plain_values_and_removal() -> Result<()> {
    let store = MemoryChunkStore::new();
    let key = store.put_value("v", b"hello")?;
    let info = store.resolve(&key)?;
    assert!(info.exists);
    assert!(!info.is_chunked);
    assert_eq!(info.chunk_count, 1);
    assert_eq!(info.max_chunk_size, 5);

    assert!(store.remove(&key)?);
    assert!(!store.remove(&key)?);
    assert_eq!(store.resolve(&key)?, DatasetInfo::missing());
    Ok(())
}

#[test]
fn put_file_loads_from_disk() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(b"1,2\n3,4\n")?;
    file.flush()?;

    let store = MemoryChunkStore::new();
    let key = store.put_file("from-disk", file.path(), 3)?;
    assert_eq!(store.resolve(&key)?.chunk_count, 3);

    let rows = common::rows(ParserSession::open(
        store.shared(),
        &key,
        RecordShape::parse("int,int")?,
        ParserConfig::delimited(','),
    )?)?;
    assert_eq!(rows, common::owned(&[&["1", "2"], &["3", "4"]]));

    let err = store.put_file("gone", file.path().with_extension("missing"), 3).unwrap_err();
    assert!(err.to_string().starts_with("read "));
    Ok(())
}

#[test]
fn chunk_offsets_follow_the_stride() -> Result<()> {
    let (store, key) = common::dataset(b"0123456789abc", 5);
    assert_eq!(store.chunk_offset(&key.chunk(0))?, 0);
    assert_eq!(store.chunk_offset(&key.chunk(2))?, 10);
    assert_eq!(store.chunk_index(&key.chunk(2)), 2);

    let err = store.chunk_offset(&DatasetKey::new("nope").chunk(1)).unwrap_err();
    assert_eq!(err.kind, StoreErrorKind::NotFound);
    Ok(())
}

#[test]
fn keys_display_as_dataset_and_index() {
    let key = DatasetKey::from("sales");
    assert_eq!(key.as_str(), "sales");
    assert_eq!(key.chunk(7).to_string(), "sales#7");
    assert_eq!(DatasetKey::from(String::from("sales")), key);
}

#[test]
fn clones_share_storage() -> Result<()> {
    let store = MemoryChunkStore::new();
    let handle = store.shared();
    let key = store.put_value("late", b"x")?;
    assert!(handle.resolve(&key)?.exists);
    Ok(())
}

// ----------------------------------------------------------------------------
// Misbehaving stores
// ----------------------------------------------------------------------------

enum Fault {
    /// Report this chunk as missing.
    Hide(usize),
    /// Serve full fetches of this chunk one byte short.
    Shorten(usize),
}

struct FaultyStore {
    inner: MemoryChunkStore,
    fault: Fault,
}

impl ChunkStore for FaultyStore {
    fn resolve(&self, key: &DatasetKey) -> StoreResult<DatasetInfo> {
        self.inner.resolve(key)
    }

    fn fetch_chunk(
        &self,
        key: &DatasetKey,
        index: usize,
        max_bytes: Option<usize>,
    ) -> StoreResult<Option<Chunk>> {
        match self.fault {
            Fault::Hide(i) if i == index => Ok(None),
            Fault::Shorten(i) if i == index && max_bytes.is_none() => {
                let chunk = self.inner.fetch_chunk(key, index, None)?;
                Ok(chunk.map(|c| Chunk::from(&c[..c.len() - 1])))
            }
            _ => self.inner.fetch_chunk(key, index, max_bytes),
        }
    }
}

fn faulty(bytes: &[u8], chunk_size: usize, fault: Fault) -> (Arc<dyn ChunkStore>, DatasetKey) {
    let (inner, key) = common::dataset(bytes, chunk_size);
    (Arc::new(FaultyStore { inner, fault }), key)
}

#[test]
fn short_interior_chunk_is_corrupt() -> Result<()> {
    let (store, key) = faulty(b"aaaa\nbbbb\n", 5, Fault::Shorten(0));
    let err = ParserSession::open(
        store,
        &key,
        RecordShape::parse("text")?,
        ParserConfig::delimited(','),
    )
    .unwrap_err();
    assert!(matches!(err, ParseError::Storage(e) if e.kind == StoreErrorKind::Corrupt));
    Ok(())
}

#[test]
fn short_last_chunk_is_fine() -> Result<()> {
    let (store, key) = faulty(b"aaaa\nbb\n", 5, Fault::Shorten(1));
    let session = ParserSession::open(
        store,
        &key,
        RecordShape::parse("text")?,
        ParserConfig::delimited(','),
    )?;
    assert_eq!(common::rows(session)?, common::owned(&[&["aaaa"], &["bb"]]));
    Ok(())
}

#[test]
fn missing_chunk_fails_when_the_window_slides() -> Result<()> {
    common::init_logging();
    let (store, key) = faulty(b"aaaa\nbbb\ncccc\ndddd\n", 5, Fault::Hide(2));
    let mut session = ParserSession::open(
        store,
        &key,
        RecordShape::parse("text")?,
        ParserConfig::delimited(','),
    )?;

    assert_eq!(session.next().expect("first")?.materialize()?, vec!["aaaa"]);
    assert_eq!(session.next().expect("second")?.materialize()?, vec!["bbb"]);
    let err = session.next().expect("storage error").unwrap_err();
    assert!(matches!(err, ParseError::Storage(ref e) if e.kind == StoreErrorKind::NotFound));
    assert!(err.to_string().starts_with("storage failure"));
    assert!(session.is_exhausted());
    Ok(())
}
