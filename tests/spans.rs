mod common;

use anyhow::Result;
use chunked_csv::{
    ChunkStore, FieldSpan, MemoryChunkStore, ParseError, ParserConfig, ParserSession, Record,
    RecordShape, StoreErrorKind,
};
use common::dataset;
use pretty_assertions::assert_eq;
use std::cmp::Ordering;

const LINE: &[u8] = b"alpha,bravo-charlie,delta\n";

fn first_record(store: &MemoryChunkStore, key: &str, shape: &str) -> Result<Record> {
    let mut session = ParserSession::open(
        store.shared(),
        key,
        RecordShape::parse(shape)?,
        ParserConfig::delimited(','),
    )?;
    Ok(session.next().expect("a record")?)
}

fn text(record: &Record, column: usize) -> FieldSpan {
    record.text(column).expect("text column").clone()
}

#[test]
fn span_across_chunks_matches_contiguous_buffer() -> Result<()> {
    let store = MemoryChunkStore::new();
    store.put_dataset("split", LINE, 8)?;
    store.put_value("whole", LINE)?;

    let split = first_record(&store, "split", "text,text,text")?;
    let whole = first_record(&store, "whole", "text,text,text")?;
    assert_eq!(split.materialize()?, whole.materialize()?);

    let span = text(&split, 1);
    assert_eq!(span.offset(), 6);
    assert_eq!(span.len(), 13);
    assert_eq!(span.materialize()?, "bravo-charlie");
    Ok(())
}

#[test]
fn byte_access_and_sub_spans() -> Result<()> {
    let (store, _) = dataset(LINE, 4);
    let record = first_record(&store, "data", "text,text,text")?;
    let span = text(&record, 1);

    let expected = b"bravo-charlie";
    for (i, &b) in expected.iter().enumerate() {
        assert_eq!(span.byte_at(i)?, b);
    }
    assert!(matches!(
        span.byte_at(13),
        Err(ParseError::SpanOutOfBounds { index: 13, len: 13 })
    ));

    let sub = span.sub_span(2, 9)?;
    assert_eq!(sub.materialize()?, "avo-cha");
    assert_eq!(sub.offset(), 8);
    assert!(span.sub_span(5, 14).is_err());
    assert!(span.sub_span(4, 3).is_err());
    Ok(())
}

#[test]
fn compare_is_lexicographic_across_chunks() -> Result<()> {
    let (store, _) = dataset(LINE, 5);
    let record = first_record(&store, "data", "text,text,text")?;
    let span = text(&record, 1);

    assert_eq!(span.compare_bytes(b"bravo-charlie")?, Ordering::Equal);
    assert_eq!(span.compare_bytes(b"bravo")?, Ordering::Greater);
    assert_eq!(span.compare_bytes(b"bravo-charlies")?, Ordering::Less);
    assert_eq!(span.compare_bytes(b"c")?, Ordering::Less);
    assert_eq!(span.compare_bytes(b"a")?, Ordering::Greater);
    assert!(span.eq_bytes(b"bravo-charlie")?);
    assert!(!span.eq_bytes(b"bravo-charliE")?);
    Ok(())
}

#[test]
fn escaped_quotes_read_as_single_quotes() -> Result<()> {
    let (store, _) = dataset(b"\"a\"\"b\"\"c\",x\n", 3);
    let record = first_record(&store, "data", "text,text")?;
    let span = text(&record, 0);

    assert_eq!(span.raw_len(), 7);
    assert_eq!(span.len(), 5);
    assert_eq!(span.materialize()?, "a\"b\"c");
    assert_eq!(span.byte_at(1)?, b'"');
    assert_eq!(span.byte_at(2)?, b'b');
    assert_eq!(span.byte_at(4)?, b'c');
    assert_eq!(span.sub_span(1, 4)?.materialize()?, "\"b\"");
    assert_eq!(span.sub_span(2, 5)?.materialize()?, "b\"c");
    assert_eq!(span.compare_bytes(b"a\"b\"c")?, Ordering::Equal);
    Ok(())
}

#[test]
fn spans_outlive_their_session() -> Result<()> {
    let (store, key) = dataset(b"first,1\nsecond,2\nthird,3\n", 6);
    let session = ParserSession::open(
        store.shared(),
        &key,
        RecordShape::parse("text,int")?,
        ParserConfig::delimited(','),
    )?;
    let records = session.collect::<Result<Vec<_>, _>>()?;

    store.reset_fetch_count();
    let names = records
        .iter()
        .map(|r| text(r, 0).materialize())
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(names, vec!["first", "second", "third"]);
    // the session released its window, so every read went to the store
    assert!(store.fetch_count() >= 3);
    Ok(())
}

#[test]
fn removed_dataset_surfaces_as_storage_error() -> Result<()> {
    let (store, key) = dataset(LINE, 8);
    let record = first_record(&store, "data", "text,text,text")?;
    store.remove(&key)?;

    match text(&record, 1).materialize() {
        Err(ParseError::Storage(e)) => assert_eq!(e.kind, StoreErrorKind::NotFound),
        other => panic!("expected a storage error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn invalid_utf8_is_replaced() -> Result<()> {
    let (store, _) = dataset(b"ok,\xff\xfe\n", 64);
    let record = first_record(&store, "data", "text,text")?;
    assert_eq!(text(&record, 1).materialize()?, "\u{fffd}\u{fffd}");
    assert_eq!(text(&record, 1).to_bytes()?, vec![0xff, 0xfe]);
    Ok(())
}

#[test]
fn span_equality_is_range_identity() -> Result<()> {
    let (store, _) = dataset(b"same,same\n", 64);
    let record = first_record(&store, "data", "text,text")?;
    let a = text(&record, 0);
    let b = text(&record, 1);
    assert_eq!(a.clone(), a);
    assert_ne!(a, b);
    assert!(b.eq_bytes(a.materialize()?.as_bytes())?);
    Ok(())
}

#[test]
fn folded_last_chunk_is_addressable() -> Result<()> {
    let data = b"one,two\nthree,four\nfive,six\n";
    let store = MemoryChunkStore::new();
    let key = store.put_dataset_folded("folded", data, 8)?;
    // 28 bytes: the 4-byte remainder is folded into the third chunk
    let info = store.resolve(&key)?;
    assert_eq!(info.chunk_count, 3);

    let session = ParserSession::open(
        store.shared(),
        &key,
        RecordShape::parse("text,text")?,
        ParserConfig::delimited(','),
    )?;
    let rows = common::rows(session)?;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2], vec!["five".to_string(), "six".to_string()]);
    Ok(())
}
