#![cfg(feature = "io-csv")]

mod common;

use anyhow::Result;
use chunked_csv::{
    ParserConfig, ParserSession, PartialRecordPolicy, RecordShape, export_csv, write_records,
};
use common::dataset;
use pretty_assertions::assert_eq;

const DATA: &[u8] = b"\"a,b\",1\nc,2\n\"say \"\"hi\"\"\",3\n";

fn session(config: ParserConfig) -> Result<ParserSession> {
    let (store, key) = dataset(DATA, 5);
    Ok(ParserSession::open(
        store.shared(),
        &key,
        RecordShape::parse("text,int")?,
        config,
    )?)
}

#[test]
fn write_records_quotes_as_needed() -> Result<()> {
    let mut buf = Vec::new();
    let n = write_records(
        &mut buf,
        b',',
        Some(&["name", "n"][..]),
        session(ParserConfig::delimited(','))?,
    )?;
    assert_eq!(n, 3);
    assert_eq!(
        String::from_utf8(buf)?,
        "name,n\n\"a,b\",1\nc,2\n\"say \"\"hi\"\"\",3\n"
    );
    Ok(())
}

#[test]
fn write_records_with_another_separator() -> Result<()> {
    let mut buf = Vec::new();
    write_records(&mut buf, b';', None, session(ParserConfig::delimited(','))?)?;
    assert_eq!(String::from_utf8(buf)?, "a,b;1\nc;2\n\"say \"\"hi\"\"\";3\n");
    Ok(())
}

#[test]
fn write_records_stops_at_the_first_error() -> Result<()> {
    let (store, key) = dataset(b"1,2\n3\n", 64);
    let cfg = ParserConfig::delimited(',').with_partial_records(PartialRecordPolicy::Error);
    let session = ParserSession::open(store.shared(), &key, RecordShape::parse("int,int")?, cfg)?;

    let mut buf = Vec::new();
    let err = write_records(&mut buf, b',', None, session).unwrap_err();
    assert!(format!("{err:#}").contains("partial record"));
    assert!(err.to_string().contains("record #2"));
    Ok(())
}

#[test]
fn export_csv_creates_parent_directories() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested/out/data.csv");
    let mut session = session(ParserConfig::delimited(','))?;

    let n = export_csv(&path, &mut session, Some(&["name", "n"][..]))?;
    assert_eq!(n, 3);
    assert!(session.is_exhausted());

    let mut rdr = csv::Reader::from_path(&path)?;
    assert_eq!(rdr.headers()?.iter().collect::<Vec<_>>(), vec!["name", "n"]);
    let rows = rdr
        .records()
        .map(|r| r.map(|r| r.iter().map(str::to_string).collect::<Vec<_>>()))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(
        rows,
        common::owned(&[&["a,b", "1"], &["c", "2"], &["say \"hi\"", "3"]])
    );
    Ok(())
}
