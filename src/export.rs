//! Export of parsed records as CSV.
//!
//! Records are materialized and written through the `csv` crate, which
//! quotes fields as needed, so a text field holding the separator or a quote
//! survives the trip. Requires the `io-csv` feature.

use crate::error::ParseResult;
use crate::record::Record;
use crate::session::ParserSession;
use anyhow::{Context, Result};
use csv::WriterBuilder;
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::Path;

/// Write `records` to `writer` as CSV with `separator` between fields.
///
/// # Returns
/// The number of records written, header excluded.
///
/// # Errors
/// Returns the first error from `records`, from span materialization, or from
/// the writer.
pub fn write_records<W, I>(
    writer: W,
    separator: u8,
    headers: Option<&[&str]>,
    records: I,
) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = ParseResult<Record>>,
{
    let mut wtr = WriterBuilder::new()
        .delimiter(separator)
        .has_headers(false)
        .from_writer(writer);
    if let Some(headers) = headers {
        wtr.write_record(headers).context("write CSV header")?;
    }
    let mut n = 0usize;
    for (i, rec) in records.into_iter().enumerate() {
        let fields = rec
            .and_then(|r| r.materialize())
            .with_context(|| format!("materialize record #{}", i + 1))?;
        wtr.write_record(&fields)
            .with_context(|| format!("write CSV record #{}", i + 1))?;
        n += 1;
    }
    wtr.flush().context("flush CSV writer")?;
    Ok(n)
}

/// Drain `session` into a CSV file at `path`, using the session's separator.
///
/// Creates parent directories if they don't exist.
///
/// # Errors
/// Returns an error if the file cannot be created, the session fails, or a
/// record cannot be written.
pub fn export_csv(
    path: impl AsRef<Path>,
    session: &mut ParserSession,
    headers: Option<&[&str]>,
) -> Result<usize> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let separator = session.config().separator_byte();
    write_records(file, separator, headers, session.by_ref())
        .with_context(|| format!("export {} to {}", session.dataset(), path.display()))
}
