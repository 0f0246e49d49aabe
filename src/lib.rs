//! # chunked-csv
//!
//! A **streaming delimited-text parser** for datasets that live in a chunked
//! key-value store instead of one contiguous buffer. Records and fields are
//! rebuilt from byte ranges that may be split anywhere across chunks, and many
//! parser sessions can work on disjoint chunk ranges of the same dataset at
//! once without losing or double-counting the records that straddle their
//! range boundaries.
//!
//! ## Key Features
//!
//! - **Chunk-aware tokenizer** - quoting, doubled-quote escapes, CR/LF/CRLF line ends
//! - **Zero-copy text** - text columns are [`FieldSpan`]s, materialized on demand
//! - **Allocation-free numeric scanning** - integers in any radix, floats and doubles
//! - **Partial-record policies** - fill with defaults, drop, or fail
//! - **Tiled parsing** - one session per chunk range on the rayon pool (feature `parallel`)
//! - **CSV export** - materialized records through the `csv` writer (feature `io-csv`)
//!
//! ## Quick Start
//!
//! ```
//! use chunked_csv::*;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let store = MemoryChunkStore::new();
//! let key = store.put_dataset("readings", b"\"north\",12,0.5\n\"south\",7,1.25\n", 16)?;
//!
//! let shape = RecordShape::parse("text,int,double")?;
//! let mut session = ParserSession::open(store.shared(), &key, shape, ParserConfig::default())?;
//!
//! let mut names = Vec::new();
//! while session.advance()? {
//!     let record = session.record();
//!     names.push(record.text(0).map(FieldSpan::materialize).transpose()?);
//!     assert!(record.int(1).is_some());
//! }
//! assert_eq!(names, vec![Some("north".to_string()), Some("south".to_string())]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Chunk stores
//!
//! A [`ChunkStore`] resolves a [`DatasetKey`] to its chunk layout and serves
//! chunks by index. Every chunk but the last holds exactly `max_chunk_size`
//! bytes, so chunk `i` starts at logical offset `i * max_chunk_size`.
//! [`MemoryChunkStore`] is an in-process implementation.
//!
//! ### Sessions and ranges
//!
//! A [`ParserSession`] parses one [`ParseRange`] of chunks, holding at most the
//! current chunk and the one after it. A session that does not start at
//! chunk 0 leaves the record under its first byte to the previous range, and
//! keeps reading past its last chunk to finish the record it is in.
//!
//! ### Records
//!
//! A [`Record`] has the fixed arity and column types of its [`RecordShape`].
//! Numeric fields that fail to scan take the configured [`FieldDefaults`];
//! lines with fewer fields than the shape follow the
//! [`PartialRecordPolicy`]. Extra fields are ignored but counted in
//! [`ParserSession::max_column_observed`].
//!
//! ## Feature Flags
//!
//! - `parallel` - Enable [`parse_tiled`] and [`count_records_tiled`] (default)
//! - `io-csv` - Enable [`export_csv`] and [`write_records`] (default)
//!
//! ## Module Overview
//!
//! - [`store`] - Chunk store trait, keys, errors and the in-memory store
//! - [`layout`] - Logical offset arithmetic and parse ranges
//! - [`numeric`] - Integer and decimal scanners
//! - [`span`] - Deferred text spans
//! - [`session`] - Parser sessions and statistics
//! - [`config`] - Parser configuration and record shapes

pub mod config;
pub mod error;
pub mod layout;
pub mod numeric;
pub mod record;
pub mod session;
pub mod span;
pub mod store;

mod tokenizer;

#[cfg(feature = "io-csv")]
pub mod export;
#[cfg(feature = "parallel")]
pub mod tiled;

// General re-exports
pub use config::{ColumnType, FieldDefaults, ParserConfig, PartialRecordPolicy, RecordShape};
pub use error::{ParseError, ParseResult};
pub use layout::{ChunkLayout, ParseRange};
pub use numeric::{DecimalScanner, scan_int};
pub use record::{Record, Value};
pub use session::{ParseStats, ParserSession};
pub use span::{ChunkSource, FieldSpan};
pub use store::{
    Chunk, ChunkKey, ChunkStore, DatasetInfo, DatasetKey, LOOKAHEAD_BYTES, MemoryChunkStore,
    StoreError, StoreErrorKind, StoreResult,
};

// Gated re-exports
#[cfg(feature = "io-csv")]
pub use export::{export_csv, write_records};

#[cfg(feature = "parallel")]
pub use tiled::{TiledOutput, count_records_tiled, parse_tiled};
