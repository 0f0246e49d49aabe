//! Error types surfaced by parser sessions.
//!
//! Field-level scan failures never show up here: they are recovered in place by
//! substituting the configured default and counted in
//! [`ParseStats`](crate::session::ParseStats). Everything in [`ParseError`] is a
//! hard failure for the session that produced it.

use crate::store::StoreError;
use std::error::Error;
use std::fmt;

/// Hard failures raised while opening or driving a parser session.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The chunk store failed, or a chunk that must exist was missing.
    Storage(StoreError),
    /// A record closed with fewer fields than declared under the `Error` policy.
    PartialRecord {
        /// Number of fields actually seen in the record.
        observed: usize,
        /// Arity of the record shape.
        declared: usize,
        /// Logical offset of the record's first byte.
        offset: u64,
    },
    /// The parser configuration, record shape or parse range is invalid.
    Config(String),
    /// A column type descriptor did not name a supported type.
    UnsupportedColumnType(String),
    /// A span index was outside the span.
    SpanOutOfBounds { index: usize, len: usize },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage failure: {e}"),
            Self::PartialRecord {
                observed,
                declared,
                offset,
            } => write!(
                f,
                "partial record with {observed} of {declared} columns at offset {offset}"
            ),
            Self::Config(msg) => write!(f, "invalid parser configuration: {msg}"),
            Self::UnsupportedColumnType(desc) => write!(f, "unsupported column type '{desc}'"),
            Self::SpanOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for span of length {len}")
            }
        }
    }
}

impl Error for ParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ParseError {
    fn from(e: StoreError) -> Self {
        Self::Storage(e)
    }
}

pub type ParseResult<T> = Result<T, ParseError>;
