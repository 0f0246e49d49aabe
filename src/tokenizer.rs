//! Byte-driven record tokenizer.
//!
//! The tokenizer sees one byte at a time together with its logical offset. It
//! keeps field and record boundaries as logical offsets, never as buffer
//! indices, so the session can slide its chunk window in the middle of a
//! field. Closed fields are handed to a [`FieldSink`]; the tokenizer itself
//! never looks at field contents.
//!
//! Quoting follows the usual CSV convention: a field that starts with `"` runs
//! to the next lone `"`, and `""` inside it stands for a literal quote. Bytes
//! after a closing quote and before the next separator are tolerated and
//! turn the field back into an unquoted one.

use crate::config::{ParserConfig, PartialRecordPolicy};
use crate::error::{ParseError, ParseResult};
use crate::store::{StoreError, StoreErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Start of a field, or only leading whitespace seen so far.
    Initial,
    Quoted,
    /// A quote inside a quoted field: either the closing quote or the first
    /// half of `""`.
    EndQuote,
    AfterQuoted,
    Unquoted,
    /// Saw `\r`, an optional `\n` may follow.
    EndOfLine,
}

/// Byte range of a closed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FieldRange {
    pub column: usize,
    pub start: u64,
    pub end: u64,
    /// Doubled quotes inside the range.
    pub escapes: usize,
    /// Synthesized by the fill policy rather than read from the input.
    pub filled: bool,
}

impl FieldRange {
    /// Raw byte length of the field.
    pub fn len(&self) -> ParseResult<usize> {
        let len = self.end.saturating_sub(self.start);
        usize::try_from(len).map_err(|_| {
            StoreError::new(
                StoreErrorKind::InvalidInput,
                format!("field of {len} bytes at offset {} is not addressable", self.start),
            )
            .into()
        })
    }
}

/// Receiver for closed fields.
pub(crate) trait FieldSink {
    fn field(&mut self, field: FieldRange) -> ParseResult<()>;
}

/// How a record ended. `observed` is 0 for an empty or whitespace-only line,
/// which goes through the partial-record policy like any short record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordClose {
    Emit { observed: usize, filled: bool },
    Dropped { observed: usize },
    /// The record straddling the range start, owned by the previous range.
    Skipped,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Step {
    /// Whether the cursor moves past the byte.
    pub consumed: bool,
    pub closed: Option<RecordClose>,
}

impl Step {
    const NEXT: Self = Self {
        consumed: true,
        closed: None,
    };

    const fn closed(close: RecordClose) -> Self {
        Self {
            consumed: true,
            closed: Some(close),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Tokenizer {
    state: State,
    separator: u8,
    whitespace_separator: bool,
    collapse: bool,
    policy: PartialRecordPolicy,
    arity: usize,

    column: usize,
    field_start: u64,
    field_end: u64,
    escapes: usize,
    record_start: u64,
    skipping: bool,
    max_observed: usize,
}

impl Tokenizer {
    pub fn new(config: &ParserConfig, arity: usize, skip_first: bool) -> Self {
        Self {
            state: State::Initial,
            separator: config.separator_byte(),
            whitespace_separator: config.whitespace_separator,
            collapse: config.collapse_separators,
            policy: config.partial_records,
            arity,
            column: 0,
            field_start: 0,
            field_end: 0,
            escapes: 0,
            record_start: 0,
            skipping: skip_first,
            max_observed: 0,
        }
    }

    pub const fn is_skipping(&self) -> bool {
        self.skipping
    }

    /// Highest number of fields seen in any record that was not skipped.
    pub const fn max_observed(&self) -> usize {
        self.max_observed
    }

    pub fn begin_record(&mut self, pos: u64) {
        self.state = State::Initial;
        self.column = 0;
        self.field_start = pos;
        self.field_end = pos;
        self.escapes = 0;
        self.record_start = pos;
    }

    #[inline]
    fn is_separator(&self, b: u8) -> bool {
        b == self.separator || (self.whitespace_separator && b.is_ascii_whitespace())
    }

    /// Feed the byte at logical offset `pos`.
    pub fn step<S: FieldSink>(&mut self, b: u8, pos: u64, sink: &mut S) -> ParseResult<Step> {
        match self.state {
            State::Initial => self.initial(b, pos, sink),
            State::Quoted => {
                if b == b'"' {
                    self.state = State::EndQuote;
                    self.field_end = pos;
                }
                Ok(Step::NEXT)
            }
            State::EndQuote => {
                if b == b'"' {
                    self.escapes += 1;
                    self.state = State::Quoted;
                    Ok(Step::NEXT)
                } else {
                    self.state = State::AfterQuoted;
                    self.after_quoted(b, pos, sink)
                }
            }
            State::AfterQuoted => self.after_quoted(b, pos, sink),
            State::Unquoted => match b {
                b'\r' => {
                    self.field_end = pos;
                    self.close_field(pos + 1, sink)?;
                    self.state = State::EndOfLine;
                    Ok(Step::NEXT)
                }
                b'\n' => {
                    self.field_end = pos;
                    self.close_field(pos + 1, sink)?;
                    self.close_record(pos, sink).map(Step::closed)
                }
                _ if self.is_separator(b) => {
                    self.field_end = pos;
                    self.close_field(pos + 1, sink)?;
                    Ok(Step::NEXT)
                }
                _ => Ok(Step::NEXT),
            },
            State::EndOfLine => {
                // a lone \r ends the record without eating the next byte
                let closed = self.close_record(pos, sink)?;
                Ok(Step {
                    consumed: b == b'\n',
                    closed: Some(closed),
                })
            }
        }
    }

    /// Close whatever is pending at the true end of the data.
    pub fn finish<S: FieldSink>(
        &mut self,
        pos: u64,
        sink: &mut S,
    ) -> ParseResult<Option<RecordClose>> {
        match self.state {
            State::Initial => {
                if self.column == 0 {
                    return Ok(None);
                }
                self.trailing_empty_field(pos, sink)?;
            }
            State::Quoted | State::Unquoted => {
                self.field_end = pos;
                self.close_field(pos, sink)?;
            }
            State::EndQuote | State::AfterQuoted => self.close_field(pos, sink)?,
            State::EndOfLine => {}
        }
        self.close_record(pos, sink).map(Some)
    }

    fn initial<S: FieldSink>(&mut self, b: u8, pos: u64, sink: &mut S) -> ParseResult<Step> {
        match b {
            b'\r' => {
                self.trailing_empty_field(pos, sink)?;
                self.state = State::EndOfLine;
                Ok(Step::NEXT)
            }
            b'\n' => {
                self.trailing_empty_field(pos, sink)?;
                self.close_record(pos, sink).map(Step::closed)
            }
            b'"' => {
                self.state = State::Quoted;
                self.field_start = pos + 1;
                Ok(Step::NEXT)
            }
            _ if self.is_separator(b) => {
                if self.collapse && (self.column > 0 || b.is_ascii_whitespace()) {
                    self.field_start = pos + 1;
                } else {
                    self.field_end = pos;
                    self.close_field(pos + 1, sink)?;
                }
                Ok(Step::NEXT)
            }
            _ if b.is_ascii_whitespace() => {
                self.field_start = pos + 1;
                Ok(Step::NEXT)
            }
            _ => {
                self.state = State::Unquoted;
                Ok(Step::NEXT)
            }
        }
    }

    fn after_quoted<S: FieldSink>(&mut self, b: u8, pos: u64, sink: &mut S) -> ParseResult<Step> {
        match b {
            b'\r' => {
                self.close_field(pos + 1, sink)?;
                self.state = State::EndOfLine;
                Ok(Step::NEXT)
            }
            b'\n' => {
                self.close_field(pos + 1, sink)?;
                self.close_record(pos, sink).map(Step::closed)
            }
            _ if self.is_separator(b) => {
                self.close_field(pos + 1, sink)?;
                Ok(Step::NEXT)
            }
            _ if b.is_ascii_whitespace() => Ok(Step::NEXT),
            _ => {
                // text after the closing quote; keep going as an unquoted field
                self.state = State::Unquoted;
                Ok(Step::NEXT)
            }
        }
    }

    // In Initial, column > 0 means the previous field was closed by a
    // separator, so the line ends with an empty field.
    fn trailing_empty_field<S: FieldSink>(&mut self, pos: u64, sink: &mut S) -> ParseResult<()> {
        if self.column > 0 && !self.collapse {
            self.field_end = pos;
            self.close_field(pos, sink)?;
        }
        Ok(())
    }

    fn close_field<S: FieldSink>(&mut self, next_start: u64, sink: &mut S) -> ParseResult<()> {
        if !self.skipping {
            if self.column < self.arity {
                sink.field(FieldRange {
                    column: self.column,
                    start: self.field_start,
                    end: self.field_end.max(self.field_start),
                    escapes: self.escapes,
                    filled: false,
                })?;
            }
            self.max_observed = self.max_observed.max(self.column + 1);
        }
        self.column += 1;
        self.field_start = next_start;
        self.escapes = 0;
        self.state = State::Initial;
        Ok(())
    }

    fn close_record<S: FieldSink>(&mut self, pos: u64, sink: &mut S) -> ParseResult<RecordClose> {
        if self.skipping {
            self.skipping = false;
            return Ok(RecordClose::Skipped);
        }
        let observed = self.column;
        if observed >= self.arity {
            return Ok(RecordClose::Emit {
                observed,
                filled: false,
            });
        }
        match self.policy {
            PartialRecordPolicy::FillWithDefaults => {
                for column in observed..self.arity {
                    sink.field(FieldRange {
                        column,
                        start: pos,
                        end: pos,
                        escapes: 0,
                        filled: true,
                    })?;
                }
                Ok(RecordClose::Emit {
                    observed,
                    filled: true,
                })
            }
            PartialRecordPolicy::Drop => Ok(RecordClose::Dropped { observed }),
            PartialRecordPolicy::Error => Err(ParseError::PartialRecord {
                observed,
                declared: self.arity,
                offset: self.record_start,
            }),
        }
    }
}
