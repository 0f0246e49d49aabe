//! Parser configuration and record shapes.
//!
//! Both types are plain serde structs, so a deployment can keep them in a JSON
//! file next to the dataset description:
//!
//! ```
//! use chunked_csv::{ParserConfig, PartialRecordPolicy};
//!
//! let cfg = ParserConfig::from_json_str(r#"{ "separator": ";", "partial_records": "fill_with_defaults" }"#)?;
//! assert_eq!(cfg.separator, ';');
//! assert_eq!(cfg.partial_records, PartialRecordPolicy::FillWithDefaults);
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::error::{ParseError, ParseResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// What to do with a record that ends before every declared column was seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialRecordPolicy {
    /// Close the missing trailing fields as empty, which yields each column's default.
    FillWithDefaults,
    /// Leave the record out of the output.
    #[default]
    Drop,
    /// Fail the session.
    Error,
}

/// Values substituted for missing or unparsable numeric fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldDefaults {
    pub int: i64,
    pub float: f32,
    pub double: f64,
}

impl Default for FieldDefaults {
    fn default() -> Self {
        Self {
            int: i64::MAX,
            float: f32::NAN,
            double: f64::NAN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Field separator. Must be an ASCII character other than `"`, `\r` or `\n`.
    pub separator: char,
    /// Treat any ASCII whitespace as a separator too.
    pub whitespace_separator: bool,
    /// Treat a run of separators as one, and never open an empty field on
    /// whitespace.
    pub collapse_separators: bool,
    pub partial_records: PartialRecordPolicy,
    pub defaults: FieldDefaults,
    /// Radix for integer columns.
    pub radix: u32,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            separator: ',',
            whitespace_separator: true,
            collapse_separators: true,
            partial_records: PartialRecordPolicy::Drop,
            defaults: FieldDefaults::default(),
            radix: 10,
        }
    }
}

impl ParserConfig {
    /// Strict single-character delimited text: whitespace is data, every
    /// separator opens a field.
    #[must_use]
    pub fn delimited(separator: char) -> Self {
        Self {
            separator,
            whitespace_separator: false,
            collapse_separators: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    #[must_use]
    pub const fn with_whitespace_separator(mut self, on: bool) -> Self {
        self.whitespace_separator = on;
        self
    }

    #[must_use]
    pub const fn with_collapse_separators(mut self, on: bool) -> Self {
        self.collapse_separators = on;
        self
    }

    #[must_use]
    pub const fn with_partial_records(mut self, policy: PartialRecordPolicy) -> Self {
        self.partial_records = policy;
        self
    }

    #[must_use]
    pub const fn with_defaults(mut self, defaults: FieldDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    #[must_use]
    pub const fn with_radix(mut self, radix: u32) -> Self {
        self.radix = radix;
        self
    }

    /// # Errors
    ///
    /// Returns an error if the separator or radix is unusable.
    pub fn validate(&self) -> ParseResult<()> {
        if !self.separator.is_ascii() || matches!(self.separator, '"' | '\r' | '\n') {
            return Err(ParseError::Config(format!(
                "separator {:?} must be ASCII and not a quote or line break",
                self.separator
            )));
        }
        if !(2..=36).contains(&self.radix) {
            return Err(ParseError::Config(format!(
                "radix {} outside 2..=36",
                self.radix
            )));
        }
        Ok(())
    }

    /// Separator as a byte; only meaningful after [`validate`](Self::validate).
    #[must_use]
    pub const fn separator_byte(&self) -> u8 {
        self.separator as u8
    }

    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the result fails validation.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json).context("parse parser config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not hold a valid config.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json =
            std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("load config {}", path.display()))
    }
}

/// Type of a record slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[serde(alias = "integer", alias = "i64")]
    Int,
    #[serde(alias = "f32")]
    Float,
    #[serde(alias = "f64")]
    Double,
    #[serde(alias = "string", alias = "str")]
    Text,
}

impl FromStr for ColumnType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" | "i64" => Ok(Self::Int),
            "float" | "f32" => Ok(Self::Float),
            "double" | "f64" => Ok(Self::Double),
            "text" | "string" | "str" => Ok(Self::Text),
            _ => Err(ParseError::UnsupportedColumnType(s.trim().to_string())),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Double => "double",
            Self::Text => "text",
        })
    }
}

/// Fixed arity and per-column types of the records a session produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordShape {
    columns: Vec<ColumnType>,
}

impl RecordShape {
    /// # Errors
    ///
    /// Returns an error if `columns` is empty.
    pub fn new(columns: Vec<ColumnType>) -> ParseResult<Self> {
        let shape = Self { columns };
        shape.validate()?;
        Ok(shape)
    }

    /// `arity` columns of the same type.
    ///
    /// # Errors
    ///
    /// Returns an error if `arity` is zero.
    pub fn uniform(column: ColumnType, arity: usize) -> ParseResult<Self> {
        Self::new(vec![column; arity])
    }

    /// Parse a comma-separated list of type names, e.g. `"int, double, text"`.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first unsupported descriptor.
    pub fn parse(desc: &str) -> ParseResult<Self> {
        let columns = desc
            .split(',')
            .map(str::parse)
            .collect::<ParseResult<Vec<ColumnType>>>()?;
        Self::new(columns)
    }

    /// # Errors
    ///
    /// Returns an error if the shape has no columns.
    pub fn validate(&self) -> ParseResult<()> {
        if self.columns.is_empty() {
            return Err(ParseError::Config("record shape has no columns".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn column(&self, index: usize) -> Option<ColumnType> {
        self.columns.get(index).copied()
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnType] {
        &self.columns
    }
}

impl FromStr for RecordShape {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
