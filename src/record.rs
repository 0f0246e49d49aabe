//! Typed records produced by a parser session.

use crate::config::{ColumnType, FieldDefaults, RecordShape};
use crate::error::ParseResult;
use crate::span::FieldSpan;

/// One typed slot of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f32),
    Double(f64),
    Text(FieldSpan),
}

impl Value {
    pub(crate) fn default_for(ty: ColumnType, defaults: &FieldDefaults, empty: &FieldSpan) -> Self {
        match ty {
            ColumnType::Int => Self::Int(defaults.int),
            ColumnType::Float => Self::Float(defaults.float),
            ColumnType::Double => Self::Double(defaults.double),
            ColumnType::Text => Self::Text(empty.clone()),
        }
    }

    #[must_use]
    pub const fn column_type(&self) -> ColumnType {
        match self {
            Self::Int(_) => ColumnType::Int,
            Self::Float(_) => ColumnType::Float,
            Self::Double(_) => ColumnType::Double,
            Self::Text(_) => ColumnType::Text,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_text(&self) -> Option<&FieldSpan> {
        match self {
            Self::Text(span) => Some(span),
            _ => None,
        }
    }

    /// Render the value as text; spans are materialized.
    ///
    /// # Errors
    ///
    /// Returns an error if a text span cannot be read.
    pub fn materialize(&self) -> ParseResult<String> {
        Ok(match self {
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::Text(span) => span.materialize()?,
        })
    }
}

/// A fixed-arity record.
///
/// A session overwrites the same record on every advance. Numeric values are
/// plain copies; text values are spans and stay readable after the session
/// has moved on.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<Value>,
    observed: usize,
}

impl Record {
    pub(crate) fn blank(shape: &RecordShape, defaults: &FieldDefaults, empty: &FieldSpan) -> Self {
        let values = shape
            .columns()
            .iter()
            .map(|&ty| Value::default_for(ty, defaults, empty))
            .collect();
        Self {
            values,
            observed: 0,
        }
    }

    #[inline]
    pub(crate) fn set(&mut self, column: usize, value: Value) {
        if let Some(slot) = self.values.get_mut(column) {
            *slot = value;
        }
    }

    pub(crate) fn set_observed(&mut self, observed: usize) {
        self.observed = observed;
    }

    /// Declared arity.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of fields the input line actually had. May be below [`len`](Self::len)
    /// for a default-filled record, or above it when extra fields were ignored.
    #[must_use]
    pub const fn observed_columns(&self) -> usize {
        self.observed
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn get(&self, column: usize) -> Option<&Value> {
        self.values.get(column)
    }

    #[must_use]
    pub fn int(&self, column: usize) -> Option<i64> {
        self.get(column).and_then(Value::as_int)
    }

    #[must_use]
    pub fn float(&self, column: usize) -> Option<f32> {
        self.get(column).and_then(Value::as_float)
    }

    #[must_use]
    pub fn double(&self, column: usize) -> Option<f64> {
        self.get(column).and_then(Value::as_double)
    }

    #[must_use]
    pub fn text(&self, column: usize) -> Option<&FieldSpan> {
        self.get(column).and_then(Value::as_text)
    }

    /// Every value rendered as text.
    ///
    /// # Errors
    ///
    /// Returns an error if a text span cannot be read.
    pub fn materialize(&self) -> ParseResult<Vec<String>> {
        self.values.iter().map(Value::materialize).collect()
    }

    /// Values rendered as text and joined by `separator`. No quoting is applied.
    ///
    /// # Errors
    ///
    /// Returns an error if a text span cannot be read.
    pub fn render(&self, separator: char) -> ParseResult<String> {
        let mut buf = [0u8; 4];
        Ok(self.materialize()?.join(separator.encode_utf8(&mut buf)))
    }
}
