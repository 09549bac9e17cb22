use serde::Serialize;
use thiserror::Error;

use crate::domain::UtcDateTime;

/// Validation errors raised while constructing domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter: '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("timestamp must be RFC3339 UTC (suffix Z) or a YYYY-MM-DD date: '{value}'")]
    TimestampNotUtc { value: String },
    #[error("timestamp is outside the representable range: {micros}us")]
    TimestampOutOfRange { micros: i64 },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be strictly positive")]
    NonPositiveValue { field: &'static str },

    #[error("bar high must be >= low")]
    InvalidBarRange,
    #[error("bar open/close must be within high/low range")]
    InvalidBarBounds,
}

/// A request range that cannot be served at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidRangeError {
    #[error("range start {start} is after end {end}")]
    Inverted { start: UtcDateTime, end: UtcDateTime },
    #[error("unsupported resolution '{value}', expected one of 1d, 1m")]
    UnsupportedResolution { value: String },
}

/// The bar store could not complete a read or write. Prior state is intact.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[error("persistence failed: {message}")]
pub struct PersistenceError {
    message: String,
}

impl PersistenceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<swingbars_warehouse::WarehouseError> for PersistenceError {
    fn from(error: swingbars_warehouse::WarehouseError) -> Self {
        Self::new(error.to_string())
    }
}

/// Top-level error returned by the data manager and run contexts.
#[derive(Debug, Error)]
pub enum DataError {
    #[error(transparent)]
    InvalidRange(#[from] InvalidRangeError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("{key} is incomplete: {uncovered} range(s) could not be filled")]
    Incomplete { key: String, uncovered: usize },
}
