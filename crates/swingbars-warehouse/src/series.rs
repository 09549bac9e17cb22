//! Series identifiers and the physical table naming scheme.

use crate::WarehouseError;

/// Resolution codes a series table may be created for.
pub const SUPPORTED_RESOLUTIONS: &[&str] = &["1d", "1m"];

const MAX_TICKER_LEN: usize = 15;

/// Validated (ticker, resolution) pair naming one bar table.
///
/// Table names are interpolated into SQL as quoted identifiers, so the
/// constructor is the only way in and it rejects anything outside the
/// ticker alphabet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesId {
    ticker: String,
    resolution: &'static str,
}

impl SeriesId {
    pub fn new(ticker: &str, resolution: &str) -> Result<Self, WarehouseError> {
        let resolution = SUPPORTED_RESOLUTIONS
            .iter()
            .copied()
            .find(|candidate| *candidate == resolution)
            .ok_or_else(|| {
                WarehouseError::InvalidSeries(format!("unsupported resolution '{resolution}'"))
            })?;

        if ticker.is_empty() || ticker.len() > MAX_TICKER_LEN {
            return Err(WarehouseError::InvalidSeries(format!(
                "ticker '{ticker}' must be 1..={MAX_TICKER_LEN} characters"
            )));
        }
        let valid = ticker
            .chars()
            .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '.' || ch == '-');
        if !valid {
            return Err(WarehouseError::InvalidSeries(format!(
                "ticker '{ticker}' contains characters outside [A-Z0-9.-]"
            )));
        }

        Ok(Self {
            ticker: ticker.to_owned(),
            resolution,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn resolution(&self) -> &'static str {
        self.resolution
    }

    /// Unquoted table name, e.g. `bars_1d_AAPL`.
    pub fn table_name(&self) -> String {
        format!("bars_{}_{}", self.resolution, self.ticker)
    }

    pub(crate) fn quoted_table_name(&self) -> String {
        format!("\"{}\"", self.table_name())
    }
}
