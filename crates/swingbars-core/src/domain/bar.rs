use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::domain::{Resolution, Symbol, UtcDateTime};
use crate::ValidationError;

/// One OHLCV bar. Construction validates prices; the timestamp is taken as given.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: UtcDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    pub fn new(
        ts: UtcDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Result<Self, ValidationError> {
        for (field, value) in [("open", open), ("high", high), ("low", low), ("close", close)] {
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteValue { field });
            }
            if value <= 0.0 {
                return Err(ValidationError::NonPositiveValue { field });
            }
        }

        if high < low {
            return Err(ValidationError::InvalidBarRange);
        }
        if !(low..=high).contains(&open) || !(low..=high).contains(&close) {
            return Err(ValidationError::InvalidBarBounds);
        }

        Ok(Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

/// Identity of one cached series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SeriesKey {
    pub symbol: Symbol,
    pub resolution: Resolution,
}

impl SeriesKey {
    pub fn new(symbol: Symbol, resolution: Resolution) -> Self {
        Self { symbol, resolution }
    }
}

impl Display for SeriesKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.resolution)
    }
}

/// Bars of one series, strictly ascending by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    symbol: Symbol,
    resolution: Resolution,
    bars: Vec<Bar>,
}

impl Series {
    pub fn empty(key: &SeriesKey) -> Self {
        Self {
            symbol: key.symbol.clone(),
            resolution: key.resolution,
            bars: Vec::new(),
        }
    }

    /// Sorts `bars` and drops repeated timestamps, keeping the last occurrence.
    pub fn from_unordered(key: &SeriesKey, bars: impl IntoIterator<Item = Bar>) -> Self {
        let by_ts: BTreeMap<UtcDateTime, Bar> = bars.into_iter().map(|bar| (bar.ts, bar)).collect();
        Self {
            symbol: key.symbol.clone(),
            resolution: key.resolution,
            bars: by_ts.into_values().collect(),
        }
    }

    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(self.symbol.clone(), self.resolution)
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn into_bars(self) -> Vec<Bar> {
        self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }
}
