//! Bar persistence seam used by the data manager.
//!
//! [`BarStore`] is synchronous: the DuckDB warehouse blocks, and the data
//! manager moves every store call onto the blocking pool.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use swingbars_warehouse::{BarRecord, SeriesId, Warehouse};
use tracing::warn;

use crate::domain::{Bar, CachedRange, Resolution, Series, SeriesKey, Symbol, UtcDateTime};
use crate::PersistenceError;

/// Counts reported by a committed merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MergeSummary {
    pub inserted: usize,
    pub replaced: usize,
}

/// Durable, mergeable storage of bars plus the coverage ledger describing them.
pub trait BarStore: Send + Sync {
    /// Bars physically present inside `range`, ascending and unique.
    fn read(&self, key: &SeriesKey, range: CachedRange) -> Result<Series, PersistenceError>;

    /// Upsert by timestamp; incoming bars win. All-or-nothing.
    fn merge(&self, key: &SeriesKey, bars: &[Bar]) -> Result<MergeSummary, PersistenceError>;

    /// Every persisted coverage interval.
    fn load_coverage(&self) -> Result<Vec<(SeriesKey, CachedRange)>, PersistenceError>;

    /// Replace the persisted coverage of one series.
    fn save_coverage(&self, key: &SeriesKey, ranges: &[CachedRange]) -> Result<(), PersistenceError>;
}

fn series_id(key: &SeriesKey) -> Result<SeriesId, PersistenceError> {
    Ok(SeriesId::new(key.symbol.as_str(), key.resolution.as_str())?)
}

fn to_record(bar: &Bar) -> BarRecord {
    BarRecord {
        ts_micros: bar.ts.unix_micros(),
        open: bar.open,
        high: bar.high,
        low: bar.low,
        close: bar.close,
        volume: bar.volume,
    }
}

fn from_record(record: &BarRecord) -> Result<Bar, PersistenceError> {
    let corrupt = |detail: String| {
        PersistenceError::new(format!("stored bar at {}us is invalid: {detail}", record.ts_micros))
    };
    let ts = UtcDateTime::from_unix_micros(record.ts_micros).map_err(|e| corrupt(e.to_string()))?;
    Bar::new(
        ts,
        record.open,
        record.high,
        record.low,
        record.close,
        record.volume,
    )
    .map_err(|e| corrupt(e.to_string()))
}

impl BarStore for Warehouse {
    fn read(&self, key: &SeriesKey, range: CachedRange) -> Result<Series, PersistenceError> {
        let records = self.read_bars(
            &series_id(key)?,
            range.start().unix_micros(),
            range.end().unix_micros(),
        )?;
        let bars = records
            .iter()
            .map(from_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Series::from_unordered(key, bars))
    }

    fn merge(&self, key: &SeriesKey, bars: &[Bar]) -> Result<MergeSummary, PersistenceError> {
        let records: Vec<BarRecord> = bars.iter().map(to_record).collect();
        let report = self.merge_bars(&series_id(key)?, &records)?;
        Ok(MergeSummary {
            inserted: report.inserted,
            replaced: report.replaced,
        })
    }

    fn load_coverage(&self) -> Result<Vec<(SeriesKey, CachedRange)>, PersistenceError> {
        let mut coverage = Vec::new();
        for record in Warehouse::load_coverage(self)? {
            let parsed = (|| -> Result<(SeriesKey, CachedRange), String> {
                let symbol = Symbol::parse(&record.ticker).map_err(|e| e.to_string())?;
                let resolution: Resolution =
                    record.resolution.parse().map_err(|e: crate::InvalidRangeError| e.to_string())?;
                let start =
                    UtcDateTime::from_unix_micros(record.start_micros).map_err(|e| e.to_string())?;
                let end =
                    UtcDateTime::from_unix_micros(record.end_micros).map_err(|e| e.to_string())?;
                let range = CachedRange::new(start, end).map_err(|e| e.to_string())?;
                Ok((SeriesKey::new(symbol, resolution), range))
            })();

            match parsed {
                Ok(entry) => coverage.push(entry),
                // A skipped row only costs a refetch of that interval.
                Err(detail) => warn!(
                    ticker = %record.ticker,
                    resolution = %record.resolution,
                    %detail,
                    "ignoring unreadable coverage row"
                ),
            }
        }
        Ok(coverage)
    }

    fn save_coverage(&self, key: &SeriesKey, ranges: &[CachedRange]) -> Result<(), PersistenceError> {
        let bounds: Vec<(i64, i64)> = ranges
            .iter()
            .map(|range| (range.start().unix_micros(), range.end().unix_micros()))
            .collect();
        Ok(self.replace_coverage(&series_id(key)?, &bounds)?)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    bars: HashMap<SeriesKey, BTreeMap<UtcDateTime, Bar>>,
    coverage: HashMap<SeriesKey, Vec<CachedRange>>,
}

/// Process-local store for ephemeral runs and tests. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BarStore for MemoryStore {
    fn read(&self, key: &SeriesKey, range: CachedRange) -> Result<Series, PersistenceError> {
        let state = self.state.lock().expect("memory store lock is not poisoned");
        let bars = state
            .bars
            .get(key)
            .map(|bars| {
                bars.range(range.start()..=range.end())
                    .map(|(_, bar)| *bar)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(Series::from_unordered(key, bars))
    }

    fn merge(&self, key: &SeriesKey, bars: &[Bar]) -> Result<MergeSummary, PersistenceError> {
        let mut state = self.state.lock().expect("memory store lock is not poisoned");
        let stored = state.bars.entry(key.clone()).or_default();
        let mut summary = MergeSummary::default();
        for bar in bars {
            if stored.insert(bar.ts, *bar).is_some() {
                summary.replaced += 1;
            } else {
                summary.inserted += 1;
            }
        }
        Ok(summary)
    }

    fn load_coverage(&self) -> Result<Vec<(SeriesKey, CachedRange)>, PersistenceError> {
        let state = self.state.lock().expect("memory store lock is not poisoned");
        let mut coverage: Vec<(SeriesKey, CachedRange)> = state
            .coverage
            .iter()
            .flat_map(|(key, ranges)| ranges.iter().map(move |range| (key.clone(), *range)))
            .collect();
        coverage.sort();
        Ok(coverage)
    }

    fn save_coverage(&self, key: &SeriesKey, ranges: &[CachedRange]) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().expect("memory store lock is not poisoned");
        state.coverage.insert(key.clone(), ranges.to_vec());
        Ok(())
    }
}
