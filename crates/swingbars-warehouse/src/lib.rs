//! # Swingbars Warehouse
//!
//! DuckDB-backed storage for cached OHLCV bars.
//!
//! ## Layout
//!
//! Each (ticker, resolution) pair owns one table named
//! `bars_{resolution}_{TICKER}`, keyed by `timestamp`. Tables are created on the
//! first merge and registered in `series_catalog`.
//!
//! | Table | Description |
//! |-------|-------------|
//! | `series_catalog` | One row per bar table |
//! | `bars_1d_<TICKER>` | Daily bars for one ticker |
//! | `bars_1m_<TICKER>` | Minute bars for one ticker |
//! | `coverage_ledger` | Ranges known to be fully cached |
//! | `ingest_log` | Merge audit log |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use swingbars_warehouse::{BarRecord, SeriesId, Warehouse};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open_default()?;
//!     let series = SeriesId::new("AAPL", "1d")?;
//!
//!     warehouse.merge_bars(
//!         &series,
//!         &[BarRecord {
//!             ts_micros: 1_704_067_200_000_000,
//!             open: 187.15,
//!             high: 188.44,
//!             low: 183.89,
//!             close: 185.64,
//!             volume: 82_488_700,
//!         }],
//!     )?;
//!
//!     let bars = warehouse.read_bars(&series, 0, i64::MAX)?;
//!     println!("{} bars cached", bars.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Security
//!
//! Values always travel as query parameters. Table names are the only
//! interpolated identifiers and can only be built through [`SeriesId::new`],
//! which restricts them to `[A-Z0-9.-]`.

pub mod duckdb;
pub mod migrations;
pub mod series;

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::Connection;
use ::duckdb::ToSql;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};
pub use series::{SeriesId, SUPPORTED_RESOLUTIONS};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Ticker or resolution cannot name a series table.
    #[error("invalid series: {0}")]
    InvalidSeries(String),

    /// The series has never been merged into this warehouse.
    #[error("no cached series for {ticker} at {resolution}")]
    UnknownSeries { ticker: String, resolution: String },
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for swingbars data.
    pub swingbars_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::for_home(resolve_swingbars_home())
    }
}

impl WarehouseConfig {
    /// Default layout under an explicit home directory.
    pub fn for_home(swingbars_home: PathBuf) -> Self {
        let db_path = swingbars_home.join("cache").join("bars.duckdb");
        Self {
            swingbars_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// One stored bar. Timestamps are microseconds since the Unix epoch, UTC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarRecord {
    pub ts_micros: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// One persisted coverage interval, bounds inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageRecord {
    pub ticker: String,
    pub resolution: String,
    pub start_micros: i64,
    pub end_micros: i64,
}

/// Outcome of a committed merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub batch_id: String,
    pub rows: usize,
    pub inserted: usize,
    pub replaced: usize,
}

impl MergeReport {
    fn empty() -> Self {
        Self {
            batch_id: String::new(),
            rows: 0,
            inserted: 0,
            replaced: 0,
        }
    }
}

/// Catalog entry describing one cached bar table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesSummary {
    pub ticker: String,
    pub resolution: String,
    pub table_name: String,
    pub row_count: i64,
    pub first_micros: Option<i64>,
    pub last_micros: Option<i64>,
}

/// The main warehouse interface for cached bars.
#[derive(Clone)]
pub struct Warehouse {
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a warehouse with the specified configuration.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Open a throwaway warehouse that lives only as long as this handle.
    pub fn open_in_memory() -> Result<Self, WarehouseError> {
        let manager = DuckDbConnectionManager::open_in_memory(2)?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Initialize the bookkeeping schema.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Get the path to the database file.
    pub fn db_path(&self) -> Option<&Path> {
        self.manager.db_path()
    }

    /// Bars with `start <= ts <= end`, ascending. Unknown series read as empty.
    pub fn read_bars(
        &self,
        series: &SeriesId,
        start_micros: i64,
        end_micros: i64,
    ) -> Result<Vec<BarRecord>, WarehouseError> {
        let connection = self.manager.acquire()?;
        if !series_exists(&connection, series)? {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT epoch_us(\"timestamp\"), open, high, low, close, volume FROM {table} \
             WHERE epoch_us(\"timestamp\") BETWEEN ? AND ? \
             ORDER BY \"timestamp\"",
            table = series.quoted_table_name()
        );
        let mut statement = connection.prepare(sql.as_str())?;
        let params: [&dyn ToSql; 2] = [&start_micros, &end_micros];
        let rows = statement.query_map(params.as_slice(), |row| {
            Ok(BarRecord {
                ts_micros: row.get(0)?,
                open: row.get(1)?,
                high: row.get(2)?,
                low: row.get(3)?,
                close: row.get(4)?,
                volume: row.get(5)?,
            })
        })?;

        let mut bars = Vec::new();
        for row in rows {
            bars.push(row?);
        }
        Ok(bars)
    }

    /// Upsert bars by timestamp in a single transaction.
    ///
    /// Incoming rows overwrite stored rows with the same timestamp. When the
    /// input repeats a timestamp the last occurrence wins. Either every row is
    /// applied or none is.
    pub fn merge_bars(
        &self,
        series: &SeriesId,
        rows: &[BarRecord],
    ) -> Result<MergeReport, WarehouseError> {
        if rows.is_empty() {
            return Ok(MergeReport::empty());
        }

        let rows = dedupe_last_wins(rows);
        let batch_id = Uuid::new_v4().to_string();
        let table = series.quoted_table_name();

        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<MergeReport, WarehouseError> {
            ensure_series(&connection, series)?;
            let before = count_rows(&connection, &table)?;

            let insert_sql = format!(
                "INSERT OR REPLACE INTO {table} \
                 (\"timestamp\", open, high, low, close, volume) \
                 VALUES (make_timestamp(CAST(? AS BIGINT)), ?, ?, ?, ?, ?)"
            );
            let mut statement = connection.prepare(insert_sql.as_str())?;
            for row in &rows {
                let params: [&dyn ToSql; 6] = [
                    &row.ts_micros,
                    &row.open,
                    &row.high,
                    &row.low,
                    &row.close,
                    &row.volume,
                ];
                statement.execute(params.as_slice())?;
            }

            let after = count_rows(&connection, &table)?;
            let inserted = usize::try_from(after - before).unwrap_or(0);
            let report = MergeReport {
                batch_id: batch_id.clone(),
                rows: rows.len(),
                inserted,
                replaced: rows.len().saturating_sub(inserted),
            };

            let params: [&dyn ToSql; 6] = [
                &report.batch_id,
                &series.ticker(),
                &series.resolution(),
                &(report.rows as i64),
                &(report.inserted as i64),
                &(report.replaced as i64),
            ];
            connection.execute(
                "INSERT INTO ingest_log \
                 (batch_id, ticker, resolution, rows, inserted, replaced, status, timestamp) \
                 VALUES (?, ?, ?, ?, ?, ?, 'merged', CURRENT_TIMESTAMP)",
                params.as_slice(),
            )?;

            Ok(report)
        })();

        let report = finalize_transaction(&connection, result)?;
        debug!(
            table = %series.table_name(),
            batch_id = %report.batch_id,
            inserted = report.inserted,
            replaced = report.replaced,
            "merged bars"
        );
        Ok(report)
    }

    /// Every persisted coverage interval, ordered by series then start.
    pub fn load_coverage(&self) -> Result<Vec<CoverageRecord>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT ticker, resolution, range_start, range_end FROM coverage_ledger \
             ORDER BY ticker, resolution, range_start",
        )?;
        let rows = statement.query_map([], |row| {
            Ok(CoverageRecord {
                ticker: row.get(0)?,
                resolution: row.get(1)?,
                start_micros: row.get(2)?,
                end_micros: row.get(3)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Replace the persisted coverage of one series with `ranges`.
    pub fn replace_coverage(
        &self,
        series: &SeriesId,
        ranges: &[(i64, i64)],
    ) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            let params: [&dyn ToSql; 2] = [&series.ticker(), &series.resolution()];
            connection.execute(
                "DELETE FROM coverage_ledger WHERE ticker = ? AND resolution = ?",
                params.as_slice(),
            )?;

            let mut statement = connection.prepare(
                "INSERT INTO coverage_ledger (ticker, resolution, range_start, range_end, recorded_at) \
                 VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)",
            )?;
            for (start, end) in ranges {
                let params: [&dyn ToSql; 4] =
                    [&series.ticker(), &series.resolution(), start, end];
                statement.execute(params.as_slice())?;
            }
            Ok(())
        })();

        finalize_transaction(&connection, result)
    }

    /// Catalog of cached bar tables with their row counts and time bounds.
    pub fn series_catalog(&self) -> Result<Vec<SeriesSummary>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection
            .prepare("SELECT ticker, resolution FROM series_catalog ORDER BY ticker, resolution")?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (ticker, resolution) = row?;
            let series = SeriesId::new(&ticker, &resolution)?;
            let sql = format!(
                "SELECT COUNT(*), epoch_us(MIN(\"timestamp\")), epoch_us(MAX(\"timestamp\")) \
                 FROM {table}",
                table = series.quoted_table_name()
            );
            let (row_count, first_micros, last_micros) =
                connection.query_row(sql.as_str(), [], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                })?;
            summaries.push(SeriesSummary {
                table_name: series.table_name(),
                ticker,
                resolution,
                row_count,
                first_micros,
                last_micros,
            });
        }
        Ok(summaries)
    }

    /// Write one series to a Parquet file, physically sorted by timestamp.
    /// Returns the number of rows written.
    pub fn export_parquet(&self, series: &SeriesId, output: &Path) -> Result<i64, WarehouseError> {
        let connection = self.manager.acquire()?;
        if !series_exists(&connection, series)? {
            return Err(WarehouseError::UnknownSeries {
                ticker: series.ticker().to_owned(),
                resolution: series.resolution().to_owned(),
            });
        }

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let table = series.quoted_table_name();
        // COPY does not accept a bound parameter for the target path.
        let sql = format!(
            "COPY (SELECT \"timestamp\", open, high, low, close, volume FROM {table} \
             ORDER BY \"timestamp\") TO '{path}' (FORMAT PARQUET)",
            path = escape_sql_string(&path_to_sql(output))
        );
        connection.execute_batch(sql.as_str())?;
        count_rows(&connection, &table)
    }
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn series_exists(connection: &Connection, series: &SeriesId) -> Result<bool, WarehouseError> {
    let params: [&dyn ToSql; 2] = [&series.ticker(), &series.resolution()];
    let count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM series_catalog WHERE ticker = ? AND resolution = ?",
        params.as_slice(),
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Create the bar table for `series` and register it, if not already present.
fn ensure_series(connection: &Connection, series: &SeriesId) -> Result<(), WarehouseError> {
    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    \"timestamp\" TIMESTAMP PRIMARY KEY,
    open DOUBLE NOT NULL,
    high DOUBLE NOT NULL,
    low DOUBLE NOT NULL,
    close DOUBLE NOT NULL,
    volume UBIGINT NOT NULL,
    CHECK (low <= high),
    CHECK (open BETWEEN low AND high),
    CHECK (close BETWEEN low AND high)
);",
        table = series.quoted_table_name()
    );
    connection.execute_batch(ddl.as_str())?;

    let table_name = series.table_name();
    let params: [&dyn ToSql; 3] = [&series.ticker(), &series.resolution(), &table_name];
    connection.execute(
        "INSERT OR IGNORE INTO series_catalog (ticker, resolution, table_name) VALUES (?, ?, ?)",
        params.as_slice(),
    )?;
    Ok(())
}

fn count_rows(connection: &Connection, quoted_table: &str) -> Result<i64, WarehouseError> {
    let sql = format!("SELECT COUNT(*) FROM {quoted_table}");
    Ok(connection.query_row(sql.as_str(), [], |row| row.get(0))?)
}

fn dedupe_last_wins(rows: &[BarRecord]) -> Vec<BarRecord> {
    let mut by_ts = BTreeMap::new();
    for row in rows {
        by_ts.insert(row.ts_micros, *row);
    }
    by_ts.into_values().collect()
}

/// Resolve the swingbars home directory from environment or default.
fn resolve_swingbars_home() -> PathBuf {
    if let Some(path) = env::var_os("SWINGBARS_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".swingbars");
    }

    PathBuf::from(".swingbars")
}

/// Convert a path to a SQL-compatible string (forward slashes).
fn path_to_sql(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const DAY_US: i64 = 86_400_000_000;

    fn open_temp(temp: &tempfile::TempDir) -> Warehouse {
        let swingbars_home = temp.path().join("swingbars-home");
        Warehouse::open(WarehouseConfig {
            db_path: swingbars_home.join("cache").join("bars.duckdb"),
            swingbars_home,
            max_pool_size: 2,
        })
        .expect("warehouse open")
    }

    fn bar(day: i64, close: f64) -> BarRecord {
        BarRecord {
            ts_micros: day * DAY_US,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000,
        }
    }

    #[test]
    fn merge_then_read_returns_sorted_range() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(&temp);
        let series = SeriesId::new("AAPL", "1d").expect("series");

        let report = warehouse
            .merge_bars(&series, &[bar(3, 12.0), bar(1, 10.0), bar(2, 11.0)])
            .expect("merge");
        assert_eq!(report.inserted, 3);
        assert_eq!(report.replaced, 0);

        let bars = warehouse
            .read_bars(&series, 2 * DAY_US, 3 * DAY_US)
            .expect("read");
        let days: Vec<i64> = bars.iter().map(|bar| bar.ts_micros / DAY_US).collect();
        assert_eq!(days, vec![2, 3]);
    }

    #[test]
    fn merge_overwrites_existing_timestamps() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(&temp);
        let series = SeriesId::new("MSFT", "1d").expect("series");

        warehouse
            .merge_bars(&series, &[bar(1, 10.0), bar(2, 11.0)])
            .expect("first merge");
        let report = warehouse
            .merge_bars(&series, &[bar(2, 20.0), bar(3, 21.0)])
            .expect("second merge");
        assert_eq!(report.inserted, 1);
        assert_eq!(report.replaced, 1);

        let bars = warehouse.read_bars(&series, 0, i64::MAX).expect("read");
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[1].close, 20.0);
    }

    #[test]
    fn failed_merge_leaves_table_untouched() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(&temp);
        let series = SeriesId::new("TSLA", "1d").expect("series");
        warehouse.merge_bars(&series, &[bar(1, 10.0)]).expect("seed");

        let mut broken = bar(3, 30.0);
        broken.high = 1.0;
        let error = warehouse
            .merge_bars(&series, &[bar(1, 99.0), bar(2, 20.0), broken])
            .expect_err("check constraint should reject the batch");
        assert!(matches!(error, WarehouseError::DuckDb(_)));

        let bars = warehouse.read_bars(&series, 0, i64::MAX).expect("read");
        assert_eq!(bars, vec![bar(1, 10.0)]);
    }

    #[test]
    fn unknown_series_reads_empty() {
        let warehouse = Warehouse::open_in_memory().expect("warehouse");
        let series = SeriesId::new("NVDA", "1m").expect("series");
        assert!(warehouse.read_bars(&series, 0, i64::MAX).expect("read").is_empty());
    }

    #[test]
    fn coverage_replace_and_reload_survive_reopen() {
        let temp = tempdir().expect("tempdir");
        let series = SeriesId::new("AAPL", "1d").expect("series");
        {
            let warehouse = open_temp(&temp);
            warehouse
                .replace_coverage(&series, &[(0, 5 * DAY_US)])
                .expect("first write");
            warehouse
                .replace_coverage(&series, &[(0, 5 * DAY_US), (9 * DAY_US, 12 * DAY_US)])
                .expect("second write");
        }

        let warehouse = open_temp(&temp);
        let records = warehouse.load_coverage().expect("load");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].start_micros, 9 * DAY_US);
        assert_eq!(records[1].ticker, "AAPL");
        assert_eq!(records[1].resolution, "1d");
    }

    #[test]
    fn catalog_reports_counts_and_bounds() {
        let warehouse = Warehouse::open_in_memory().expect("warehouse");
        let series = SeriesId::new("SPY", "1d").expect("series");
        warehouse
            .merge_bars(&series, &[bar(4, 10.0), bar(7, 11.0)])
            .expect("merge");

        let catalog = warehouse.series_catalog().expect("catalog");
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].table_name, "bars_1d_SPY");
        assert_eq!(catalog[0].row_count, 2);
        assert_eq!(catalog[0].first_micros, Some(4 * DAY_US));
        assert_eq!(catalog[0].last_micros, Some(7 * DAY_US));
    }

    #[test]
    fn export_writes_parquet_file() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(&temp);
        let series = SeriesId::new("QQQ", "1d").expect("series");
        warehouse
            .merge_bars(&series, &[bar(2, 10.0), bar(1, 9.0)])
            .expect("merge");

        let output = temp.path().join("out").join("qqq.parquet");
        let rows = warehouse.export_parquet(&series, &output).expect("export");
        assert_eq!(rows, 2);
        assert!(output.exists());
    }

    #[test]
    fn export_of_unknown_series_is_rejected() {
        let warehouse = Warehouse::open_in_memory().expect("warehouse");
        let series = SeriesId::new("QQQ", "1m").expect("series");
        let error = warehouse
            .export_parquet(&series, Path::new("unused.parquet"))
            .expect_err("must fail");
        assert!(matches!(error, WarehouseError::UnknownSeries { .. }));
    }
}
