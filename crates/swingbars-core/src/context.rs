//! Data access for the three run modes of a strategy.
//!
//! Backtests and optimizations read history through the cache and refuse to
//! run on partial data. Live runs always pull fresh daily bars.

use std::sync::Arc;

use serde::Serialize;
use time::Duration;
use tracing::info;

use crate::data_manager::{BarRequest, DataManager, SeriesOutcome};
use crate::domain::{Resolution, Series, Symbol, UtcDateTime};
use crate::DataError;

/// Extra calendar days requested in live mode to absorb weekends and holidays.
pub const LIVE_BUFFER_DAYS: u32 = 10;

/// Lower bound for the history a strategy is given.
pub const MIN_LOOKBACK_DAYS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Backtest,
    Optimize,
    Live,
}

/// Mode-aware front for a shared [`DataManager`].
#[derive(Clone)]
pub struct RunContext {
    manager: Arc<DataManager>,
    mode: RunMode,
    lookback_days: u32,
}

impl RunContext {
    pub fn backtest(manager: Arc<DataManager>) -> Self {
        Self {
            manager,
            mode: RunMode::Backtest,
            lookback_days: MIN_LOOKBACK_DAYS,
        }
    }

    pub fn optimize(manager: Arc<DataManager>) -> Self {
        Self {
            manager,
            mode: RunMode::Optimize,
            lookback_days: MIN_LOOKBACK_DAYS,
        }
    }

    pub fn live(manager: Arc<DataManager>, lookback_days: u32) -> Self {
        Self {
            manager,
            mode: RunMode::Live,
            lookback_days: lookback_days.max(MIN_LOOKBACK_DAYS),
        }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn lookback_days(&self) -> u32 {
        self.lookback_days
    }

    pub fn manager(&self) -> &DataManager {
        &self.manager
    }

    /// Cached history for `[start, end]`; any uncovered range is an error.
    ///
    /// Live contexts bypass the cache here as well.
    pub async fn history(
        &self,
        symbol: Symbol,
        resolution: Resolution,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> Result<Series, DataError> {
        let allow_cache = self.mode != RunMode::Live;
        let request = BarRequest::new(symbol, resolution, start, end, allow_cache)?;
        self.manager.get(request).await?.into_complete()
    }

    /// Fresh daily bars ending now, `lookback_days` plus a buffer long.
    pub async fn live_window(&self, symbol: Symbol) -> Result<SeriesOutcome, DataError> {
        self.live_window_at(symbol, UtcDateTime::now()).await
    }

    pub async fn live_window_at(
        &self,
        symbol: Symbol,
        now: UtcDateTime,
    ) -> Result<SeriesOutcome, DataError> {
        let days = i64::from(self.lookback_days + LIVE_BUFFER_DAYS);
        let start = now.checked_sub(Duration::days(days)).unwrap_or(now);
        info!(%symbol, %start, end = %now, "requesting live window");

        let request = BarRequest::new(symbol, Resolution::Daily, start, now, false)?;
        self.manager.get(request).await
    }
}

/// Longest lookback any configured strategy needs, never below 30 days.
pub fn max_lookback_days(lookbacks: &[u32]) -> u32 {
    lookbacks
        .iter()
        .copied()
        .max()
        .unwrap_or(0)
        .max(MIN_LOOKBACK_DAYS)
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    use super::*;
    use crate::domain::{Bar, CachedRange};
    use crate::fetcher::{BarFetcher, FetchError, FetchRequest};
    use crate::store::MemoryStore;

    #[derive(Default)]
    struct RecordingFetcher {
        ranges: Mutex<Vec<CachedRange>>,
        fail: bool,
    }

    impl BarFetcher for RecordingFetcher {
        fn id(&self) -> &'static str {
            "recording"
        }

        fn fetch<'a>(
            &'a self,
            request: FetchRequest,
        ) -> Pin<Box<dyn Future<Output = Result<Series, FetchError>> + Send + 'a>> {
            Box::pin(async move {
                self.ranges.lock().expect("ranges lock").push(request.range);
                if self.fail {
                    return Err(FetchError::not_found("unknown symbol"));
                }
                let bar = Bar::new(request.range.start(), 1.0, 2.0, 0.5, 1.5, 10).expect("bar");
                Ok(Series::from_unordered(&request.key, [bar]))
            })
        }
    }

    fn ts(input: &str) -> UtcDateTime {
        UtcDateTime::parse(input).expect("timestamp")
    }

    fn aapl() -> Symbol {
        Symbol::parse("AAPL").expect("symbol")
    }

    #[test]
    fn lookback_is_at_least_thirty_days() {
        assert_eq!(max_lookback_days(&[]), 30);
        assert_eq!(max_lookback_days(&[5, 20]), 30);
        assert_eq!(max_lookback_days(&[5, 200, 60]), 200);
    }

    #[tokio::test]
    async fn live_window_spans_lookback_plus_buffer_without_cache() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let manager = Arc::new(DataManager::new(Arc::new(MemoryStore::new()), fetcher.clone()));
        let context = RunContext::live(manager.clone(), 50);

        let outcome = context
            .live_window_at(aapl(), ts("2024-06-30T15:45:00Z"))
            .await
            .expect("live");
        assert!(outcome.is_complete());

        let ranges = fetcher.ranges.lock().expect("ranges lock").clone();
        assert_eq!(
            ranges,
            vec![CachedRange::new(ts("2024-05-01"), ts("2024-06-30")).expect("range")]
        );
        assert!(manager.index().keys().is_empty());
    }

    #[tokio::test]
    async fn backtest_history_fails_on_uncovered_ranges() {
        let fetcher = Arc::new(RecordingFetcher {
            fail: true,
            ..RecordingFetcher::default()
        });
        let manager = Arc::new(DataManager::new(Arc::new(MemoryStore::new()), fetcher));
        let context = RunContext::backtest(manager);

        let error = context
            .history(aapl(), Resolution::Daily, ts("2024-01-01"), ts("2024-01-31"))
            .await
            .expect_err("incomplete");
        assert!(matches!(error, DataError::Incomplete { uncovered: 1, .. }));
        assert_eq!(context.mode(), RunMode::Backtest);
    }

    #[tokio::test]
    async fn optimize_history_reuses_the_cache() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let manager = Arc::new(DataManager::new(Arc::new(MemoryStore::new()), fetcher.clone()));
        let context = RunContext::optimize(manager);

        for _ in 0..3 {
            context
                .history(aapl(), Resolution::Daily, ts("2024-01-01"), ts("2024-01-31"))
                .await
                .expect("history");
        }
        assert_eq!(fetcher.ranges.lock().expect("ranges lock").len(), 1);
    }
}
