//! Gap-filling orchestrator between the range index, the bar store and the
//! remote fetcher.
//!
//! A cached request runs in four steps:
//!
//! 1. compute the gaps of `[start, end]` against the range index,
//! 2. fetch each gap independently (bounded by the fetch timeout),
//! 3. merge the fetched bars, then mark the gap covered and persist the ledger,
//! 4. read `[start, end]` back from the store.
//!
//! Steps 1-3 run under a per-series async lock so two callers never fetch the
//! same gap twice; the final read happens after the lock is released. A live
//! request (`allow_cache == false`) skips the index entirely, fetches the full
//! range and merges it without recording coverage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{Bar, CachedRange, Resolution, Series, SeriesKey, Symbol, UtcDateTime};
use crate::fetcher::{BarFetcher, FetchError, FetchRequest};
use crate::range_index::RangeIndex;
use crate::store::BarStore;
use crate::{DataError, InvalidRangeError, PersistenceError};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A validated `get` request. Bounds are floored to the resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarRequest {
    key: SeriesKey,
    range: CachedRange,
    allow_cache: bool,
}

impl BarRequest {
    pub fn new(
        symbol: Symbol,
        resolution: Resolution,
        start: UtcDateTime,
        end: UtcDateTime,
        allow_cache: bool,
    ) -> Result<Self, InvalidRangeError> {
        if start > end {
            return Err(InvalidRangeError::Inverted { start, end });
        }
        let range = CachedRange::new(resolution.align(start), resolution.align(end))?;
        Ok(Self {
            key: SeriesKey::new(symbol, resolution),
            range,
            allow_cache,
        })
    }

    /// Build a request from user-facing strings.
    pub fn parse(
        ticker: &str,
        resolution: &str,
        start: &str,
        end: &str,
        allow_cache: bool,
    ) -> Result<Self, DataError> {
        let symbol = Symbol::parse(ticker)?;
        let resolution: Resolution = resolution.parse()?;
        let start = UtcDateTime::parse(start)?;
        let end = UtcDateTime::parse(end)?;
        Ok(Self::new(symbol, resolution, start, end, allow_cache)?)
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    pub fn range(&self) -> CachedRange {
        self.range
    }

    pub fn allow_cache(&self) -> bool {
        self.allow_cache
    }
}

/// Why a range is missing from the returned series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", content = "error", rename_all = "snake_case")]
pub enum GapFailure {
    Fetch(FetchError),
    Persistence(PersistenceError),
}

impl GapFailure {
    pub fn retryable(&self) -> bool {
        match self {
            Self::Fetch(error) => error.retryable(),
            Self::Persistence(_) => false,
        }
    }
}

/// A sub-range that could not be filled, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UncoveredRange {
    pub range: CachedRange,
    pub failure: GapFailure,
}

/// Best-effort result of `get`.
///
/// `series` always holds whatever the store has for the requested range;
/// `uncovered` lists the ranges that were supposed to be filled and were not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesOutcome {
    pub series: Series,
    pub uncovered: Vec<UncoveredRange>,
    /// Remote fetches attempted while serving this request.
    pub fetches: usize,
}

impl SeriesOutcome {
    pub fn is_complete(&self) -> bool {
        self.uncovered.is_empty()
    }

    pub fn all_retryable(&self) -> bool {
        self.uncovered.iter().all(|range| range.failure.retryable())
    }

    /// The series, or `DataError::Incomplete` if any range stayed uncovered.
    pub fn into_complete(self) -> Result<Series, DataError> {
        if self.uncovered.is_empty() {
            return Ok(self.series);
        }
        Err(DataError::Incomplete {
            key: self.series.key().to_string(),
            uncovered: self.uncovered.len(),
        })
    }
}

/// Serves bar requests from the cache, filling gaps from the remote fetcher.
pub struct DataManager {
    index: RangeIndex,
    store: Arc<dyn BarStore>,
    fetcher: Arc<dyn BarFetcher>,
    locks: Mutex<HashMap<SeriesKey, Arc<tokio::sync::Mutex<()>>>>,
    fetch_timeout: Duration,
}

impl DataManager {
    /// Manager with an empty range index.
    pub fn new(store: Arc<dyn BarStore>, fetcher: Arc<dyn BarFetcher>) -> Self {
        Self {
            index: RangeIndex::new(),
            store,
            fetcher,
            locks: Mutex::new(HashMap::new()),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Manager whose range index is seeded from the store's coverage ledger.
    pub fn open(
        store: Arc<dyn BarStore>,
        fetcher: Arc<dyn BarFetcher>,
    ) -> Result<Self, PersistenceError> {
        let manager = Self::new(store, fetcher);
        manager.restore_coverage()?;
        Ok(manager)
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Reload the coverage ledger into the index; returns the series count.
    pub fn restore_coverage(&self) -> Result<usize, PersistenceError> {
        let mut grouped: HashMap<SeriesKey, Vec<CachedRange>> = HashMap::new();
        for (key, range) in self.store.load_coverage()? {
            grouped.entry(key).or_default().push(range);
        }

        let series = grouped.len();
        for (key, ranges) in grouped {
            self.index.restore(&key, ranges);
        }
        info!(series, fetcher = self.fetcher.id(), "restored coverage ledger");
        Ok(series)
    }

    pub fn index(&self) -> &RangeIndex {
        &self.index
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub async fn get(&self, request: BarRequest) -> Result<SeriesOutcome, DataError> {
        let key = request.key.clone();
        let range = request.range;

        let lock = self.lock_for(&key);
        let filled = {
            let _guard = lock.lock().await;
            self.fill_request(&request).await
        };
        self.release_lock(&key, lock);
        let (uncovered, fetches) = filled?;

        let read_key = key.clone();
        let series = self
            .run_blocking(move |store| store.read(&read_key, range))
            .await?;

        if !uncovered.is_empty() {
            warn!(
                %key,
                %range,
                uncovered = uncovered.len(),
                bars = series.len(),
                "returning partial series"
            );
        }

        Ok(SeriesOutcome {
            series,
            uncovered,
            fetches,
        })
    }

    /// Fill every gap of a cached request, or the whole range of a live one.
    /// Returns the ranges left uncovered and the number of fetches issued.
    async fn fill_request(
        &self,
        request: &BarRequest,
    ) -> Result<(Vec<UncoveredRange>, usize), DataError> {
        let key = &request.key;
        let range = request.range;

        if !request.allow_cache {
            let uncovered = match self.fill(key, range, false).await {
                Ok(()) => Vec::new(),
                Err(failure) => vec![UncoveredRange { range, failure }],
            };
            return Ok((uncovered, 1));
        }

        let gaps = self.index.gaps(key, range.start(), range.end())?;
        debug!(%key, %range, gaps = gaps.len(), "computed gaps");

        let mut uncovered = Vec::new();
        for gap in &gaps {
            if let Err(failure) = self.fill(key, *gap, true).await {
                uncovered.push(UncoveredRange {
                    range: *gap,
                    failure,
                });
            }
        }
        Ok((uncovered, gaps.len()))
    }

    /// Fetch one range, merge it, and (when `record` is set) mark it covered.
    async fn fill(&self, key: &SeriesKey, range: CachedRange, record: bool) -> Result<(), GapFailure> {
        let request = FetchRequest::new(key.clone(), range);
        let fetched = match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(request)).await
        {
            Ok(Ok(series)) => series,
            Ok(Err(error)) => {
                warn!(%key, %range, code = error.code(), detail = error.message(), "fetch failed");
                return Err(GapFailure::Fetch(error));
            }
            Err(_) => {
                let timeout_ms = u64::try_from(self.fetch_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(%key, %range, timeout_ms, "fetch timed out");
                return Err(GapFailure::Fetch(FetchError::timed_out(timeout_ms)));
            }
        };

        let returned = fetched.len();
        let bars: Vec<Bar> = fetched
            .into_bars()
            .into_iter()
            .filter(|bar| range.contains(bar.ts) && key.resolution.is_aligned(bar.ts))
            .collect();
        if bars.len() < returned {
            debug!(%key, %range, dropped = returned - bars.len(), "discarded bars outside the gap");
        }

        let bar_count = bars.len();
        if !bars.is_empty() {
            let merge_key = key.clone();
            let summary = self
                .run_blocking(move |store| store.merge(&merge_key, &bars))
                .await
                .map_err(|error| {
                    warn!(%key, %range, %error, "merge failed; range left uncovered");
                    GapFailure::Persistence(error)
                })?;
            debug!(%key, inserted = summary.inserted, replaced = summary.replaced, "merged");
        }

        if record {
            let coverage = self.index.mark_range(key, range);
            let ledger_key = key.clone();
            if let Err(error) = self
                .run_blocking(move |store| store.save_coverage(&ledger_key, &coverage))
                .await
            {
                // The bars are committed; a stale ledger only costs a refetch after restart.
                warn!(%key, %range, %error, "could not persist coverage ledger");
            }
        }

        info!(%key, %range, bars = bar_count, live = !record, "filled range");
        Ok(())
    }

    fn lock_for(&self, key: &SeriesKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("series lock table is not poisoned");
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Drop the caller's handle and evict the entry once nobody else holds it.
    fn release_lock(&self, key: &SeriesKey, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().expect("series lock table is not poisoned");
        drop(lock);
        if locks.get(key).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(key);
        }
    }

    async fn run_blocking<T, F>(&self, task: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&dyn BarStore) -> Result<T, PersistenceError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || task(store.as_ref()))
            .await
            .map_err(|error| PersistenceError::new(format!("store task failed: {error}")))?
    }
}
