//! Behavior-driven tests for the gap-filling data manager.
//!
//! A scripted fetcher stands in for the network: it serves one bar per day of
//! whatever range it is asked for, records every call, and can be told to fail
//! for ranges touching a given day.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use swingbars_core::{
    get_with_retry, Bar, BarFetcher, BarRequest, BarStore, CachedRange, DataError, DataManager,
    FetchError, FetchErrorKind, FetchRequest, GapFailure, MemoryStore, Resolution, RetryConfig,
    Series, SeriesKey, Symbol, UtcDateTime,
};
use swingbars_warehouse::{Warehouse, WarehouseConfig};
use tempfile::tempdir;

#[derive(Default)]
struct ScriptedFetcher {
    calls: Mutex<Vec<CachedRange>>,
    failures: Mutex<Vec<(UtcDateTime, FetchError)>>,
    close: f64,
}

impl ScriptedFetcher {
    fn with_close(close: f64) -> Self {
        Self {
            close,
            ..Self::default()
        }
    }

    fn fail_containing(self, day: UtcDateTime, error: FetchError) -> Self {
        self.failures.lock().expect("failures").push((day, error));
        self
    }

    fn heal(&self) {
        self.failures.lock().expect("failures").clear();
    }

    fn calls(&self) -> Vec<CachedRange> {
        self.calls.lock().expect("calls").clone()
    }
}

impl BarFetcher for ScriptedFetcher {
    fn id(&self) -> &'static str {
        "scripted"
    }

    fn fetch<'a>(
        &'a self,
        request: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Series, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().expect("calls").push(request.range);
            let failure = self
                .failures
                .lock()
                .expect("failures")
                .iter()
                .find(|(day, _)| request.range.contains(*day))
                .map(|(_, error)| error.clone());
            if let Some(error) = failure {
                return Err(error);
            }

            let close = if self.close > 0.0 { self.close } else { 100.0 };
            let mut bars = Vec::new();
            let mut ts = request.range.start();
            while ts <= request.range.end() {
                bars.push(Bar::new(ts, close, close + 1.0, close - 1.0, close, 1_000).expect("bar"));
                ts = ts.checked_add(time::Duration::DAY).expect("next day");
            }
            Ok(Series::from_unordered(&request.key, bars))
        })
    }
}

fn day(n: u8) -> UtcDateTime {
    UtcDateTime::parse(&format!("2024-04-{n:02}")).expect("day")
}

fn days(a: u8, b: u8) -> CachedRange {
    CachedRange::new(day(a), day(b)).expect("range")
}

fn aapl() -> SeriesKey {
    SeriesKey::new(Symbol::parse("AAPL").expect("symbol"), Resolution::Daily)
}

fn request(a: u8, b: u8) -> BarRequest {
    BarRequest::new(aapl().symbol, Resolution::Daily, day(a), day(b), true).expect("request")
}

fn live(a: u8, b: u8) -> BarRequest {
    BarRequest::new(aapl().symbol, Resolution::Daily, day(a), day(b), false).expect("request")
}

// =============================================================================
// Data Manager: Cache reuse
// =============================================================================

#[tokio::test]
async fn when_a_range_is_requested_twice_the_second_call_fetches_nothing() {
    // Given: A manager that has served [1, 20] once
    let fetcher = Arc::new(ScriptedFetcher::default());
    let manager = DataManager::new(Arc::new(MemoryStore::new()), fetcher.clone());
    let first = manager.get(request(1, 20)).await.expect("first");

    // When: The same range is requested again
    let second = manager.get(request(1, 20)).await.expect("second");

    // Then: No fetch happened and the bars are identical
    assert_eq!(first.fetches, 1);
    assert_eq!(second.fetches, 0);
    assert_eq!(fetcher.calls().len(), 1);
    assert_eq!(second.series, first.series);
    assert_eq!(second.series.len(), 20);
}

#[tokio::test]
async fn when_a_request_extends_the_cache_only_the_new_edges_are_fetched() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let manager = DataManager::new(Arc::new(MemoryStore::new()), fetcher.clone());
    manager.get(request(10, 15)).await.expect("warm");

    let outcome = manager.get(request(5, 25)).await.expect("extend");

    assert_eq!(fetcher.calls(), vec![days(10, 15), days(5, 9), days(16, 25)]);
    assert!(outcome.is_complete());
    assert_eq!(outcome.series.len(), 21);
    assert_eq!(manager.index().covered(&aapl()), vec![days(5, 25)]);
}

// =============================================================================
// Data Manager: Partial failure
// =============================================================================

#[tokio::test]
async fn when_the_middle_gap_fails_cached_bars_are_returned_and_the_gap_is_reported() {
    // Given: [1, 5] and [15, 20] are cached
    let store = Arc::new(MemoryStore::new());
    let warm = DataManager::new(store.clone(), Arc::new(ScriptedFetcher::default()));
    warm.get(request(1, 5)).await.expect("warm left");
    warm.get(request(15, 20)).await.expect("warm right");

    // And: The upstream now rate-limits anything touching day 10
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .fail_containing(day(10), FetchError::rate_limited("429 Too Many Requests")),
    );
    let manager = DataManager::open(store, fetcher.clone()).expect("manager");

    // When: [1, 20] is requested
    let outcome = manager.get(request(1, 20)).await.expect("best effort");

    // Then: Only the middle gap was attempted
    assert_eq!(fetcher.calls(), vec![days(6, 14)]);

    // And: Bars for both cached ranges come back
    assert_eq!(outcome.series.len(), 11);
    assert_eq!(outcome.series.first().map(|bar| bar.ts), Some(day(1)));
    assert_eq!(outcome.series.last().map(|bar| bar.ts), Some(day(20)));

    // And: [6, 14] is reported uncovered with its cause, and is not marked
    assert_eq!(outcome.uncovered.len(), 1);
    assert_eq!(outcome.uncovered[0].range, days(6, 14));
    assert!(matches!(
        &outcome.uncovered[0].failure,
        GapFailure::Fetch(error) if error.kind() == FetchErrorKind::RateLimited
    ));
    assert_eq!(
        manager.index().gaps(&aapl(), day(1), day(20)).expect("gaps"),
        vec![days(6, 14)]
    );

    // And: A caller that needs complete history gets an error
    assert!(matches!(
        outcome.into_complete(),
        Err(DataError::Incomplete { uncovered: 1, .. })
    ));
}

#[tokio::test]
async fn one_failed_gap_does_not_stop_the_others() {
    let fetcher = Arc::new(
        ScriptedFetcher::default().fail_containing(day(3), FetchError::transient_network("connection reset")),
    );
    let manager = DataManager::new(Arc::new(MemoryStore::new()), fetcher.clone());
    manager.index().mark_covered(&aapl(), day(6), day(8)).expect("mark");

    let outcome = manager.get(request(1, 12)).await.expect("get");

    assert_eq!(fetcher.calls(), vec![days(1, 5), days(9, 12)]);
    assert_eq!(outcome.uncovered.len(), 1);
    assert_eq!(outcome.uncovered[0].range, days(1, 5));
    assert_eq!(manager.index().covered(&aapl()), vec![days(6, 12)]);
}

#[tokio::test]
async fn retrying_a_partial_outcome_fetches_only_what_is_still_missing() {
    // Given: A transient failure on the first attempt
    let fetcher = Arc::new(
        ScriptedFetcher::default().fail_containing(day(4), FetchError::transient_network("timeout")),
    );
    let manager = DataManager::new(Arc::new(MemoryStore::new()), fetcher.clone());
    manager.index().mark_covered(&aapl(), day(8), day(10)).expect("mark");
    let outcome = manager.get(request(1, 10)).await.expect("first");
    assert_eq!(outcome.uncovered.len(), 1);

    // When: The upstream recovers and the caller retries
    fetcher.heal();
    let retried = get_with_retry(&manager, &request(1, 10), &RetryConfig::fixed(Duration::from_millis(1), 2))
        .await
        .expect("retry");

    // Then: Only the previously failed gap was fetched again
    assert!(retried.is_complete());
    assert_eq!(fetcher.calls(), vec![days(1, 7), days(1, 7)]);
}

#[tokio::test]
async fn retry_stops_immediately_on_terminal_failures() {
    let fetcher = Arc::new(
        ScriptedFetcher::default().fail_containing(day(2), FetchError::not_found("unknown symbol")),
    );
    let manager = DataManager::new(Arc::new(MemoryStore::new()), fetcher.clone());

    let outcome = get_with_retry(&manager, &request(1, 3), &RetryConfig::fixed(Duration::from_millis(1), 5))
        .await
        .expect("outcome");

    assert!(!outcome.is_complete());
    assert!(!outcome.all_retryable());
    assert_eq!(fetcher.calls().len(), 1);
}

// =============================================================================
// Data Manager: Live mode
// =============================================================================

#[tokio::test]
async fn live_requests_always_fetch_and_overwrite_cached_bars() {
    // Given: A cache warmed with close = 100
    let store = Arc::new(MemoryStore::new());
    let warm = DataManager::new(store.clone(), Arc::new(ScriptedFetcher::default()));
    warm.get(request(1, 5)).await.expect("warm");

    // When: A live request comes back with close = 120
    let fetcher = Arc::new(ScriptedFetcher::with_close(120.0));
    let manager = DataManager::new(store.clone(), fetcher.clone());
    manager.index().mark_covered(&aapl(), day(1), day(5)).expect("mark");
    let outcome = manager.get(live(1, 5)).await.expect("live");

    // Then: The full range was fetched despite coverage, and fresh bars won
    assert_eq!(fetcher.calls(), vec![days(1, 5)]);
    assert!(outcome.series.bars().iter().all(|bar| bar.close == 120.0));
    let stored = store.read(&aapl(), days(1, 5)).expect("read");
    assert!(stored.bars().iter().all(|bar| bar.close == 120.0));
}

// =============================================================================
// Data Manager: Durable cache
// =============================================================================

#[tokio::test]
async fn coverage_survives_a_restart_on_the_duckdb_warehouse() {
    // Given: A warehouse-backed manager that has served [1, 10]
    let temp = tempdir().expect("tempdir");
    let config = WarehouseConfig::for_home(temp.path().to_path_buf());
    {
        let warehouse = Arc::new(Warehouse::open(config.clone()).expect("open"));
        let manager = DataManager::open(warehouse, Arc::new(ScriptedFetcher::default())).expect("manager");
        manager.get(request(1, 10)).await.expect("warm");
    }

    // When: A new process opens the same database
    let fetcher = Arc::new(ScriptedFetcher::default());
    let warehouse = Arc::new(Warehouse::open(config).expect("reopen"));
    let manager = DataManager::open(warehouse, fetcher.clone()).expect("manager");
    let outcome = manager.get(request(2, 9)).await.expect("get");

    // Then: The request is served entirely from disk
    assert_eq!(outcome.fetches, 0);
    assert!(fetcher.calls().is_empty());
    assert_eq!(outcome.series.len(), 8);
}

#[test]
fn invalid_requests_are_rejected_before_any_work() {
    assert!(matches!(
        BarRequest::parse("AAPL", "1d", "2024-04-10", "2024-04-01", true),
        Err(DataError::InvalidRange(_))
    ));
    assert!(matches!(
        BarRequest::parse("AAPL", "weekly", "2024-04-01", "2024-04-10", true),
        Err(DataError::InvalidRange(_))
    ));
    assert!(matches!(
        BarRequest::parse("1AAPL", "1d", "2024-04-01", "2024-04-10", true),
        Err(DataError::Validation(_))
    ));
}
