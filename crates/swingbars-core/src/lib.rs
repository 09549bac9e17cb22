//! # Swingbars Core
//!
//! Read-through cache of historical OHLCV bars for trading strategies.
//!
//! ## Overview
//!
//! A request for `[start, end]` of one series is answered from local storage
//! whenever the range index says it is covered. Missing sub-ranges (gaps) are
//! fetched from the remote market-data API one at a time, merged into the
//! store, and only then recorded as covered. Failed gaps are reported next to
//! the bars that could be served.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Alpaca market-data adapter |
//! | [`circuit_breaker`] | Circuit breaker around upstream calls |
//! | [`config`] | TOML + environment configuration |
//! | [`context`] | Backtest, optimize and live run contexts |
//! | [`data_manager`] | Gap-filling orchestrator |
//! | [`domain`] | Symbols, timestamps, resolutions, bars and ranges |
//! | [`fetcher`] | Remote fetcher contract and error kinds |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`range_index`] | Per-series coverage bookkeeping |
//! | [`retry`] | Caller-side retry policy |
//! | [`store`] | Bar store contract, DuckDB and in-memory stores |
//! | [`throttling`] | Client-side request quota |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use swingbars_core::{BarRequest, DataManager, MemoryStore, OfflineFetcher};
//!
//! let manager = DataManager::new(Arc::new(MemoryStore::new()), Arc::new(OfflineFetcher));
//! let request = BarRequest::parse("AAPL", "1d", "2024-01-01", "2024-03-31", true)?;
//! let outcome = manager.get(request).await?;
//! println!("{} bars, {} uncovered", outcome.series.len(), outcome.uncovered.len());
//! ```

pub mod adapters;
pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod data_manager;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod http_client;
pub mod range_index;
pub mod retry;
pub mod store;
pub mod throttling;

pub use adapters::AlpacaBarsAdapter;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{AlpacaCredentials, ConfigError, SwingbarsConfig};
pub use context::{max_lookback_days, RunContext, RunMode};
pub use data_manager::{BarRequest, DataManager, GapFailure, SeriesOutcome, UncoveredRange};
pub use domain::{Bar, CachedRange, Resolution, Series, SeriesKey, Symbol, UtcDateTime};
pub use error::{DataError, InvalidRangeError, PersistenceError, ValidationError};
pub use fetcher::{BarFetcher, FetchError, FetchErrorKind, FetchRequest, OfflineFetcher};
pub use range_index::RangeIndex;
pub use retry::{get_with_retry, Backoff, RetryConfig, RetrySettings};
pub use store::{BarStore, MemoryStore, MergeSummary};
