use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::domain::{CachedRange, Series, SeriesKey};

/// One remote request: a series and an explicit inclusive range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub key: SeriesKey,
    pub range: CachedRange,
}

impl FetchRequest {
    pub fn new(key: SeriesKey, range: CachedRange) -> Self {
        Self { key, range }
    }
}

/// Failure category reported by a remote fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    RateLimited,
    NotFound,
    TransientNetwork,
    InvalidCredentials,
}

/// Error for one fetch. Never aborts other gaps of the same request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchError {
    kind: FetchErrorKind,
    message: String,
    retryable: bool,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::RateLimited, message, true)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NotFound, message, false)
    }

    pub fn transient_network(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::TransientNetwork, message, true)
    }

    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::InvalidCredentials, message, false)
    }

    pub fn timed_out(after_ms: u64) -> Self {
        Self::transient_network(format!("fetch timed out after {after_ms}ms"))
    }

    pub const fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            FetchErrorKind::RateLimited => "fetch.rate_limited",
            FetchErrorKind::NotFound => "fetch.not_found",
            FetchErrorKind::TransientNetwork => "fetch.transient_network",
            FetchErrorKind::InvalidCredentials => "fetch.invalid_credentials",
        }
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message)
    }
}

impl std::error::Error for FetchError {}

/// Remote source of historical bars.
///
/// A returned series may be shorter than the range; only returned bars are
/// trusted. Bars outside the requested range are tolerated and discarded by
/// the caller.
pub trait BarFetcher: Send + Sync {
    fn id(&self) -> &'static str;

    fn fetch<'a>(
        &'a self,
        request: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Series, FetchError>> + Send + 'a>>;
}

/// Fetcher for cache-only runs: every fetch fails with `not_found` without
/// touching the network, so callers never retry it.
#[derive(Debug, Default)]
pub struct OfflineFetcher;

impl BarFetcher for OfflineFetcher {
    fn id(&self) -> &'static str {
        "offline"
    }

    fn fetch<'a>(
        &'a self,
        request: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Series, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            Err(FetchError::not_found(format!(
                "offline mode: {} {} is not cached",
                request.key, request.range
            )))
        })
    }
}
