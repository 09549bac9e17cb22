//! Caller-side retry with exponential backoff and jitter.
//!
//! The data manager never retries on its own. Callers that want to ride out
//! rate limits or flaky networks re-issue the same request; because coverage
//! is recorded per gap, each attempt only fetches what is still missing.

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::data_manager::{BarRequest, DataManager, SeriesOutcome};
use crate::DataError;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed {
        delay: Duration,
    },
    /// `base * factor^attempt`, capped at `max`, optionally +/-50% jitter.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = (base.as_secs_f64() * factor.powi(exponent)).min(max.as_secs_f64());
                let delay = Duration::from_secs_f64(seconds);
                if !jitter {
                    return delay;
                }

                let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                let spread = millis / 2;
                let offset = fastrand::u64(0..=spread.saturating_mul(2));
                Duration::from_millis((millis - spread).saturating_add(offset))
            }
        }
    }
}

/// How many extra attempts a caller makes and how long it waits between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Plain TOML form of [`RetryConfig`]; always exponential with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl From<RetrySettings> for RetryConfig {
    fn from(settings: RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(settings.base_delay_ms),
                factor: 2.0,
                max: Duration::from_millis(settings.max_delay_ms),
                jitter: true,
            },
        }
    }
}

/// Re-issue `request` while every uncovered range failed for a retryable reason.
///
/// Stops early when the outcome is complete or any failure is terminal
/// (not found, bad credentials, persistence). Returns the last outcome.
pub async fn get_with_retry(
    manager: &DataManager,
    request: &BarRequest,
    config: &RetryConfig,
) -> Result<SeriesOutcome, DataError> {
    let mut outcome = manager.get(request.clone()).await?;
    let mut attempt = 0;

    while attempt < config.max_retries && !outcome.is_complete() && outcome.all_retryable() {
        let delay = config.backoff.delay(attempt);
        info!(
            key = %request.key(),
            attempt = attempt + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            uncovered = outcome.uncovered.len(),
            "retrying uncovered ranges"
        );
        tokio::time::sleep(delay).await;

        let retried = manager.get(request.clone()).await?;
        outcome = SeriesOutcome {
            fetches: outcome.fetches + retried.fetches,
            ..retried
        };
        attempt += 1;
    }

    Ok(outcome)
}
