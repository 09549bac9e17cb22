//! Runtime configuration: optional TOML file, defaults, then environment.

use std::fmt::{Debug, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use swingbars_warehouse::WarehouseConfig;
use thiserror::Error;
use tracing::info;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetrySettings;

pub const DEFAULT_ALPACA_DATA_URL: &str = "https://data.alpaca.markets";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level settings for the cache, the fetcher and the run contexts.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SwingbarsConfig {
    pub data: DataSettings,
    pub fetch: FetchSettings,
    pub circuit_breaker: CircuitBreakerConfig,
    pub live: LiveSettings,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataSettings {
    /// Data home; `SWINGBARS_HOME` wins over this.
    pub home: Option<PathBuf>,
    /// Database file; defaults to `{home}/cache/bars.duckdb`.
    pub db_path: Option<PathBuf>,
    pub max_pool_size: usize,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            home: None,
            db_path: None,
            max_pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchSettings {
    pub base_url: String,
    pub timeout_ms: u64,
    /// Alpaca feed: `iex` (free tier) or `sip`.
    pub feed: String,
    pub page_limit: u32,
    /// Zero disables client-side throttling.
    pub requests_per_minute: u32,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ALPACA_DATA_URL.to_owned(),
            timeout_ms: 30_000,
            feed: String::from("iex"),
            page_limit: 10_000,
            requests_per_minute: 200,
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LiveSettings {
    pub lookback_days: u32,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self { lookback_days: 30 }
    }
}

/// Alpaca key pair. Only ever sourced from the environment.
#[derive(Clone, PartialEq, Eq)]
pub struct AlpacaCredentials {
    pub api_key: String,
    pub secret_key: String,
}

impl AlpacaCredentials {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// `ALPACA_API_KEY` and `ALPACA_SECRET_KEY`, if both are set and non-empty.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let api_key = lookup("ALPACA_API_KEY").filter(|value| !value.trim().is_empty())?;
        let secret_key = lookup("ALPACA_SECRET_KEY").filter(|value| !value.trim().is_empty())?;
        Some(Self::new(api_key, secret_key))
    }
}

impl Debug for AlpacaCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaCredentials")
            .field("api_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl SwingbarsConfig {
    /// Defaults, overlaid by `path` when given, then by the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(home) = lookup("SWINGBARS_HOME").filter(|value| !value.is_empty()) {
            self.data.home = Some(PathBuf::from(home));
        }
        if let Some(url) = lookup("ALPACA_DATA_URL").filter(|value| !value.is_empty()) {
            self.fetch.base_url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data.max_pool_size == 0 {
            return Err(ConfigError::Invalid {
                field: "data.max_pool_size",
                reason: String::from("must be at least 1"),
            });
        }
        if self.fetch.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "fetch.timeout_ms",
                reason: String::from("must be greater than zero"),
            });
        }
        if self.fetch.page_limit == 0 || self.fetch.page_limit > 10_000 {
            return Err(ConfigError::Invalid {
                field: "fetch.page_limit",
                reason: format!("{} is outside 1..=10000", self.fetch.page_limit),
            });
        }
        if !matches!(self.fetch.feed.as_str(), "iex" | "sip") {
            return Err(ConfigError::Invalid {
                field: "fetch.feed",
                reason: format!("'{}' is not one of iex, sip", self.fetch.feed),
            });
        }
        if !self.fetch.base_url.starts_with("http://") && !self.fetch.base_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid {
                field: "fetch.base_url",
                reason: String::from("must be an http(s) URL"),
            });
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "circuit_breaker.failure_threshold",
                reason: String::from("must be at least 1"),
            });
        }
        Ok(())
    }

    /// Warehouse location derived from `[data]`.
    pub fn warehouse(&self) -> WarehouseConfig {
        let mut warehouse = match &self.data.home {
            Some(home) => WarehouseConfig::for_home(home.clone()),
            None => WarehouseConfig::default(),
        };
        if let Some(db_path) = &self.data.db_path {
            warehouse.db_path = db_path.clone();
        }
        warehouse.max_pool_size = self.data.max_pool_size;
        warehouse
    }
}
