mod bars;
mod coverage;
mod export;
mod series;

use std::sync::Arc;

use serde_json::Value;
use swingbars_core::{
    AlpacaBarsAdapter, AlpacaCredentials, BarFetcher, BarStore, DataManager, MemoryStore,
    OfflineFetcher, SwingbarsConfig, UtcDateTime,
};
use swingbars_warehouse::Warehouse;
use tracing::{debug, warn};

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub struct CommandResult {
    pub data: Value,
    /// Some requested range could not be served.
    pub incomplete: bool,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            incomplete: false,
        }
    }

    pub fn incomplete(mut self, incomplete: bool) -> Self {
        self.incomplete = incomplete;
        self
    }
}

/// Everything a command needs, wired from configuration.
pub struct Session {
    pub config: SwingbarsConfig,
    pub warehouse: Option<Arc<Warehouse>>,
    pub manager: DataManager,
}

impl Session {
    pub fn open(cli: &Cli) -> Result<Self, CliError> {
        let config = SwingbarsConfig::load(cli.config.as_deref())?;

        let (warehouse, store): (Option<Arc<Warehouse>>, Arc<dyn BarStore>) = if cli.ephemeral {
            (None, Arc::new(MemoryStore::new()))
        } else {
            let warehouse = Arc::new(Warehouse::open(config.warehouse())?);
            (Some(Arc::clone(&warehouse)), warehouse)
        };

        let fetcher: Arc<dyn BarFetcher> = match AlpacaCredentials::from_env() {
            Some(credentials) => Arc::new(AlpacaBarsAdapter::from_config(
                &config.fetch,
                config.circuit_breaker,
                credentials,
            )),
            None => {
                warn!("ALPACA_API_KEY/ALPACA_SECRET_KEY not set; serving from cache only");
                Arc::new(OfflineFetcher)
            }
        };
        debug!(fetcher = fetcher.id(), ephemeral = cli.ephemeral, "session opened");

        let manager = DataManager::open(store, fetcher)?.with_fetch_timeout(config.fetch.timeout());
        Ok(Self {
            config,
            warehouse,
            manager,
        })
    }

    /// The on-disk warehouse; `--ephemeral` sessions have none.
    pub fn warehouse(&self, command: &str) -> Result<&Warehouse, CliError> {
        self.warehouse.as_deref().ok_or_else(|| {
            CliError::Command(format!("'{command}' needs the on-disk cache; drop --ephemeral"))
        })
    }
}

pub async fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    let session = Session::open(cli)?;
    match &cli.command {
        Command::Bars(args) => bars::run(args, &session).await,
        Command::Coverage(args) => coverage::run(args, &session),
        Command::Series => series::run(&session),
        Command::Export(args) => export::run(args, &session),
    }
}

/// RFC3339 rendering of a stored microsecond timestamp.
pub(crate) fn format_micros(micros: i64) -> Value {
    UtcDateTime::from_unix_micros(micros)
        .map(|ts| Value::String(ts.format_rfc3339()))
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use clap::Parser;
    use tempfile::tempdir;

    use super::*;

    fn cli_with_db(config_dir: &std::path::Path, args: &[&str]) -> Cli {
        let config_path = config_dir.join("swingbars.toml");
        let db_path = config_dir.join("bars.duckdb");
        fs::write(
            &config_path,
            format!("[data]\ndb_path = {:?}\nmax_pool_size = 2\n", db_path.display().to_string()),
        )
        .expect("write config");

        let mut argv = vec!["swingbars", "--config", config_path.to_str().expect("utf8 path")];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("parse")
    }

    #[tokio::test]
    async fn series_on_a_fresh_cache_is_empty() {
        let temp = tempdir().expect("tempdir");
        let cli = cli_with_db(temp.path(), &["series"]);

        let result = run(&cli).await.expect("series");

        assert_eq!(result.data["count"], 0);
        assert!(!result.incomplete);
        assert!(temp.path().join("bars.duckdb").exists());
    }

    #[tokio::test]
    async fn coverage_of_an_unknown_series_reports_one_gap() {
        let temp = tempdir().expect("tempdir");
        let cli = cli_with_db(
            temp.path(),
            &["coverage", "AAPL", "--start", "2024-01-01", "--end", "2024-01-31"],
        );

        let result = run(&cli).await.expect("coverage");

        assert_eq!(result.data["series"], "AAPL@1d");
        assert_eq!(result.data["covered"].as_array().map(Vec::len), Some(0));
        assert_eq!(result.data["gaps"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn exporting_an_uncached_series_is_a_storage_error() {
        let temp = tempdir().expect("tempdir");
        let output = temp.path().join("out.parquet");
        let cli = cli_with_db(
            temp.path(),
            &["export", "MSFT", "--output", output.to_str().expect("utf8 path")],
        );

        let error = run(&cli).await.err().expect("unknown series");

        assert_eq!(error.exit_code(), 10);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn ephemeral_sessions_have_no_catalog() {
        let cli = Cli::try_parse_from(["swingbars", "--ephemeral", "series"]).expect("parse");

        let error = run(&cli).await.err().expect("needs disk");

        assert!(matches!(error, CliError::Command(_)));
    }
}
