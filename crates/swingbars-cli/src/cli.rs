//! CLI argument definitions for swingbars.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bars` | Serve bars for a range, fetching only what is not cached |
//! | `coverage` | Show cached ranges and, for a window, the gaps |
//! | `series` | List cached series with row counts |
//! | `export` | Write one cached series to a Parquet file |
//!
//! # Examples
//!
//! ```bash
//! swingbars bars AAPL --resolution daily --start 2024-01-01 --end 2024-03-31 --pretty
//! swingbars bars SPY --resolution minute --start 2024-05-01T13:30:00Z --end 2024-05-01T20:00:00Z --retries 3
//! swingbars coverage AAPL --resolution daily --start 2023-01-01 --end 2024-12-31
//! swingbars export AAPL --resolution daily --output aapl.parquet
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use swingbars_core::Resolution;

#[derive(Debug, Parser)]
#[command(
    name = "swingbars",
    author,
    version,
    about = "Read-through cache of historical market bars"
)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Keep bars in memory only; nothing is read from or written to disk.
    #[arg(long, global = true, default_value_t = false)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve bars for `[start, end]`, filling gaps from the market-data API.
    Bars(BarsArgs),
    /// Show cached coverage for one series.
    Coverage(CoverageArgs),
    /// List cached series.
    Series,
    /// Export one cached series to Parquet.
    Export(ExportArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResolutionArg {
    #[value(alias = "1d")]
    Daily,
    #[value(alias = "1m")]
    Minute,
}

impl From<ResolutionArg> for Resolution {
    fn from(value: ResolutionArg) -> Self {
        match value {
            ResolutionArg::Daily => Resolution::Daily,
            ResolutionArg::Minute => Resolution::Minute,
        }
    }
}

#[derive(Debug, Args)]
pub struct BarsArgs {
    pub ticker: String,

    #[arg(long, value_enum, default_value_t = ResolutionArg::Daily)]
    pub resolution: ResolutionArg,

    /// `YYYY-MM-DD` or RFC3339 UTC.
    #[arg(long)]
    pub start: String,

    #[arg(long)]
    pub end: String,

    /// Bypass the cache and fetch the whole range.
    #[arg(long, default_value_t = false)]
    pub live: bool,

    /// Fail without printing bars if any range stays uncovered.
    #[arg(long, default_value_t = false)]
    pub require_complete: bool,

    /// Extra attempts while only retryable failures remain.
    #[arg(long)]
    pub retries: Option<u32>,
}

#[derive(Debug, Args)]
pub struct CoverageArgs {
    pub ticker: String,

    #[arg(long, value_enum, default_value_t = ResolutionArg::Daily)]
    pub resolution: ResolutionArg,

    /// Window to compute gaps for; requires `--end`.
    #[arg(long, requires = "end")]
    pub start: Option<String>,

    #[arg(long, requires = "start")]
    pub end: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    pub ticker: String,

    #[arg(long, value_enum, default_value_t = ResolutionArg::Daily)]
    pub resolution: ResolutionArg,

    #[arg(long, short)]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bars_accepts_short_resolution_aliases() {
        let cli = Cli::try_parse_from([
            "swingbars", "bars", "AAPL", "--resolution", "1m", "--start", "2024-01-02",
            "--end", "2024-01-03", "--retries", "2",
        ])
        .expect("parse");

        match cli.command {
            Command::Bars(args) => {
                assert_eq!(args.resolution, ResolutionArg::Minute);
                assert_eq!(args.retries, Some(2));
                assert!(!args.live);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn coverage_window_needs_both_bounds() {
        let result = Cli::try_parse_from([
            "swingbars", "coverage", "AAPL", "--start", "2024-01-02",
        ]);
        assert!(result.is_err());
    }
}
