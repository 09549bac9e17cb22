//! Export one cached series to Parquet.

use serde_json::json;
use swingbars_core::{DataError, Resolution, Symbol};
use swingbars_warehouse::SeriesId;
use tracing::info;

use crate::cli::ExportArgs;
use crate::error::CliError;

use super::{CommandResult, Session};

pub fn run(args: &ExportArgs, session: &Session) -> Result<CommandResult, CliError> {
    let symbol = Symbol::parse(&args.ticker).map_err(DataError::from)?;
    let resolution: Resolution = args.resolution.into();
    let series = SeriesId::new(symbol.as_str(), resolution.as_str())?;

    if let Some(parent) = args.output.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let rows = session.warehouse("export")?.export_parquet(&series, &args.output)?;
    info!(table = %series.table_name(), rows, output = %args.output.display(), "exported series");

    Ok(CommandResult::ok(json!({
        "table": series.table_name(),
        "rows": rows,
        "output": args.output.display().to_string(),
        "format": "parquet",
    })))
}
