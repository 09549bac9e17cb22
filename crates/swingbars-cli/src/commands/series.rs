use serde_json::{json, Value};

use crate::error::CliError;

use super::{format_micros, CommandResult, Session};

pub fn run(session: &Session) -> Result<CommandResult, CliError> {
    let warehouse = session.warehouse("series")?;
    let catalog = warehouse.series_catalog()?;
    let series: Vec<Value> = catalog
        .iter()
        .map(|entry| {
            json!({
                "ticker": entry.ticker,
                "resolution": entry.resolution,
                "table": entry.table_name,
                "rows": entry.row_count,
                "first": entry.first_micros.map(format_micros),
                "last": entry.last_micros.map(format_micros),
            })
        })
        .collect();

    Ok(CommandResult::ok(json!({
        "database": warehouse.db_path().map(|path| path.display().to_string()),
        "count": series.len(),
        "series": series,
    })))
}
