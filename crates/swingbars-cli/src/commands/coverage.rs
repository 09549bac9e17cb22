use serde_json::{json, Value};
use swingbars_core::{DataError, Resolution, SeriesKey, Symbol, UtcDateTime};

use crate::cli::CoverageArgs;
use crate::error::CliError;

use super::{CommandResult, Session};

pub fn run(args: &CoverageArgs, session: &Session) -> Result<CommandResult, CliError> {
    let resolution: Resolution = args.resolution.into();
    let key = SeriesKey::new(
        Symbol::parse(&args.ticker).map_err(DataError::from)?,
        resolution,
    );
    let covered = session.manager.index().covered(&key);

    let gaps = match (&args.start, &args.end) {
        (Some(start), Some(end)) => {
            let start = UtcDateTime::parse(start).map_err(DataError::from)?;
            let end = UtcDateTime::parse(end).map_err(DataError::from)?;
            let gaps = session
                .manager
                .index()
                .gaps(&key, resolution.align(start), resolution.align(end))
                .map_err(DataError::from)?;
            serde_json::to_value(gaps)?
        }
        _ => Value::Null,
    };

    Ok(CommandResult::ok(json!({
        "series": key.to_string(),
        "covered": covered,
        "gaps": gaps,
    })))
}
