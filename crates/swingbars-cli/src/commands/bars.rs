use serde_json::json;
use swingbars_core::{get_with_retry, BarRequest, DataError, Resolution, RetryConfig};
use tracing::info;

use crate::cli::BarsArgs;
use crate::error::CliError;

use super::{CommandResult, Session};

pub async fn run(args: &BarsArgs, session: &Session) -> Result<CommandResult, CliError> {
    let resolution: Resolution = args.resolution.into();
    let request = BarRequest::parse(
        &args.ticker,
        resolution.as_str(),
        &args.start,
        &args.end,
        !args.live,
    )?;

    let mut retry = RetryConfig::from(session.config.retry);
    if let Some(retries) = args.retries {
        retry.max_retries = retries;
    }

    let outcome = get_with_retry(&session.manager, &request, &retry).await?;
    info!(
        key = %request.key(),
        bars = outcome.series.len(),
        fetches = outcome.fetches,
        uncovered = outcome.uncovered.len(),
        "bars served"
    );

    let complete = outcome.is_complete();
    if args.require_complete && !complete {
        return Err(DataError::Incomplete {
            key: request.key().to_string(),
            uncovered: outcome.uncovered.len(),
        }
        .into());
    }

    let data = json!({
        "ticker": request.key().symbol,
        "resolution": request.key().resolution,
        "start": request.range().start(),
        "end": request.range().end(),
        "live": !request.allow_cache(),
        "complete": complete,
        "fetches": outcome.fetches,
        "uncovered": outcome.uncovered,
        "bars": outcome.series.bars(),
    });
    Ok(CommandResult::ok(data).incomplete(!complete))
}
