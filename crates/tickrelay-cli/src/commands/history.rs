use serde_json::Value;

use tickrelay_core::{HistoricalRequest, Interval, MarketData, Period, Symbol};

use crate::cli::HistoryArgs;
use crate::error::CliError;

pub async fn run(args: &HistoryArgs, relay: &impl MarketData) -> Result<Value, CliError> {
    let symbol = Symbol::parse(&args.symbol)?;
    let period = args.period.parse::<Period>()?;
    let interval = args.interval.parse::<Interval>()?;

    let series = relay
        .historical(HistoricalRequest::new(symbol, period, interval))
        .await?;
    Ok(serde_json::to_value(series)?)
}
