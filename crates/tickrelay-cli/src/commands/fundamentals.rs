use serde_json::Value;

use tickrelay_core::{MarketData, Symbol};

use crate::cli::FundamentalsArgs;
use crate::error::CliError;

pub async fn run(args: &FundamentalsArgs, relay: &impl MarketData) -> Result<Value, CliError> {
    let symbol = Symbol::parse(&args.symbol)?;
    let fundamentals = relay.fundamentals(symbol).await?;
    Ok(serde_json::to_value(fundamentals)?)
}
