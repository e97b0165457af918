use serde::Serialize;
use serde_json::Value;

use tickrelay_core::{Capability, MarketData, Quote, Symbol};

use crate::cli::QuoteArgs;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct QuoteResponseData {
    quotes: Vec<Quote>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    unresolved: Vec<Symbol>,
}

pub async fn run(args: &QuoteArgs, relay: &impl MarketData) -> Result<Value, CliError> {
    let symbols = args
        .symbols
        .iter()
        .map(|raw| Symbol::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    if let [symbol] = symbols.as_slice() {
        let quote = relay.quote(symbol.clone()).await?;
        let data = QuoteResponseData {
            quotes: vec![quote],
            unresolved: Vec::new(),
        };
        return Ok(serde_json::to_value(data)?);
    }

    let mut resolved = relay.quotes(symbols.clone()).await?;
    if resolved.is_empty() {
        return Err(CliError::Unavailable {
            capability: Capability::Quote.to_string(),
        });
    }

    let mut quotes = Vec::with_capacity(resolved.len());
    let mut unresolved = Vec::new();
    for symbol in symbols {
        match resolved.remove(&symbol) {
            Some(quote) => quotes.push(quote),
            // duplicates in the input were already served
            None if quotes.iter().any(|quote| quote.symbol == symbol) => {}
            None => unresolved.push(symbol),
        }
    }

    Ok(serde_json::to_value(QuoteResponseData { quotes, unresolved })?)
}
