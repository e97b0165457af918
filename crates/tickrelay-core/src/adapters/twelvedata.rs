use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{parse_market_datetime, parse_number, parse_volume, Transport};
use crate::data_source::{
    Capability, CapabilitySet, DataSource, HistoricalRequest, QuoteBatch, QuoteMap, SourceError,
    SourceFuture,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::{
    BarSeries, HistoricalBar, Interval, Period, ProviderId, Quote, QuoteDetails, Symbol,
    UtcDateTime,
};

const BASE_URL: &str = "https://api.twelvedata.com";
const CAPABILITIES: CapabilitySet = CapabilitySet::new(&[Capability::Quote, Capability::Historical]);

/// Symbols per `/quote` call; each symbol still costs one credit upstream.
pub const BATCH_SIZE: usize = 8;

#[derive(Clone)]
pub struct TwelveDataAdapter {
    transport: Transport,
    api_key: String,
    base_url: String,
}

impl TwelveDataAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            transport: Transport::new(ProviderId::TWELVEDATA, http_client).with_rate_limit_hint(60),
            api_key: api_key.into(),
            base_url: String::from(BASE_URL),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.transport = self.transport.with_timeout_ms(timeout_ms);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get(
        &self,
        path: &str,
        params: &[(&str, &str)],
        symbol: &Symbol,
    ) -> Result<Value, SourceError> {
        let request = HttpRequest::get(format!("{}/{path}", self.base_url))
            .with_query(params)
            .with_query(&[("apikey", self.api_key.as_str())]);
        let response = self.transport.send(request).await?;
        if response.status == 401 {
            return Err(SourceError::provider("invalid twelvedata api key"));
        }
        let body = self.transport.check_status(response, symbol)?;
        let payload: Value = self.transport.parse(&body)?;
        check_status_field(&payload, symbol)?;
        Ok(payload)
    }

    async fn fetch_quote(&self, symbol: Symbol) -> Result<Quote, SourceError> {
        let payload = self.get("quote", &[("symbol", symbol.as_str())], &symbol).await?;
        parse_quote(&payload, symbol.clone())
            .ok_or_else(|| SourceError::symbol_not_found(&symbol))?
            .map_err(|error| self.transport.invalid(error))
    }

    async fn fetch_quotes(&self, symbols: Vec<Symbol>) -> Result<QuoteBatch, SourceError> {
        let mut resolved = QuoteMap::new();

        for batch in symbols.chunks(BATCH_SIZE) {
            let Some(first) = batch.first() else {
                continue;
            };
            let joined = batch
                .iter()
                .map(Symbol::as_str)
                .collect::<Vec<_>>()
                .join(",");

            let payload = match self.get("quote", &[("symbol", joined.as_str())], first).await {
                Ok(payload) => payload,
                Err(error @ SourceError::RateLimited { .. }) => {
                    if resolved.is_empty() {
                        return Err(error);
                    }
                    return Ok(QuoteBatch::interrupted(resolved, error));
                }
                Err(error) => {
                    debug!(provider = "twelvedata", symbols = %joined, %error, "batch unresolved");
                    continue;
                }
            };

            for (symbol, entry) in batch_entries(&payload, batch) {
                match parse_quote(entry, symbol.clone()) {
                    Some(Ok(quote)) => {
                        resolved.insert(symbol, quote);
                    }
                    Some(Err(error)) => {
                        debug!(provider = "twelvedata", %symbol, %error, "invalid quote skipped");
                    }
                    None => {}
                }
            }
        }

        Ok(QuoteBatch::complete(resolved))
    }

    async fn fetch_series(&self, req: HistoricalRequest) -> Result<BarSeries, SourceError> {
        let outputsize = output_size(req.period).to_string();
        let payload = self
            .get(
                "time_series",
                &[
                    ("symbol", req.symbol.as_str()),
                    ("interval", interval_code(req.interval)),
                    ("outputsize", outputsize.as_str()),
                ],
                &req.symbol,
            )
            .await?;

        let rows: Vec<SeriesRow> = payload
            .get("values")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|error| {
                SourceError::provider(format!("failed to parse twelvedata values: {error}"))
            })?
            .unwrap_or_default();
        if rows.is_empty() {
            return Err(SourceError::symbol_not_found(&req.symbol));
        }

        let bars = rows
            .iter()
            .filter_map(|row| {
                let ts = parse_market_datetime(&row.datetime)?;
                HistoricalBar::new(
                    ts,
                    parse_number(&row.open)?,
                    parse_number(&row.high)?,
                    parse_number(&row.low)?,
                    parse_number(&row.close)?,
                    row.volume.as_deref().map_or(0, parse_volume),
                )
                .ok()
            })
            .collect();

        Ok(BarSeries::new(req.symbol, req.interval, bars))
    }
}

impl DataSource for TwelveDataAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::TWELVEDATA
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPABILITIES
    }

    fn quote<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Quote> {
        Box::pin(self.fetch_quote(symbol))
    }

    fn quotes<'a>(&'a self, symbols: Vec<Symbol>) -> SourceFuture<'a, QuoteBatch> {
        Box::pin(self.fetch_quotes(symbols))
    }

    fn historical<'a>(&'a self, req: HistoricalRequest) -> SourceFuture<'a, BarSeries> {
        Box::pin(self.fetch_series(req))
    }
}

/// `{"status":"error","code":429,...}` arrives with HTTP 200.
fn check_status_field(payload: &Value, symbol: &Symbol) -> Result<(), SourceError> {
    if payload.get("status").and_then(Value::as_str) != Some("error") {
        return Ok(());
    }
    let code = payload.get("code").and_then(Value::as_u64).unwrap_or(0);
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");

    if code == 429 {
        return Err(SourceError::rate_limited(Some(60)));
    }
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("not found") || lowered.contains("invalid") {
        return Err(SourceError::symbol_not_found(symbol));
    }
    Err(SourceError::provider(format!("twelvedata: {message}")))
}

/// One symbol answers with a bare quote object; several answer keyed by symbol.
fn batch_entries<'p>(payload: &'p Value, batch: &[Symbol]) -> Vec<(Symbol, &'p Value)> {
    if payload.get("close").is_some() {
        return batch
            .first()
            .map(|symbol| vec![(symbol.clone(), payload)])
            .unwrap_or_default();
    }
    if let Some(items) = payload.as_array() {
        return items
            .iter()
            .filter_map(|item| {
                let symbol = Symbol::parse(item.get("symbol")?.as_str()?).ok()?;
                batch.contains(&symbol).then_some((symbol, item))
            })
            .collect();
    }
    batch
        .iter()
        .filter_map(|symbol| Some((symbol.clone(), payload.get(symbol.as_str())?)))
        .collect()
}

/// `None` when the entry carries no price (unknown symbol or per-symbol error).
fn parse_quote(
    entry: &Value,
    symbol: Symbol,
) -> Option<Result<Quote, crate::ValidationError>> {
    let text = |name: &str| entry.get(name).and_then(Value::as_str);
    let number = |name: &str| text(name).and_then(parse_number);

    let price = number("close")?;
    let previous_close = number("previous_close").unwrap_or(price);
    let (derived_change, derived_percent) = Quote::change_from(price, previous_close);

    Some(Quote::new(
        symbol,
        price,
        number("change").unwrap_or(derived_change),
        number("percent_change").unwrap_or(derived_percent),
        text("volume").map_or(0, parse_volume),
        UtcDateTime::now(),
        ProviderId::TWELVEDATA,
        QuoteDetails {
            open: number("open"),
            high: number("high"),
            low: number("low"),
            previous_close: Some(previous_close),
            name: text("name").map(str::to_owned),
            ..QuoteDetails::default()
        },
    ))
}

const fn interval_code(interval: Interval) -> &'static str {
    match interval {
        Interval::OneMinute => "1min",
        Interval::FiveMinutes => "5min",
        Interval::FifteenMinutes => "15min",
        Interval::ThirtyMinutes => "30min",
        Interval::OneHour => "1h",
        Interval::OneDay => "1day",
        Interval::OneWeek => "1week",
        Interval::OneMonth => "1month",
    }
}

const fn output_size(period: Period) -> u32 {
    match period {
        Period::OneDay => 390,
        Period::FiveDays => 5,
        Period::OneMonth => 30,
        Period::ThreeMonths => 90,
        Period::SixMonths => 180,
        Period::OneYear => 365,
        Period::TwoYears => 730,
        Period::YearToDate => 252,
        Period::FiveYears => 1260,
        Period::Max => 5000,
    }
}

#[derive(Debug, Deserialize)]
struct SeriesRow {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
    #[serde(default)]
    volume: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpResponse, ScriptedHttpClient};

    fn adapter(http: ScriptedHttpClient) -> (Arc<ScriptedHttpClient>, TwelveDataAdapter) {
        let http = Arc::new(http);
        let adapter = TwelveDataAdapter::new(http.clone(), "td-key").with_base_url("https://td.test");
        (http, adapter)
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).expect("valid")
    }

    #[tokio::test]
    async fn single_quote_uses_reported_change() {
        let body = r#"{"symbol":"AAPL","name":"Apple Inc","close":"190.5","previous_close":"188.0",
            "change":"2.5","percent_change":"1.32979","volume":"41000000","open":"188.2","high":"191","low":"187.9"}"#;
        let (_, adapter) =
            adapter(ScriptedHttpClient::new().respond("/quote", HttpResponse::ok_json(body)));

        let quote = adapter.quote(sym("AAPL")).await.expect("quote");
        assert_eq!(quote.price, 190.5);
        assert_eq!(quote.change, 2.5);
        assert_eq!(quote.volume, 41_000_000);
        assert_eq!(quote.details.name.as_deref(), Some("Apple Inc"));
    }

    #[tokio::test]
    async fn error_status_429_is_rate_limit() {
        let body = r#"{"code":429,"message":"You have run out of API credits","status":"error"}"#;
        let (_, adapter) =
            adapter(ScriptedHttpClient::new().respond("/quote", HttpResponse::ok_json(body)));

        let err = adapter.quote(sym("AAPL")).await.expect_err("limited");
        assert_eq!(err, SourceError::rate_limited(Some(60)));
    }

    #[tokio::test]
    async fn not_found_message_is_unknown_symbol() {
        let body = r#"{"code":404,"message":"**symbol** not found: ZZZZ","status":"error"}"#;
        let (_, adapter) =
            adapter(ScriptedHttpClient::new().respond("/quote", HttpResponse::ok_json(body)));

        let err = adapter.quote(sym("ZZZZ")).await.expect_err("unknown");
        assert_eq!(err, SourceError::symbol_not_found("ZZZZ"));
    }

    #[tokio::test]
    async fn batch_is_split_into_groups_of_eight() {
        let entry = |s: &str| format!(r#""{s}":{{"symbol":"{s}","close":"10","previous_close":"10"}}"#);
        let first: Vec<String> = (0..8).map(|i| entry(&format!("S{i}"))).collect();
        let first = format!("{{{}}}", first.join(","));
        let second = r#"{"symbol":"S8","close":"11","previous_close":"10"}"#;

        let (http, adapter) = adapter(
            ScriptedHttpClient::new()
                .respond("/quote", HttpResponse::ok_json(first))
                .respond("/quote", HttpResponse::ok_json(second)),
        );

        let symbols: Vec<Symbol> = (0..9).map(|i| sym(&format!("S{i}"))).collect();
        let batch = adapter.quotes(symbols).await.expect("batch");

        assert!(batch.is_complete());
        assert_eq!(batch.quotes.len(), 9);
        assert_eq!(batch.quotes[&sym("S8")].price, 11.0);
        let requests = http.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].url.contains("symbol=S0%2CS1"));
        assert!(requests[1].url.contains("symbol=S8&"));
    }

    #[tokio::test]
    async fn keyed_batch_ignores_symbols_without_price() {
        let body = r#"{"AAPL":{"close":"190.5"},"ZZZZ":{"code":404,"status":"error","message":"not found"}}"#;
        let (_, adapter) =
            adapter(ScriptedHttpClient::new().respond("/quote", HttpResponse::ok_json(body)));

        let batch = adapter
            .quotes(vec![sym("AAPL"), sym("ZZZZ")])
            .await
            .expect("partial batch");
        assert_eq!(batch.quotes.keys().collect::<Vec<_>>(), vec![&sym("AAPL")]);
        assert!(batch.is_complete());
    }

    #[tokio::test]
    async fn rate_limit_on_later_group_keeps_first_group_and_reports_limit() {
        let entry = |s: &str| format!(r#""{s}":{{"symbol":"{s}","close":"10","previous_close":"10"}}"#);
        let first: Vec<String> = (0..8).map(|i| entry(&format!("S{i}"))).collect();
        let first = format!("{{{}}}", first.join(","));
        let limited = r#"{"code":429,"message":"You have run out of API credits","status":"error"}"#;

        let (http, adapter) = adapter(
            ScriptedHttpClient::new()
                .respond("/quote", HttpResponse::ok_json(first))
                .respond("/quote", HttpResponse::ok_json(limited)),
        );

        let symbols: Vec<Symbol> = (0..9).map(|i| sym(&format!("S{i}"))).collect();
        let batch = adapter.quotes(symbols).await.expect("partial batch");

        assert_eq!(batch.quotes.len(), 8);
        assert!(!batch.quotes.contains_key(&sym("S8")));
        assert_eq!(batch.interrupted_by, Some(SourceError::rate_limited(Some(60))));
        assert_eq!(http.requests().len(), 2);
    }

    #[tokio::test]
    async fn time_series_values_become_bars() {
        let body = r#"{"meta":{"symbol":"AAPL"},"values":[
            {"datetime":"2024-01-05","open":"181","high":"182.7","low":"180.2","close":"181.2","volume":"62000000"},
            {"datetime":"2024-01-04","open":"182","high":"183","low":"180.9","close":"181.9","volume":"71000000"}],"status":"ok"}"#;
        let (http, adapter) =
            adapter(ScriptedHttpClient::new().respond("/time_series", HttpResponse::ok_json(body)));

        let req = HistoricalRequest::new(sym("AAPL"), Period::FiveDays, Interval::OneDay);
        let series = adapter.historical(req).await.expect("series");

        assert_eq!(series.bars.len(), 2);
        assert_eq!(series.bars[1].close, 181.2);
        let url = &http.requests()[0].url;
        assert!(url.contains("interval=1day"));
        assert!(url.contains("outputsize=5"));
    }
}
