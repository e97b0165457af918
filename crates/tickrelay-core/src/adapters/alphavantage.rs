use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use super::{parse_market_datetime, parse_number, parse_volume, Transport};
use crate::data_source::{
    Capability, CapabilitySet, DataSource, HistoricalRequest, SourceError, SourceFuture,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::{
    BarSeries, FundamentalMetrics, Fundamentals, HistoricalBar, Interval, Period, ProviderId,
    Quote, QuoteDetails, Symbol, UtcDateTime,
};

const BASE_URL: &str = "https://www.alphavantage.co/query";
const CAPABILITIES: CapabilitySet = CapabilitySet::new(&[
    Capability::Quote,
    Capability::Historical,
    Capability::Fundamentals,
]);

/// Cooldown for a per-minute frequency notice.
const MINUTE_LIMIT_SECS: u64 = 60;
/// Cooldown once the daily allowance is gone.
const DAILY_LIMIT_SECS: u64 = 86_400;

/// Alpha Vantage adapter. Batches are served one symbol at a time.
#[derive(Clone)]
pub struct AlphaVantageAdapter {
    transport: Transport,
    api_key: String,
    base_url: String,
}

impl AlphaVantageAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            transport: Transport::new(ProviderId::ALPHAVANTAGE, http_client)
                .with_rate_limit_hint(MINUTE_LIMIT_SECS),
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

    async fn query(
        &self,
        params: &[(&str, &str)],
        symbol: &Symbol,
    ) -> Result<Map<String, Value>, SourceError> {
        let request = HttpRequest::get(self.base_url.as_str())
            .with_query(params)
            .with_query(&[("apikey", self.api_key.as_str())]);
        let body = self.transport.fetch(request, symbol).await?;
        let payload: Map<String, Value> = self.transport.parse(&body)?;
        check_payload(&payload, symbol)?;
        Ok(payload)
    }

    async fn fetch_quote(&self, symbol: Symbol) -> Result<Quote, SourceError> {
        let payload = self
            .query(
                &[("function", "GLOBAL_QUOTE"), ("symbol", symbol.as_str())],
                &symbol,
            )
            .await?;

        let fields: HashMap<String, String> = match payload.get("Global Quote") {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_default(),
            None => HashMap::new(),
        };
        let field = |name: &str| fields.get(name).and_then(|raw| parse_number(raw));

        let Some(price) = field("05. price") else {
            return Err(SourceError::symbol_not_found(&symbol));
        };

        Quote::new(
            symbol,
            price,
            field("09. change").unwrap_or(0.0),
            field("10. change percent").unwrap_or(0.0),
            fields.get("06. volume").map_or(0, |raw| parse_volume(raw)),
            UtcDateTime::now(),
            ProviderId::ALPHAVANTAGE,
            QuoteDetails {
                open: field("02. open").filter(|v| *v > 0.0),
                high: field("03. high").filter(|v| *v > 0.0),
                low: field("04. low").filter(|v| *v > 0.0),
                previous_close: field("08. previous close").filter(|v| *v > 0.0),
                ..QuoteDetails::default()
            },
        )
        .map_err(|error| self.transport.invalid(error))
    }

    async fn fetch_series(&self, req: HistoricalRequest) -> Result<BarSeries, SourceError> {
        let outputsize = match req.period {
            Period::FiveDays | Period::OneMonth => "compact",
            _ => "full",
        };
        let mut params = vec![
            ("symbol", req.symbol.as_str()),
            ("outputsize", outputsize),
        ];
        match intraday_interval(req.interval) {
            Some(interval) => {
                params.push(("function", "TIME_SERIES_INTRADAY"));
                params.push(("interval", interval));
            }
            None => params.push(("function", series_function(req.interval))),
        }

        let payload = self.query(&params, &req.symbol).await?;

        let Some(series) = payload
            .iter()
            .find(|(key, _)| key.contains("Time Series"))
            .and_then(|(_, value)| value.as_object())
            .filter(|series| !series.is_empty())
        else {
            return Err(SourceError::symbol_not_found(&req.symbol));
        };

        let mut bars = Vec::with_capacity(series.len());
        for (stamp, values) in series {
            let Ok(row) = serde_json::from_value::<SeriesRow>(values.clone()) else {
                warn!(provider = "alphavantage", %stamp, "skipping malformed bar");
                continue;
            };
            let Some(ts) = parse_market_datetime(stamp) else {
                warn!(provider = "alphavantage", %stamp, "skipping bar with unreadable timestamp");
                continue;
            };
            let (Some(open), Some(high), Some(low), Some(close)) = (
                parse_number(&row.open),
                parse_number(&row.high),
                parse_number(&row.low),
                parse_number(&row.close),
            ) else {
                continue;
            };
            match HistoricalBar::new(ts, open, high, low, close, parse_volume(&row.volume)) {
                Ok(bar) => bars.push(bar),
                Err(error) => warn!(provider = "alphavantage", %stamp, %error, "skipping bar"),
            }
        }

        Ok(BarSeries::new(req.symbol, req.interval, bars))
    }

    async fn fetch_overview(&self, symbol: Symbol) -> Result<Fundamentals, SourceError> {
        let payload = self
            .query(&[("function", "OVERVIEW"), ("symbol", symbol.as_str())], &symbol)
            .await?;

        if !payload.contains_key("Symbol") {
            return Err(SourceError::symbol_not_found(&symbol));
        }

        let text = |name: &str| {
            payload
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !matches!(*value, "" | "None" | "-" | "N/A"))
                .map(str::to_owned)
        };
        let number = |name: &str| text(name).and_then(|raw| parse_number(&raw));

        let metrics = FundamentalMetrics {
            pe_ratio: number("PERatio"),
            eps: number("EPS"),
            market_cap: number("MarketCapitalization"),
            dividend_yield: number("DividendYield"),
            fifty_two_week_high: number("52WeekHigh"),
            fifty_two_week_low: number("52WeekLow"),
            sector: text("Sector"),
            industry: text("Industry"),
        };

        Fundamentals::new(
            symbol,
            text("Name").unwrap_or_default(),
            ProviderId::ALPHAVANTAGE,
            metrics,
        )
        .map_err(|error| self.transport.invalid(error))
    }
}

impl DataSource for AlphaVantageAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::ALPHAVANTAGE
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPABILITIES
    }

    fn quote<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Quote> {
        Box::pin(self.fetch_quote(symbol))
    }

    fn historical<'a>(&'a self, req: HistoricalRequest) -> SourceFuture<'a, BarSeries> {
        Box::pin(self.fetch_series(req))
    }

    fn fundamentals<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Fundamentals> {
        Box::pin(self.fetch_overview(symbol))
    }
}

/// Alpha Vantage answers 200 for throttling and bad symbols; the body says which.
fn check_payload(payload: &Map<String, Value>, symbol: &Symbol) -> Result<(), SourceError> {
    if let Some(note) = payload.get("Note").and_then(Value::as_str) {
        let note = note.to_ascii_lowercase();
        if note.contains("call frequency") {
            return Err(SourceError::rate_limited(Some(MINUTE_LIMIT_SECS)));
        }
        if note.contains("premium") {
            return Err(SourceError::rate_limited(Some(DAILY_LIMIT_SECS)));
        }
    }
    if payload.contains_key("Error Message") {
        return Err(SourceError::symbol_not_found(symbol));
    }
    if let Some(info) = payload.get("Information").and_then(Value::as_str) {
        warn!(provider = "alphavantage", info, "upstream information notice");
        return Err(SourceError::rate_limited(Some(MINUTE_LIMIT_SECS)));
    }
    Ok(())
}

const fn intraday_interval(interval: Interval) -> Option<&'static str> {
    match interval {
        Interval::OneMinute => Some("1min"),
        Interval::FiveMinutes => Some("5min"),
        Interval::FifteenMinutes => Some("15min"),
        Interval::ThirtyMinutes => Some("30min"),
        Interval::OneHour => Some("60min"),
        Interval::OneDay | Interval::OneWeek | Interval::OneMonth => None,
    }
}

/// Series function for non-intraday intervals.
const fn series_function(interval: Interval) -> &'static str {
    match interval {
        Interval::OneWeek => "TIME_SERIES_WEEKLY",
        Interval::OneMonth => "TIME_SERIES_MONTHLY",
        _ => "TIME_SERIES_DAILY",
    }
}

#[derive(Debug, Deserialize)]
struct SeriesRow {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume")]
    volume: String,
}
