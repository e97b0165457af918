use std::sync::Arc;

use serde::Deserialize;
use time::{Duration, OffsetDateTime};

use super::Transport;
use crate::data_source::{
    Capability, CapabilitySet, DataSource, HistoricalRequest, SourceError, SourceFuture,
};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::{
    BarSeries, HistoricalBar, Interval, ProviderId, Quote, QuoteDetails, Symbol, UtcDateTime,
};

const BASE_URL: &str = "https://finnhub.io/api/v1";
const CAPABILITIES: CapabilitySet = CapabilitySet::new(&[Capability::Quote, Capability::Historical]);

/// Finnhub REST adapter (quotes and candles).
#[derive(Clone)]
pub struct FinnhubAdapter {
    transport: Transport,
    auth: HttpAuth,
    base_url: String,
}

impl FinnhubAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            transport: Transport::new(ProviderId::FINNHUB, http_client).with_rate_limit_hint(60),
            auth: HttpAuth::Header {
                name: String::from("X-Finnhub-Token"),
                value: api_key.into(),
            },
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

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, &str)],
        symbol: &Symbol,
    ) -> Result<T, SourceError> {
        let request = HttpRequest::get(format!("{}/{path}", self.base_url))
            .with_query(params)
            .with_auth(&self.auth);
        let response = self.transport.send(request).await?;

        match response.status {
            401 => return Err(SourceError::provider("invalid finnhub api key")),
            403 => return Err(SourceError::provider("finnhub api key lacks permissions")),
            _ => {}
        }

        let body = self.transport.check_status(response, symbol)?;
        if let Ok(FinnhubError { error }) = serde_json::from_str::<FinnhubError>(&body) {
            return Err(SourceError::provider(format!("finnhub: {error}")));
        }
        self.transport.parse(&body)
    }

    async fn fetch_quote(&self, symbol: Symbol) -> Result<Quote, SourceError> {
        let payload: FinnhubQuote = self
            .get("quote", &[("symbol", symbol.as_str())], &symbol)
            .await?;

        // unknown symbols come back as an all-zero quote
        let price = match payload.c {
            Some(price) if price > 0.0 => price,
            _ => return Err(SourceError::symbol_not_found(&symbol)),
        };
        let previous_close = payload.pc.filter(|pc| *pc > 0.0).unwrap_or(price);
        let (change, change_percent) = Quote::change_from(price, previous_close);

        Quote::new(
            symbol,
            price,
            change,
            change_percent,
            0,
            UtcDateTime::now(),
            ProviderId::FINNHUB,
            QuoteDetails {
                open: payload.o,
                high: payload.h,
                low: payload.l,
                previous_close: Some(previous_close),
                ..QuoteDetails::default()
            },
        )
        .map_err(|error| self.transport.invalid(error))
    }

    async fn fetch_candles(&self, req: HistoricalRequest) -> Result<BarSeries, SourceError> {
        let now = OffsetDateTime::now_utc();
        let from = now - Duration::days(req.period.approx_days(now.ordinal()));
        let from = from.unix_timestamp().to_string();
        let to = now.unix_timestamp().to_string();

        let payload: FinnhubCandles = self
            .get(
                "stock/candle",
                &[
                    ("symbol", req.symbol.as_str()),
                    ("resolution", resolution(req.interval)),
                    ("from", from.as_str()),
                    ("to", to.as_str()),
                ],
                &req.symbol,
            )
            .await?;

        if payload.s.as_deref() == Some("no_data") || payload.c.is_empty() {
            return Err(SourceError::symbol_not_found(&req.symbol));
        }

        let mut bars = Vec::with_capacity(payload.t.len());
        for (index, ts) in payload.t.iter().enumerate() {
            let (Some(open), Some(high), Some(low), Some(close)) = (
                payload.o.get(index),
                payload.h.get(index),
                payload.l.get(index),
                payload.c.get(index),
            ) else {
                continue;
            };
            let volume = payload
                .v
                .get(index)
                .copied()
                .filter(|v| *v >= 0.0)
                .map_or(0, |v| v as u64);
            let ts = UtcDateTime::from_unix_seconds(*ts)
                .map_err(|error| self.transport.invalid(error))?;
            let bar = HistoricalBar::new(ts, *open, *high, *low, *close, volume)
                .map_err(|error| self.transport.invalid(error))?;
            bars.push(bar);
        }

        Ok(BarSeries::new(req.symbol, req.interval, bars))
    }
}

impl DataSource for FinnhubAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::FINNHUB
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPABILITIES
    }

    fn quote<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Quote> {
        Box::pin(self.fetch_quote(symbol))
    }

    fn historical<'a>(&'a self, req: HistoricalRequest) -> SourceFuture<'a, BarSeries> {
        Box::pin(self.fetch_candles(req))
    }
}

const fn resolution(interval: Interval) -> &'static str {
    match interval {
        Interval::OneMinute => "1",
        Interval::FiveMinutes => "5",
        Interval::FifteenMinutes => "15",
        Interval::ThirtyMinutes => "30",
        Interval::OneHour => "60",
        Interval::OneDay => "D",
        Interval::OneWeek => "W",
        Interval::OneMonth => "M",
    }
}

#[derive(Debug, Deserialize)]
struct FinnhubError {
    error: String,
}

#[derive(Debug, Deserialize)]
struct FinnhubQuote {
    c: Option<f64>,
    pc: Option<f64>,
    o: Option<f64>,
    h: Option<f64>,
    l: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FinnhubCandles {
    s: Option<String>,
    #[serde(default)]
    t: Vec<i64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    v: Vec<f64>,
}
