use std::sync::Arc;

use serde::Deserialize;
use time::macros::format_description;
use time::{Duration, OffsetDateTime};

use super::Transport;
use crate::data_source::{
    Capability, CapabilitySet, DataSource, HistoricalRequest, SourceError, SourceFuture,
};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::{
    BarSeries, HistoricalBar, Interval, ProviderId, Quote, QuoteDetails, Symbol, UtcDateTime,
};

const BASE_URL: &str = "https://api.polygon.io";
const CAPABILITIES: CapabilitySet = CapabilitySet::new(&[Capability::Quote, Capability::Historical]);

/// Polygon aggregates adapter. Quotes come from the previous-day aggregate.
#[derive(Clone)]
pub struct PolygonAdapter {
    transport: Transport,
    auth: HttpAuth,
    base_url: String,
}

impl PolygonAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            transport: Transport::new(ProviderId::POLYGON, http_client).with_rate_limit_hint(60),
            auth: HttpAuth::BearerToken(api_key.into()),
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

    async fn aggregates(
        &self,
        request: HttpRequest,
        symbol: &Symbol,
    ) -> Result<Vec<PolygonAggregate>, SourceError> {
        let response = self.transport.send(request.with_auth(&self.auth)).await?;
        match response.status {
            401 => return Err(SourceError::provider("invalid polygon api key")),
            403 => return Err(SourceError::provider("polygon plan does not cover this endpoint")),
            _ => {}
        }
        let body = self.transport.check_status(response, symbol)?;
        let payload: PolygonAggregates = self.transport.parse(&body)?;

        let results = payload.results.unwrap_or_default();
        if results.is_empty() || payload.results_count == Some(0) {
            return Err(SourceError::symbol_not_found(symbol));
        }
        if !matches!(payload.status.as_deref(), Some("OK") | Some("DELAYED") | None) {
            return Err(SourceError::provider(format!(
                "polygon returned status {}",
                payload.status.unwrap_or_default()
            )));
        }
        Ok(results)
    }

    async fn fetch_quote(&self, symbol: Symbol) -> Result<Quote, SourceError> {
        let url = format!(
            "{}/v2/aggs/ticker/{}/prev",
            self.base_url,
            urlencoding::encode(symbol.as_str())
        );
        let results = self.aggregates(HttpRequest::get(url), &symbol).await?;
        let Some(bar) = results.into_iter().next() else {
            return Err(SourceError::symbol_not_found(&symbol));
        };

        // the previous-day aggregate has no prior close, so change is measured from the open
        let (change, change_percent) = Quote::change_from(bar.c, bar.o);
        let as_of = bar
            .t
            .and_then(|millis| UtcDateTime::from_unix_millis(millis).ok())
            .unwrap_or_else(UtcDateTime::now);

        Quote::new(
            symbol,
            bar.c,
            change,
            change_percent,
            volume(bar.v),
            as_of,
            ProviderId::POLYGON,
            QuoteDetails {
                open: Some(bar.o),
                high: Some(bar.h),
                low: Some(bar.l),
                ..QuoteDetails::default()
            },
        )
        .map_err(|error| self.transport.invalid(error))
    }

    async fn fetch_range(&self, req: HistoricalRequest) -> Result<BarSeries, SourceError> {
        let now = OffsetDateTime::now_utc();
        let from = now - Duration::days(req.period.approx_days(now.ordinal()));
        let (multiplier, timespan) = timespan(req.interval);

        let url = format!(
            "{}/v2/aggs/ticker/{}/range/{multiplier}/{timespan}/{}/{}",
            self.base_url,
            urlencoding::encode(req.symbol.as_str()),
            format_day(from),
            format_day(now),
        );
        let request =
            HttpRequest::get(url).with_query(&[("adjusted", "true"), ("sort", "asc"), ("limit", "50000")]);
        let results = self.aggregates(request, &req.symbol).await?;

        let mut bars = Vec::with_capacity(results.len());
        for aggregate in results {
            let Some(millis) = aggregate.t else {
                continue;
            };
            let ts = UtcDateTime::from_unix_millis(millis)
                .map_err(|error| self.transport.invalid(error))?;
            let bar = HistoricalBar::new(
                ts,
                aggregate.o,
                aggregate.h,
                aggregate.l,
                aggregate.c,
                volume(aggregate.v),
            )
            .map_err(|error| self.transport.invalid(error))?;
            bars.push(bar);
        }

        Ok(BarSeries::new(req.symbol, req.interval, bars))
    }
}

impl DataSource for PolygonAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::POLYGON
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPABILITIES
    }

    fn quote<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Quote> {
        Box::pin(self.fetch_quote(symbol))
    }

    fn historical<'a>(&'a self, req: HistoricalRequest) -> SourceFuture<'a, BarSeries> {
        Box::pin(self.fetch_range(req))
    }
}

const fn timespan(interval: Interval) -> (u32, &'static str) {
    match interval {
        Interval::OneMinute => (1, "minute"),
        Interval::FiveMinutes => (5, "minute"),
        Interval::FifteenMinutes => (15, "minute"),
        Interval::ThirtyMinutes => (30, "minute"),
        Interval::OneHour => (1, "hour"),
        Interval::OneDay => (1, "day"),
        Interval::OneWeek => (1, "week"),
        Interval::OneMonth => (1, "month"),
    }
}

fn format_day(at: OffsetDateTime) -> String {
    at.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| at.date().to_string())
}

fn volume(raw: Option<f64>) -> u64 {
    raw.filter(|v| v.is_finite() && *v >= 0.0).map_or(0, |v| v as u64)
}

#[derive(Debug, Deserialize)]
struct PolygonAggregates {
    status: Option<String>,
    #[serde(rename = "resultsCount")]
    results_count: Option<u64>,
    results: Option<Vec<PolygonAggregate>>,
}

#[derive(Debug, Deserialize)]
struct PolygonAggregate {
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: Option<f64>,
    t: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;
    use crate::http_client::{HttpResponse, ScriptedHttpClient};
    use crate::Period;

    fn adapter(http: ScriptedHttpClient) -> (Arc<ScriptedHttpClient>, PolygonAdapter) {
        let http = Arc::new(http);
        let adapter = PolygonAdapter::new(http.clone(), "pg-key").with_base_url("https://pg.test");
        (http, adapter)
    }

    fn aapl() -> Symbol {
        Symbol::parse("AAPL").expect("valid")
    }

    #[tokio::test]
    async fn previous_day_aggregate_becomes_quote() {
        let body = r#"{"ticker":"AAPL","status":"OK","resultsCount":1,"results":[
            {"T":"AAPL","o":100.0,"h":106.0,"l":99.0,"c":105.0,"v":70790813.0,"t":1704412800000}]}"#;
        let (http, adapter) =
            adapter(ScriptedHttpClient::new().respond("/prev", HttpResponse::ok_json(body)));

        let quote = adapter.quote(aapl()).await.expect("quote");
        assert_eq!(quote.price, 105.0);
        assert_eq!(quote.change, 5.0);
        assert_eq!(quote.change_percent, 5.0);
        assert_eq!(quote.volume, 70_790_813);
        assert_eq!(quote.as_of.into_inner().unix_timestamp(), 1_704_412_800);

        let request = &http.requests()[0];
        assert_eq!(request.url, "https://pg.test/v2/aggs/ticker/AAPL/prev");
        assert_eq!(
            request.headers.get("authorization").map(String::as_str),
            Some("Bearer pg-key")
        );
    }

    #[tokio::test]
    async fn empty_results_mean_unknown_symbol() {
        let body = r#"{"ticker":"ZZZZ","status":"OK","resultsCount":0,"results":[]}"#;
        let (_, adapter) =
            adapter(ScriptedHttpClient::new().respond("/prev", HttpResponse::ok_json(body)));

        let err = adapter.quote(aapl()).await.expect_err("empty");
        assert_eq!(err.kind(), SourceErrorKind::SymbolNotFound);
    }

    #[tokio::test]
    async fn status_404_and_429_are_classified() {
        let (_, missing) =
            adapter(ScriptedHttpClient::new().respond("/prev", HttpResponse::new(404, "{}")));
        assert_eq!(
            missing.quote(aapl()).await.expect_err("404").kind(),
            SourceErrorKind::SymbolNotFound
        );

        let (_, limited) =
            adapter(ScriptedHttpClient::new().respond("/prev", HttpResponse::new(429, "{}")));
        assert_eq!(
            limited.quote(aapl()).await.expect_err("429").kind(),
            SourceErrorKind::RateLimited
        );
    }

    #[tokio::test]
    async fn range_request_uses_timespan_and_dates() {
        let body = r#"{"status":"OK","resultsCount":2,"results":[
            {"o":10,"h":11,"l":9,"c":10.5,"v":100,"t":1704326400000},
            {"o":10.5,"h":12,"l":10,"c":11.5,"v":120,"t":1704412800000}]}"#;
        let (http, adapter) =
            adapter(ScriptedHttpClient::new().respond("/range/", HttpResponse::ok_json(body)));

        let req = HistoricalRequest::new(aapl(), Period::OneMonth, Interval::FiveMinutes);
        let series = adapter.historical(req).await.expect("series");

        assert_eq!(series.bars.len(), 2);
        assert_eq!(series.interval, Interval::FiveMinutes);
        assert!(http.requests()[0].url.contains("/range/5/minute/"));
    }
}
