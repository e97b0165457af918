use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use super::Transport;
use crate::data_source::{
    Capability, CapabilitySet, DataSource, HistoricalRequest, SourceError, SourceFuture,
};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::{
    BarSeries, FundamentalMetrics, Fundamentals, HistoricalBar, ProviderId, Quote, QuoteDetails,
    Symbol, UtcDateTime,
};

const BASE_URL: &str = "https://query1.finance.yahoo.com";
const COOKIE_URL: &str = "https://fc.yahoo.com";
const REFERER: &str = "https://finance.yahoo.com/";
const SUMMARY_MODULES: &str = "price,summaryDetail,defaultKeyStatistics,assetProfile";
const CAPABILITIES: CapabilitySet = CapabilitySet::new(&[
    Capability::Quote,
    Capability::Historical,
    Capability::Fundamentals,
]);

/// Session crumb required by the `quoteSummary` endpoint.
///
/// The session cookie lands in the HTTP client's cookie jar; only the crumb is kept here.
/// The lock is held across a refresh so concurrent callers wait for one fetch.
#[derive(Clone, Default)]
struct CrumbSession {
    crumb: Arc<Mutex<Option<String>>>,
}

impl CrumbSession {
    async fn get(&self, transport: &Transport, base_url: &str) -> Result<String, SourceError> {
        let mut cached = self.crumb.lock().await;
        if let Some(crumb) = cached.as_ref() {
            return Ok(crumb.clone());
        }

        // only the cookie side effect matters here
        let _ = transport
            .send(HttpRequest::get(COOKIE_URL).with_header("referer", REFERER))
            .await?;

        let response = transport
            .send(
                HttpRequest::get(format!("{base_url}/v1/test/getcrumb"))
                    .with_header("referer", REFERER),
            )
            .await?;
        if response.is_rate_limited() {
            return Err(SourceError::rate_limited(response.retry_after_secs()));
        }

        let body = response.body.trim();
        if !response.is_success() || !is_plausible_crumb(body) {
            return Err(SourceError::provider(format!(
                "yahoo crumb request failed with status {}",
                response.status
            )));
        }

        debug!("yahoo crumb refreshed");
        *cached = Some(body.to_string());
        Ok(body.to_string())
    }

    async fn invalidate(&self) {
        *self.crumb.lock().await = None;
    }
}

fn is_plausible_crumb(body: &str) -> bool {
    !body.is_empty()
        && body.len() < 100
        && !body.contains(char::is_whitespace)
        && !body.contains('<')
        && !body.to_ascii_lowercase().contains("too many requests")
}

/// Keyless Yahoo Finance adapter.
///
/// Quotes and history come from the v8 chart endpoint; fundamentals from `quoteSummary`,
/// which needs a session crumb.
#[derive(Clone)]
pub struct YahooAdapter {
    transport: Transport,
    base_url: String,
    session: CrumbSession,
}

impl YahooAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            transport: Transport::new(ProviderId::YAHOO, http_client),
            base_url: String::from(BASE_URL),
            session: CrumbSession::default(),
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

    async fn chart(
        &self,
        symbol: &Symbol,
        range: &str,
        interval: &str,
    ) -> Result<ChartResult, SourceError> {
        let request = HttpRequest::get(format!(
            "{}/v8/finance/chart/{}",
            self.base_url,
            urlencoding::encode(symbol.as_str())
        ))
        .with_query(&[("range", range), ("interval", interval)])
        .with_header("referer", REFERER);

        let body = self.transport.fetch(request, symbol).await?;
        let payload: ChartResponse = self.transport.parse(&body)?;

        if let Some(error) = payload.chart.error {
            return Err(error.into_source_error(symbol));
        }
        payload
            .chart
            .result
            .and_then(|results| results.into_iter().next())
            .ok_or_else(|| SourceError::symbol_not_found(symbol))
    }

    async fn fetch_quote(&self, symbol: Symbol) -> Result<Quote, SourceError> {
        let result = self.chart(&symbol, "1d", "1d").await?;
        let meta = result.meta;

        let Some(price) = meta.regular_market_price else {
            return Err(SourceError::symbol_not_found(&symbol));
        };
        let previous_close = meta
            .chart_previous_close
            .or(meta.previous_close)
            .unwrap_or(price);
        let (change, change_percent) = Quote::change_from(price, previous_close);
        let as_of = meta
            .regular_market_time
            .and_then(|secs| UtcDateTime::from_unix_seconds(secs).ok())
            .unwrap_or_else(UtcDateTime::now);
        let open = result
            .indicators
            .and_then(|indicators| indicators.quote.into_iter().next())
            .and_then(|series| series.open.into_iter().flatten().last());

        Quote::new(
            symbol,
            price,
            change,
            change_percent,
            meta.regular_market_volume.map_or(0, |v| v.max(0) as u64),
            as_of,
            ProviderId::YAHOO,
            QuoteDetails {
                open,
                high: meta.regular_market_day_high,
                low: meta.regular_market_day_low,
                previous_close: Some(previous_close),
                market_cap: None,
                name: meta.short_name.or(meta.long_name),
            },
        )
        .map_err(|error| self.transport.invalid(error))
    }

    async fn fetch_history(&self, req: HistoricalRequest) -> Result<BarSeries, SourceError> {
        let result = self
            .chart(&req.symbol, req.period.as_str(), req.interval.as_str())
            .await?;

        let timestamps = result.timestamp.unwrap_or_default();
        let Some(series) = result
            .indicators
            .and_then(|indicators| indicators.quote.into_iter().next())
        else {
            return Err(SourceError::symbol_not_found(&req.symbol));
        };
        if timestamps.is_empty() {
            return Err(SourceError::symbol_not_found(&req.symbol));
        }

        let mut bars = Vec::with_capacity(timestamps.len());
        for (index, ts) in timestamps.iter().enumerate() {
            // rows with a null price are gaps in the session
            let (Some(Some(open)), Some(Some(high)), Some(Some(low)), Some(Some(close))) = (
                series.open.get(index),
                series.high.get(index),
                series.low.get(index),
                series.close.get(index),
            ) else {
                continue;
            };
            let volume = series
                .volume
                .get(index)
                .copied()
                .flatten()
                .map_or(0, |v| v.max(0) as u64);
            let ts = UtcDateTime::from_unix_seconds(*ts)
                .map_err(|error| self.transport.invalid(error))?;
            let bar = HistoricalBar::new(ts, *open, *high, *low, *close, volume)
                .map_err(|error| self.transport.invalid(error))?;
            bars.push(bar);
        }

        if bars.is_empty() {
            return Err(SourceError::symbol_not_found(&req.symbol));
        }
        Ok(BarSeries::new(req.symbol, req.interval, bars))
    }

    async fn summary_request(&self, symbol: &Symbol) -> Result<HttpResponse, SourceError> {
        let crumb = self.session.get(&self.transport, &self.base_url).await?;
        let request = HttpRequest::get(format!(
            "{}/v10/finance/quoteSummary/{}",
            self.base_url,
            urlencoding::encode(symbol.as_str())
        ))
        .with_query(&[("modules", SUMMARY_MODULES), ("crumb", crumb.as_str())])
        .with_header("referer", REFERER);
        self.transport.send(request).await
    }

    async fn fetch_fundamentals(&self, symbol: Symbol) -> Result<Fundamentals, SourceError> {
        let mut response = self.summary_request(&symbol).await?;
        if response.status == 401 {
            // stale crumb; one refresh
            self.session.invalidate().await;
            response = self.summary_request(&symbol).await?;
        }

        let body = self.transport.check_status(response, &symbol)?;
        let payload: SummaryResponse = self.transport.parse(&body)?;
        if let Some(error) = payload.quote_summary.error {
            return Err(error.into_source_error(&symbol));
        }
        let Some(result) = payload
            .quote_summary
            .result
            .and_then(|results| results.into_iter().next())
        else {
            return Err(SourceError::symbol_not_found(&symbol));
        };

        let price = result.price.unwrap_or_default();
        let Some(name) = price.short_name.or(price.long_name) else {
            return Err(SourceError::symbol_not_found(&symbol));
        };
        let detail = result.summary_detail.unwrap_or_default();
        let stats = result.default_key_statistics.unwrap_or_default();
        let profile = result.asset_profile.unwrap_or_default();

        let metrics = FundamentalMetrics {
            pe_ratio: RawValue::get(&detail.trailing_pe),
            eps: RawValue::get(&stats.trailing_eps),
            market_cap: RawValue::get(&price.market_cap)
                .or_else(|| RawValue::get(&detail.market_cap)),
            dividend_yield: RawValue::get(&detail.dividend_yield),
            fifty_two_week_high: RawValue::get(&detail.fifty_two_week_high),
            fifty_two_week_low: RawValue::get(&detail.fifty_two_week_low),
            sector: profile.sector,
            industry: profile.industry,
        };

        Fundamentals::new(symbol, name, ProviderId::YAHOO, metrics)
            .map_err(|error| self.transport.invalid(error))
    }
}

impl DataSource for YahooAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::YAHOO
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPABILITIES
    }

    fn quote<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Quote> {
        Box::pin(self.fetch_quote(symbol))
    }

    fn historical<'a>(&'a self, req: HistoricalRequest) -> SourceFuture<'a, BarSeries> {
        Box::pin(self.fetch_history(req))
    }

    fn fundamentals<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Fundamentals> {
        Box::pin(self.fetch_fundamentals(symbol))
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<String>,
    description: Option<String>,
}

impl ApiError {
    fn into_source_error(self, symbol: &Symbol) -> SourceError {
        if self.code.as_deref() == Some("Not Found") {
            return SourceError::symbol_not_found(symbol);
        }
        SourceError::provider(format!(
            "yahoo error {}: {}",
            self.code.unwrap_or_default(),
            self.description.unwrap_or_default()
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    result: Option<Vec<ChartResult>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Option<ChartIndicators>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    previous_close: Option<f64>,
    regular_market_volume: Option<i64>,
    regular_market_day_high: Option<f64>,
    regular_market_day_low: Option<f64>,
    regular_market_time: Option<i64>,
    short_name: Option<String>,
    long_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<i64>>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: SummaryEnvelope,
}

#[derive(Debug, Deserialize)]
struct SummaryEnvelope {
    result: Option<Vec<SummaryResult>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResult {
    price: Option<PriceModule>,
    summary_detail: Option<SummaryDetailModule>,
    default_key_statistics: Option<KeyStatisticsModule>,
    asset_profile: Option<AssetProfileModule>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceModule {
    short_name: Option<String>,
    long_name: Option<String>,
    market_cap: Option<RawValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryDetailModule {
    #[serde(rename = "trailingPE")]
    trailing_pe: Option<RawValue>,
    market_cap: Option<RawValue>,
    dividend_yield: Option<RawValue>,
    fifty_two_week_high: Option<RawValue>,
    fifty_two_week_low: Option<RawValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyStatisticsModule {
    trailing_eps: Option<RawValue>,
}

#[derive(Debug, Default, Deserialize)]
struct AssetProfileModule {
    sector: Option<String>,
    industry: Option<String>,
}

/// Numbers in `quoteSummary` arrive wrapped as `{"raw": .., "fmt": ..}`; `{}` means absent.
#[derive(Debug, Deserialize)]
struct RawValue {
    raw: Option<f64>,
}

impl RawValue {
    fn get(value: &Option<Self>) -> Option<f64> {
        value
            .as_ref()
            .and_then(|value| value.raw)
            .filter(|raw| raw.is_finite())
    }
}
