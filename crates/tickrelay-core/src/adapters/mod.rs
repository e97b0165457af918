//! HTTP backends behind the [`DataSource`] contract.
//!
//! Each adapter translates upstream payloads and upstream failure signals into domain values
//! and [`SourceError`]. Shared transport handling lives in [`Transport`].

pub mod alphavantage;
pub mod finnhub;
pub mod polygon;
pub mod twelvedata;
pub mod yahoo;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use time::macros::format_description;
use time::{Date, PrimitiveDateTime};
use tracing::debug;

pub use alphavantage::AlphaVantageAdapter;
pub use finnhub::FinnhubAdapter;
pub use polygon::PolygonAdapter;
pub use twelvedata::TwelveDataAdapter;
pub use yahoo::YahooAdapter;

use crate::config::ProviderDescriptor;
use crate::data_source::{DataSource, SourceError};
use crate::error::ConfigError;
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::provider_policy::ProviderPolicy;
use crate::throttling::ThrottlingQueue;
use crate::{ProviderId, Symbol, UtcDateTime, ValidationError};

/// Builds the adapter a descriptor names.
///
/// Returns `Ok(None)` for a keyed backend without a key.
pub fn build_adapter(
    descriptor: &ProviderDescriptor,
    http_client: Arc<dyn HttpClient>,
    timeout_ms: u64,
) -> Result<Option<Arc<dyn DataSource>>, ConfigError> {
    let name = &descriptor.name;
    if name.requires_api_key() && descriptor.api_key.is_none() {
        return Ok(None);
    }
    let api_key = descriptor.api_key.clone().unwrap_or_default();

    let adapter: Arc<dyn DataSource> = match name.as_str() {
        "yahoo" => Arc::new(YahooAdapter::new(http_client).with_timeout_ms(timeout_ms)),
        "alphavantage" => {
            Arc::new(AlphaVantageAdapter::new(http_client, api_key).with_timeout_ms(timeout_ms))
        }
        "finnhub" => {
            Arc::new(FinnhubAdapter::new(http_client, api_key).with_timeout_ms(timeout_ms))
        }
        "twelvedata" => {
            Arc::new(TwelveDataAdapter::new(http_client, api_key).with_timeout_ms(timeout_ms))
        }
        "polygon" => {
            Arc::new(PolygonAdapter::new(http_client, api_key).with_timeout_ms(timeout_ms))
        }
        _ => {
            return Err(ConfigError::UnknownProvider {
                name: name.to_string(),
            })
        }
    };
    Ok(Some(adapter))
}

/// Transport shared by the HTTP adapters: local rate budget, deadline and status mapping.
#[derive(Clone)]
pub(crate) struct Transport {
    provider: ProviderId,
    http_client: Arc<dyn HttpClient>,
    timeout_ms: u64,
    throttle: Option<ThrottlingQueue>,
    rate_limit_hint: Option<u64>,
}

impl Transport {
    pub(crate) fn new(provider: ProviderId, http_client: Arc<dyn HttpClient>) -> Self {
        let throttle = ProviderPolicy::default_for(&provider)
            .as_ref()
            .map(ThrottlingQueue::from_policy);
        Self {
            provider,
            http_client,
            timeout_ms: 10_000,
            throttle,
            rate_limit_hint: None,
        }
    }

    pub(crate) fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Cooldown to suggest on a 429 that carries no `Retry-After`.
    pub(crate) fn with_rate_limit_hint(mut self, secs: u64) -> Self {
        self.rate_limit_hint = Some(secs);
        self
    }

    /// Sends `request` and returns the body of a 2xx response.
    ///
    /// 429 maps to `RateLimited`, 404 to `SymbolNotFound` for `symbol`, any other failure to
    /// `Provider`.
    pub(crate) async fn fetch(
        &self,
        request: HttpRequest,
        symbol: &Symbol,
    ) -> Result<String, SourceError> {
        let response = self.send(request).await?;
        self.check_status(response, symbol)
    }

    pub(crate) async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SourceError> {
        if let Some(throttle) = &self.throttle {
            throttle.admit()?;
        }

        let request = request.with_timeout_ms(self.timeout_ms);
        debug!(provider = %self.provider, url = %redact(&request.url), "upstream request");

        let deadline = Duration::from_millis(self.timeout_ms);
        match tokio::time::timeout(deadline, self.http_client.execute(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(error)) => Err(SourceError::provider(format!(
                "{} transport error: {}",
                self.provider,
                error.message()
            ))),
            Err(_elapsed) => Err(SourceError::provider(format!(
                "{} request timed out after {}ms",
                self.provider, self.timeout_ms
            ))),
        }
    }

    pub(crate) fn check_status(
        &self,
        response: HttpResponse,
        symbol: &Symbol,
    ) -> Result<String, SourceError> {
        if response.is_success() {
            return Ok(response.body);
        }
        if response.is_rate_limited() {
            let hint = response.retry_after_secs().or(self.rate_limit_hint);
            return Err(SourceError::rate_limited(hint));
        }
        if response.status == 404 {
            return Err(SourceError::symbol_not_found(symbol));
        }
        Err(SourceError::provider(format!(
            "{} returned status {}",
            self.provider, response.status
        )))
    }

    pub(crate) fn parse<T: DeserializeOwned>(&self, body: &str) -> Result<T, SourceError> {
        serde_json::from_str(body).map_err(|error| {
            SourceError::provider(format!("failed to parse {} response: {error}", self.provider))
        })
    }

    pub(crate) fn invalid(&self, error: ValidationError) -> SourceError {
        SourceError::provider(format!("{} returned invalid data: {error}", self.provider))
    }
}

/// Hides key-bearing query parameters in log output.
fn redact(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };
    let query = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((name, _)) if matches!(name, "apikey" | "apiKey" | "token") => {
                format!("{name}=***")
            }
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&");
    format!("{base}?{query}")
}

/// Reads a numeric field sent as text. Placeholders such as `None`, `-` and `N/A` are absent.
pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim().trim_end_matches('%');
    if matches!(trimmed, "" | "None" | "-" | "N/A" | "null") {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

pub(crate) fn parse_volume(raw: &str) -> u64 {
    parse_number(raw)
        .filter(|value| *value >= 0.0)
        .map_or(0, |value| value as u64)
}

/// Timestamps written as `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`, taken as UTC.
pub(crate) fn parse_market_datetime(raw: &str) -> Option<UtcDateTime> {
    let raw = raw.trim();
    let datetime = PrimitiveDateTime::parse(
        raw,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    )
    .or_else(|_| {
        Date::parse(raw, format_description!("[year]-[month]-[day]")).map(|date| date.midnight())
    })
    .ok()?;
    Some(UtcDateTime::from_any_offset(datetime.assume_utc()))
}
