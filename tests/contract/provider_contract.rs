//! Contract tests every HTTP backend must satisfy.
//!
//! Each case runs the same scripted upstream behavior against all five adapters and
//! checks that they classify it the same way.

use std::sync::Arc;

use tickrelay_core::{
    build_adapter, AlphaVantageAdapter, Capability, DataSource, FinnhubAdapter, HttpClient,
    HttpError, HttpResponse, PolygonAdapter, ProviderDescriptor, ProviderId, ScriptedHttpClient,
    SourceError, SourceErrorKind, Symbol, TwelveDataAdapter, YahooAdapter,
};

fn every_adapter(http: Arc<ScriptedHttpClient>) -> Vec<Arc<dyn DataSource>> {
    let yahoo: Arc<dyn DataSource> = Arc::new(YahooAdapter::new(http.clone()));
    let polygon: Arc<dyn DataSource> = Arc::new(PolygonAdapter::new(http.clone(), "pg-key"));
    let alphavantage: Arc<dyn DataSource> =
        Arc::new(AlphaVantageAdapter::new(http.clone(), "av-key"));
    let finnhub: Arc<dyn DataSource> = Arc::new(FinnhubAdapter::new(http.clone(), "fh-key"));
    let twelvedata: Arc<dyn DataSource> = Arc::new(TwelveDataAdapter::new(http, "td-key"));
    vec![yahoo, polygon, alphavantage, finnhub, twelvedata]
}

fn answering_everything(response: HttpResponse) -> Arc<ScriptedHttpClient> {
    Arc::new(ScriptedHttpClient::new().respond("://", response))
}

fn aapl() -> Symbol {
    Symbol::parse("AAPL").expect("valid symbol")
}

#[tokio::test]
async fn when_upstream_returns_429_every_adapter_reports_rate_limited_with_hint() {
    // Given: an upstream that rejects every call with a 17 second Retry-After
    let http = answering_everything(HttpResponse::new(429, "").with_header("Retry-After", "17"));

    for adapter in every_adapter(http) {
        // When: a quote is requested
        let err = adapter.quote(aapl()).await.expect_err("rate limited");

        // Then: the adapter forwards the upstream hint
        assert_eq!(
            err,
            SourceError::rate_limited(Some(17)),
            "adapter {}",
            adapter.id()
        );
    }
}

#[tokio::test]
async fn when_transport_fails_every_adapter_reports_provider_error() {
    // Given: an upstream that cannot be reached
    let http = Arc::new(
        ScriptedHttpClient::new().fail("://", HttpError::new("connection refused")),
    );

    for adapter in every_adapter(http) {
        // When: a quote is requested
        let err = adapter.quote(aapl()).await.expect_err("unreachable");

        // Then: the failure is a provider error, never a rate limit
        assert_eq!(err.kind(), SourceErrorKind::Provider, "adapter {}", adapter.id());
    }
}

#[tokio::test]
async fn when_upstream_returns_404_every_adapter_reports_symbol_not_found() {
    // Given: an upstream that does not know any path
    let http = answering_everything(HttpResponse::new(404, "{}"));

    for adapter in every_adapter(http) {
        // When: a quote is requested
        let err = adapter.quote(aapl()).await.expect_err("not found");

        // Then: the symbol is reported as unknown to this backend
        assert_eq!(
            err.kind(),
            SourceErrorKind::SymbolNotFound,
            "adapter {}",
            adapter.id()
        );
    }
}

#[tokio::test]
async fn when_upstream_sends_garbage_every_adapter_reports_provider_error() {
    // Given: an upstream answering 200 with an HTML page
    let http = answering_everything(HttpResponse::ok_json("<html>maintenance</html>"));

    for adapter in every_adapter(http) {
        // When: a quote is requested
        let err = adapter.quote(aapl()).await.expect_err("unparseable");

        // Then: the parse failure is a provider error
        assert_eq!(err.kind(), SourceErrorKind::Provider, "adapter {}", adapter.id());
    }
}

#[tokio::test]
async fn when_health_probe_is_rate_limited_every_adapter_returns_the_rate_limit() {
    // Given: an upstream that throttles every call
    let http = answering_everything(HttpResponse::new(429, ""));

    for adapter in every_adapter(http) {
        // When: the health probe runs
        let outcome = adapter.health_check().await;

        // Then: the rate limit is surfaced as an error rather than a negative answer
        assert!(
            matches!(outcome, Err(SourceError::RateLimited { .. })),
            "adapter {}: {outcome:?}",
            adapter.id()
        );
    }
}

#[tokio::test]
async fn when_capability_is_not_declared_adapter_rejects_without_network_call() {
    // Given: backends that do not serve fundamentals
    let http = Arc::new(ScriptedHttpClient::new());
    let finnhub = FinnhubAdapter::new(http.clone(), "fh-key");
    let polygon = PolygonAdapter::new(http.clone(), "pg-key");

    // When: fundamentals are requested
    let finnhub_err = finnhub.fundamentals(aapl()).await.expect_err("unsupported");
    let polygon_err = polygon.fundamentals(aapl()).await.expect_err("unsupported");

    // Then: both refuse up front
    assert_eq!(finnhub_err, SourceError::unsupported(Capability::Fundamentals));
    assert_eq!(polygon_err, SourceError::unsupported(Capability::Fundamentals));
    assert!(!finnhub.capabilities().contains(Capability::Fundamentals));
    assert!(http.requests().is_empty());
}

#[test]
fn when_adapters_are_built_from_descriptors_ids_match_descriptor_names() {
    // Given: a descriptor with a key for every built-in backend
    let http: Arc<dyn HttpClient> = Arc::new(ScriptedHttpClient::new());

    for id in ProviderId::BUILTIN {
        let descriptor = ProviderDescriptor::new(id.clone()).with_api_key("key");

        // When: the adapter is built
        let adapter = build_adapter(&descriptor, http.clone(), 2_000)
            .expect("known backend")
            .expect("key present");

        // Then: the adapter reports the descriptor's name and serves quotes
        assert_eq!(adapter.id(), id);
        assert!(adapter.capabilities().contains(Capability::Quote));
    }
}
