//! Priority-ordered fallback across registered backends.
//!
//! The router owns the adapter list, sorted once by `(priority, registration order)`, and
//! the [`CooldownTracker`]. For every request it keeps only adapters that declare the
//! needed capability and are not cooling down, then tries them strictly one after another.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::cooldown::{CooldownTracker, MAX_COOLDOWN};
use crate::data_source::{
    Capability, CapabilitySet, DataSource, HistoricalRequest, QuoteMap, SourceError,
    SourceFuture,
};
use crate::error::ConfigError;
use crate::http_client::HttpClient;
use crate::metrics::{MetricsRegistry, ProviderMetrics};
use crate::{adapters, BarSeries, Fundamentals, ProviderId, Quote, Symbol, UtcDateTime};

/// Cooldown applied when a rate-limited backend does not say how long to wait.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Terminal failure of a routed request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// No registered adapter declares the capability, or all of them are cooling down.
    #[error("no providers available for '{capability}'")]
    NoProvidersAvailable { capability: Capability },

    /// Every eligible adapter was tried and none succeeded.
    #[error("all providers exhausted for '{capability}'{}", last_error_hint(.last_error))]
    AllProvidersExhausted {
        capability: Capability,
        attempted: Vec<ProviderId>,
        last_error: Option<SourceError>,
    },
}

fn last_error_hint(last_error: &Option<SourceError>) -> String {
    last_error
        .as_ref()
        .map(|error| format!(": {error}"))
        .unwrap_or_default()
}

impl RouteError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoProvidersAvailable { .. } => "route.no_providers_available",
            Self::AllProvidersExhausted { .. } => "route.all_providers_exhausted",
        }
    }

    pub const fn capability(&self) -> Capability {
        match self {
            Self::NoProvidersAvailable { capability }
            | Self::AllProvidersExhausted { capability, .. } => *capability,
        }
    }

    /// True when the last backend tried reported the symbol as unknown.
    pub fn is_symbol_not_found(&self) -> bool {
        matches!(
            self,
            Self::AllProvidersExhausted {
                last_error: Some(SourceError::SymbolNotFound { .. }),
                ..
            }
        )
    }
}

/// Boxed future returned by [`MarketData`] operations.
pub type RouteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RouteError>> + Send + 'a>>;

/// Operation surface shared by the router and the cache in front of it.
pub trait MarketData: Send + Sync {
    fn quote<'a>(&'a self, symbol: Symbol) -> RouteFuture<'a, Quote>;

    /// Batch quote. A partial or empty map is a successful result.
    fn quotes<'a>(&'a self, symbols: Vec<Symbol>) -> RouteFuture<'a, QuoteMap>;

    fn historical<'a>(&'a self, req: HistoricalRequest) -> RouteFuture<'a, BarSeries>;

    fn fundamentals<'a>(&'a self, symbol: Symbol) -> RouteFuture<'a, Fundamentals>;
}

/// One adapter in the trial order.
#[derive(Clone)]
pub struct RegisteredSource {
    id: ProviderId,
    priority: i32,
    capabilities: CapabilitySet,
    source: Arc<dyn DataSource>,
}

impl RegisteredSource {
    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    pub const fn priority(&self) -> i32 {
        self.priority
    }

    pub const fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }
}

/// Source snapshot used by the `sources` CLI command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub id: ProviderId,
    pub priority: i32,
    pub capabilities: CapabilitySet,
    pub available: bool,
    pub cooldown_remaining_secs: Option<u64>,
    pub metrics: ProviderMetrics,
}

/// Adapter registry and fallback engine.
pub struct SourceRouter {
    sources: Vec<RegisteredSource>,
    cooldowns: CooldownTracker,
    default_cooldown: Duration,
    metrics: MetricsRegistry,
}

/// Builder for [`SourceRouter`].
///
/// ```rust,ignore
/// let router = SourceRouterBuilder::new()
///     .register(Arc::new(primary), 0)
///     .register(Arc::new(backup), 10)
///     .with_default_cooldown(Duration::from_secs(30))
///     .build();
/// ```
#[derive(Default)]
pub struct SourceRouterBuilder {
    pending: Vec<(Arc<dyn DataSource>, i32)>,
    cooldowns: Option<CooldownTracker>,
    default_cooldown: Option<Duration>,
    metrics: Option<MetricsRegistry>,
}

impl SourceRouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter. Lower priority values are tried first; ties keep
    /// registration order.
    pub fn register(mut self, source: Arc<dyn DataSource>, priority: i32) -> Self {
        self.pending.push((source, priority));
        self
    }

    /// Reads cooldown time from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.cooldowns = Some(CooldownTracker::new(clock));
        self
    }

    /// Shares an existing tracker, e.g. between a router and a status view.
    pub fn with_cooldown_tracker(mut self, cooldowns: CooldownTracker) -> Self {
        self.cooldowns = Some(cooldowns);
        self
    }

    pub fn with_default_cooldown(mut self, duration: Duration) -> Self {
        self.default_cooldown = Some(duration);
        self
    }

    /// Records call outcomes into an existing registry.
    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Registers one adapter per enabled descriptor in `config`.
    ///
    /// Disabled descriptors are never registered. Keyed backends without a key are
    /// skipped with a warning.
    pub fn from_config(
        config: &RelayConfig,
        http_client: Arc<dyn HttpClient>,
    ) -> Result<Self, ConfigError> {
        let mut builder =
            Self::new().with_default_cooldown(Duration::from_secs(config.default_cooldown_secs));

        for descriptor in &config.providers {
            if !descriptor.enabled {
                debug!(provider = %descriptor.name, "provider disabled; not registering");
                continue;
            }

            match adapters::build_adapter(descriptor, http_client.clone(), config.request_timeout_ms)? {
                Some(source) => builder = builder.register(source, descriptor.priority),
                None => warn!(
                    provider = %descriptor.name,
                    "provider enabled without an api key; not registering"
                ),
            }
        }

        Ok(builder)
    }

    pub fn build(self) -> SourceRouter {
        let mut seen = HashSet::new();
        let mut sources = Vec::with_capacity(self.pending.len());

        for (source, priority) in self.pending {
            let id = source.id();
            if !seen.insert(id.clone()) {
                warn!(provider = %id, "duplicate provider registration ignored");
                continue;
            }
            sources.push(RegisteredSource {
                capabilities: source.capabilities(),
                id,
                priority,
                source,
            });
        }

        // stable: equal priorities keep registration order
        sources.sort_by_key(|entry| entry.priority);

        SourceRouter {
            sources,
            cooldowns: self.cooldowns.unwrap_or_default(),
            default_cooldown: self.default_cooldown.unwrap_or(DEFAULT_COOLDOWN),
            metrics: self.metrics.unwrap_or_default(),
        }
    }
}

impl SourceRouter {
    pub fn builder() -> SourceRouterBuilder {
        SourceRouterBuilder::new()
    }

    /// Adapters in trial order.
    pub fn sources(&self) -> &[RegisteredSource] {
        &self.sources
    }

    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Ids that would be tried, in order, for a request needing `capability` right now.
    pub fn trial_order(&self, capability: Capability) -> Vec<ProviderId> {
        self.eligible(capability)
            .into_iter()
            .map(|entry| entry.id.clone())
            .collect()
    }

    pub fn status(&self) -> Vec<SourceStatus> {
        self.sources
            .iter()
            .map(|entry| {
                let remaining = self.cooldowns.remaining(&entry.id);
                SourceStatus {
                    id: entry.id.clone(),
                    priority: entry.priority,
                    capabilities: entry.capabilities,
                    available: remaining.is_none(),
                    cooldown_remaining_secs: remaining.map(|left| left.as_secs_f64().ceil() as u64),
                    metrics: self.metrics.snapshot(&entry.id),
                }
            })
            .collect()
    }

    pub async fn route_quote(&self, symbol: Symbol) -> Result<Quote, RouteError> {
        self.route_single(Capability::Quote, move |source| {
            let symbol = symbol.clone();
            Box::pin(async move { source.quote(symbol).await })
        })
        .await
    }

    pub async fn route_historical(&self, req: HistoricalRequest) -> Result<BarSeries, RouteError> {
        self.route_single(Capability::Historical, move |source| {
            let req = req.clone();
            Box::pin(async move { source.historical(req).await })
        })
        .await
    }

    pub async fn route_fundamentals(&self, symbol: Symbol) -> Result<Fundamentals, RouteError> {
        self.route_single(Capability::Fundamentals, move |source| {
            let symbol = symbol.clone();
            Box::pin(async move { source.fundamentals(symbol).await })
        })
        .await
    }

    /// Resolves as many of `symbols` as possible.
    ///
    /// Each adapter is called at most once, with only the symbols still unresolved at that
    /// point. A rate limit puts the adapter in cooldown and the batch moves on; progress
    /// already made is kept, including quotes from a batch the adapter cut short.
    pub async fn route_quotes(&self, symbols: Vec<Symbol>) -> Result<QuoteMap, RouteError> {
        let mut unresolved = dedupe_symbols(symbols);
        let mut resolved = QuoteMap::new();
        if unresolved.is_empty() {
            return Ok(resolved);
        }

        let chain = self.eligible(Capability::Quote);
        if chain.is_empty() {
            warn!(capability = %Capability::Quote, "no providers available for batch");
            return Err(RouteError::NoProvidersAvailable {
                capability: Capability::Quote,
            });
        }

        for entry in chain {
            if unresolved.is_empty() {
                break;
            }

            debug!(provider = %entry.id, requested = unresolved.len(), "trying source for batch");
            let started = Instant::now();
            match entry.source.quotes(unresolved.clone()).await {
                Ok(mut batch) => {
                    // only requested keys are merged; extras from the backend are dropped
                    unresolved.retain(|symbol| match batch.quotes.remove(symbol) {
                        Some(quote) => {
                            resolved.insert(symbol.clone(), quote);
                            false
                        }
                        None => true,
                    });
                    match batch.interrupted_by {
                        Some(error) => self.record_failure(&entry.id, Capability::Quote, &error),
                        None => self.metrics.record_success(&entry.id, started.elapsed()),
                    }
                }
                Err(error) => self.record_failure(&entry.id, Capability::Quote, &error),
            }
        }

        if !unresolved.is_empty() {
            info!(
                resolved = resolved.len(),
                unresolved = unresolved.len(),
                "batch finished with unresolved symbols"
            );
        }

        Ok(resolved)
    }

    async fn route_single<T, F>(&self, capability: Capability, invoke: F) -> Result<T, RouteError>
    where
        T: Send,
        F: Fn(Arc<dyn DataSource>) -> SourceFuture<'static, T> + Send + Sync,
    {
        let chain = self.eligible(capability);
        if chain.is_empty() {
            warn!(%capability, "no providers available");
            return Err(RouteError::NoProvidersAvailable { capability });
        }

        let mut attempted = Vec::with_capacity(chain.len());
        let mut last_error = None;

        for entry in chain {
            attempted.push(entry.id.clone());
            debug!(provider = %entry.id, %capability, "trying source");

            let started = Instant::now();
            match invoke(Arc::clone(&entry.source)).await {
                Ok(data) => {
                    self.metrics.record_success(&entry.id, started.elapsed());
                    if attempted.len() > 1 {
                        info!(
                            provider = %entry.id,
                            %capability,
                            failed_attempts = attempted.len() - 1,
                            "fallback succeeded"
                        );
                    }
                    return Ok(data);
                }
                Err(error) => {
                    self.record_failure(&entry.id, capability, &error);
                    last_error = Some(error);
                }
            }
        }

        Err(RouteError::AllProvidersExhausted {
            capability,
            attempted,
            last_error,
        })
    }

    fn eligible(&self, capability: Capability) -> Vec<&RegisteredSource> {
        let now = self.cooldowns.now();
        self.sources
            .iter()
            .filter(|entry| entry.capabilities.contains(capability))
            .filter(|entry| {
                let available = self.cooldowns.is_available_at(&entry.id, now);
                if !available {
                    debug!(provider = %entry.id, %capability, "skipping source in cooldown");
                }
                available
            })
            .collect()
    }

    fn record_failure(&self, provider: &ProviderId, capability: Capability, error: &SourceError) {
        let at = UtcDateTime::from_any_offset(self.cooldowns.now());
        self.metrics.record_error(provider, error, at);

        match error {
            SourceError::RateLimited { retry_after_secs } => {
                let duration = retry_after_secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.default_cooldown)
                    .min(MAX_COOLDOWN);
                self.cooldowns.mark_cooldown(provider, duration);
                info!(
                    %provider,
                    %capability,
                    cooldown_secs = duration.as_secs(),
                    "provider rate limited; cooling down"
                );
            }
            SourceError::SymbolNotFound { .. } => {
                debug!(%provider, %capability, %error, "symbol not found; trying next source");
            }
            SourceError::CapabilityUnsupported { .. } | SourceError::Provider { .. } => {
                info!(%provider, %capability, %error, "source failed; trying next source");
            }
        }
    }
}

impl MarketData for SourceRouter {
    fn quote<'a>(&'a self, symbol: Symbol) -> RouteFuture<'a, Quote> {
        Box::pin(self.route_quote(symbol))
    }

    fn quotes<'a>(&'a self, symbols: Vec<Symbol>) -> RouteFuture<'a, QuoteMap> {
        Box::pin(self.route_quotes(symbols))
    }

    fn historical<'a>(&'a self, req: HistoricalRequest) -> RouteFuture<'a, BarSeries> {
        Box::pin(self.route_historical(req))
    }

    fn fundamentals<'a>(&'a self, symbol: Symbol) -> RouteFuture<'a, Fundamentals> {
        Box::pin(self.route_fundamentals(symbol))
    }
}

/// Keeps the first occurrence of each symbol, in input order.
pub(crate) fn dedupe_symbols(symbols: Vec<Symbol>) -> Vec<Symbol> {
    let mut seen = HashSet::new();
    symbols
        .into_iter()
        .filter(|symbol| seen.insert(symbol.clone()))
        .collect()
}
