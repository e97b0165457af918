//! # Tickrelay Core
//!
//! Provider fallback and caching layer for market data.
//!
//! ## Overview
//!
//! Several interchangeable market-data backends sit behind one [`DataSource`] contract.
//! The [`SourceRouter`] tries them in priority order, benches a backend that reports a
//! rate limit for a cooldown window, and returns the first successful answer. A
//! [`CachedRouter`] in front of it serves repeated requests from a TTL cache, and the
//! [`HealthAggregator`] probes every backend concurrently.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | HTTP backends (Yahoo, Alpha Vantage, Finnhub, Twelve Data, Polygon) |
//! | [`cache`] | TTL cache and the caching router |
//! | [`clock`] | Wall clock abstraction for cooldowns and expiry |
//! | [`config`] | Layered configuration and backend descriptors |
//! | [`cooldown`] | Per-backend cooldown windows |
//! | [`data_source`] | Adapter trait, capabilities and adapter errors |
//! | [`domain`] | Quote, bar and fundamentals models |
//! | [`error`] | Validation and configuration errors |
//! | [`health`] | Concurrent health probing |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`metrics`] | Per-backend call counters and latency |
//! | [`provider_policy`] | Published request budgets per backend |
//! | [`routing`] | Priority-ordered fallback orchestration |
//! | [`source`] | Backend identifiers |
//! | [`throttling`] | Local request budget enforcement |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tickrelay_core::{CachedRouter, ReqwestHttpClient, RelayConfig, SourceRouterBuilder, Symbol};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::load(None)?;
//!     let http_client = Arc::new(ReqwestHttpClient::new());
//!     let router = SourceRouterBuilder::from_config(&config, http_client)?.build();
//!     let relay = CachedRouter::new(router, config.cache);
//!
//!     let quote = relay.quote(Symbol::parse("AAPL")?).await?;
//!     println!("{} {:.2} via {}", quote.symbol, quote.price, quote.provider);
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Adapters report [`SourceError`]; the router decides what each kind means:
//!
//! ```rust
//! use tickrelay_core::{SourceError, SourceErrorKind};
//!
//! fn next_step(error: &SourceError) -> &'static str {
//!     match error.kind() {
//!         SourceErrorKind::RateLimited => "cool down and try the next backend",
//!         SourceErrorKind::SymbolNotFound => "report to the caller",
//!         _ => "try the next backend",
//!     }
//! }
//! # assert_eq!(next_step(&SourceError::rate_limited(None)), "cool down and try the next backend");
//! ```
//!
//! API keys never appear in logs; key-bearing query parameters are masked.

pub mod adapters;
pub mod cache;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod health;
pub mod http_client;
pub mod metrics;
pub mod provider_policy;
pub mod routing;
pub mod source;
pub mod throttling;

// Adapter implementations
pub use adapters::{
    build_adapter, AlphaVantageAdapter, FinnhubAdapter, PolygonAdapter, TwelveDataAdapter,
    YahooAdapter,
};

// Caching
pub use cache::{
    CacheKey, CacheMode, CacheStats, CacheStore, CacheTtl, CachedRouter, DataType,
    DEFAULT_MAX_ENTRIES, MAX_TTL_SECS,
};

// Time and cooldowns
pub use clock::{Clock, ManualClock, SystemClock};
pub use cooldown::{CooldownTracker, MAX_COOLDOWN};

// Configuration
pub use config::{ProviderDescriptor, RelayConfig};

// Data source trait and types
pub use data_source::{
    Capability, CapabilitySet, DataSource, HistoricalRequest, QuoteBatch, QuoteMap, SourceError,
    SourceErrorKind, SourceFuture, HEALTH_PROBE_SYMBOL,
};

// Domain models
pub use domain::{
    BarSeries, FundamentalMetrics, Fundamentals, HistoricalBar, Interval, Period, Quote,
    QuoteDetails, Symbol, UtcDateTime,
};

// Error types
pub use error::{ConfigError, ValidationError};

// Health
pub use health::{HealthAggregator, HealthEntry, HealthReport, HealthStatus};

// HTTP client types
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};

// Provider metrics
pub use metrics::{MetricsRegistry, ProviderMetrics, LATENCY_WINDOW};

pub use provider_policy::ProviderPolicy;

// Routing types
pub use routing::{
    MarketData, RegisteredSource, RouteError, RouteFuture, SourceRouter, SourceRouterBuilder,
    SourceStatus,
};

pub use source::ProviderId;
pub use throttling::ThrottlingQueue;
