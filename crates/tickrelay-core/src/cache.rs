//! Time-bounded memoization in front of the router.
//!
//! Values are stored as JSON bodies keyed by `(data type, symbol, parameters)`. An entry
//! past its expiry is treated as absent and is overwritten by the next successful fetch.
//! Failures are never cached, and any serialization problem skips the cache instead of
//! failing the request.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::data_source::{HistoricalRequest, QuoteMap};
use crate::routing::{dedupe_symbols, MarketData, RouteError, RouteFuture, SourceRouter};
use crate::{BarSeries, Fundamentals, Quote, Symbol, ValidationError};

/// Longest TTL a table entry may carry; `put` clamps to the same bound.
pub const MAX_TTL_SECS: u64 = 30 * 86_400;

/// Entry count at which `put` starts evicting.
pub const DEFAULT_MAX_ENTRIES: usize = 1_000;

/// Defines the behavior of the cache for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Read from the cache if a non-expired entry is present;
    /// otherwise, fetch from the router and write the result to the cache. (Default)
    #[default]
    Use,
    /// Always fetch from the router, bypassing any cached entry,
    /// and write the new result to the cache.
    Refresh,
    /// Always fetch from the router and do not read from or write to the cache.
    Bypass,
}

/// Class of cached data; each class has its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    IntradayQuote,
    Fundamentals,
    IntradayHistorical,
    DailyHistorical,
}

impl DataType {
    const fn prefix(self) -> &'static str {
        match self {
            Self::IntradayQuote => "quote",
            Self::Fundamentals => "fundamentals",
            Self::IntradayHistorical | Self::DailyHistorical => "historical",
        }
    }
}

/// Per-type expiry table, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtl {
    pub intraday_quote_secs: u64,
    pub fundamentals_secs: u64,
    pub intraday_historical_secs: u64,
    pub daily_historical_secs: u64,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            intraday_quote_secs: 60,
            fundamentals_secs: 3_600,
            intraday_historical_secs: 300,
            daily_historical_secs: 86_400,
        }
    }
}

impl CacheTtl {
    /// Rejects zero entries and entries above [`MAX_TTL_SECS`].
    pub fn validate(self) -> Result<Self, ValidationError> {
        let fields = [
            ("intraday_quote_secs", self.intraday_quote_secs),
            ("fundamentals_secs", self.fundamentals_secs),
            ("intraday_historical_secs", self.intraday_historical_secs),
            ("daily_historical_secs", self.daily_historical_secs),
        ];
        for (field, secs) in fields {
            if secs == 0 {
                return Err(ValidationError::ZeroTtl { field });
            }
            if secs > MAX_TTL_SECS {
                return Err(ValidationError::TooLarge {
                    field,
                    max: MAX_TTL_SECS,
                });
            }
        }
        Ok(self)
    }

    pub const fn for_type(&self, data_type: DataType) -> Duration {
        let secs = match data_type {
            DataType::IntradayQuote => self.intraday_quote_secs,
            DataType::Fundamentals => self.fundamentals_secs,
            DataType::IntradayHistorical => self.intraday_historical_secs,
            DataType::DailyHistorical => self.daily_historical_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Cache key; the data type it carries selects the TTL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    data_type: DataType,
    rendered: String,
}

impl CacheKey {
    pub fn quote(symbol: &Symbol) -> Self {
        Self::new(DataType::IntradayQuote, &[symbol.as_str()])
    }

    pub fn fundamentals(symbol: &Symbol) -> Self {
        Self::new(DataType::Fundamentals, &[symbol.as_str()])
    }

    pub fn historical(req: &HistoricalRequest) -> Self {
        let data_type = if req.interval.is_intraday() {
            DataType::IntradayHistorical
        } else {
            DataType::DailyHistorical
        };
        Self::new(
            data_type,
            &[req.symbol.as_str(), req.period.as_str(), req.interval.as_str()],
        )
    }

    fn new(data_type: DataType, parts: &[&str]) -> Self {
        let mut rendered = String::from(data_type.prefix());
        for part in parts {
            rendered.push(':');
            rendered.push_str(part);
        }
        Self {
            data_type,
            rendered,
        }
    }

    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    body: String,
    expires_at: OffsetDateTime,
}

/// Thread-safe entry store holding serialized values.
///
/// The store holds at most `max_entries` entries. Inserting a new key into a full store
/// first drops expired entries, then the entry closest to expiry.
#[derive(Clone)]
pub struct CacheStore {
    entries: Arc<tokio::sync::RwLock<HashMap<String, CacheEntry>>>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl CacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            clock,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub const fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Returns the body stored under `key` unless it has expired.
    pub async fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.body.clone())
    }

    /// Stores `body` until `now + ttl`, replacing whatever was there.
    ///
    /// `ttl` is clamped to [`MAX_TTL_SECS`].
    pub async fn put(&self, key: impl Into<String>, body: String, ttl: Duration) {
        let now = self.clock.now();
        let ttl = time::Duration::try_from(ttl.min(Duration::from_secs(MAX_TTL_SECS)))
            .unwrap_or(time::Duration::ZERO);
        let expires_at = now.saturating_add(ttl);
        let key = key.into();

        let mut entries = self.entries.write().await;
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, entry| now < entry.expires_at);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    debug!(key = %oldest, "cache full; evicting entry closest to expiry");
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(key, CacheEntry { body, expires_at });
    }

    /// Drops expired entries. Reads never need this; it only bounds memory.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of physically retained entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// [`MarketData`] implementation that consults a [`CacheStore`] before the wrapped router.
pub struct CachedRouter<M = SourceRouter> {
    inner: M,
    store: CacheStore,
    ttl: CacheTtl,
    mode: CacheMode,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<M: MarketData> CachedRouter<M> {
    pub fn new(inner: M, ttl: CacheTtl) -> Self {
        Self::with_store(inner, CacheStore::default(), ttl)
    }

    pub fn with_store(inner: M, store: CacheStore, ttl: CacheTtl) -> Self {
        Self {
            inner,
            store,
            ttl,
            mode: CacheMode::Use,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub async fn quote(&self, symbol: Symbol) -> Result<Quote, RouteError> {
        let key = CacheKey::quote(&symbol);
        self.cached(key, self.inner.quote(symbol)).await
    }

    pub async fn historical(&self, req: HistoricalRequest) -> Result<BarSeries, RouteError> {
        let key = CacheKey::historical(&req);
        self.cached(key, self.inner.historical(req)).await
    }

    pub async fn fundamentals(&self, symbol: Symbol) -> Result<Fundamentals, RouteError> {
        let key = CacheKey::fundamentals(&symbol);
        self.cached(key, self.inner.fundamentals(symbol)).await
    }

    /// Serves cached symbols directly and sends only the rest to the router.
    ///
    /// When the router has no provider left for the remainder, the cached part is still
    /// returned.
    pub async fn quotes(&self, symbols: Vec<Symbol>) -> Result<QuoteMap, RouteError> {
        let mut result = QuoteMap::new();
        let mut missing = Vec::new();

        for symbol in dedupe_symbols(symbols) {
            match self.lookup::<Quote>(&CacheKey::quote(&symbol)).await {
                Some(quote) => {
                    result.insert(symbol, quote);
                }
                None => missing.push(symbol),
            }
        }

        if missing.is_empty() {
            return Ok(result);
        }

        match self.inner.quotes(missing).await {
            Ok(fetched) => {
                for (symbol, quote) in fetched {
                    self.store_value(&CacheKey::quote(&symbol), &quote).await;
                    result.insert(symbol, quote);
                }
                Ok(result)
            }
            Err(error @ RouteError::NoProvidersAvailable { .. }) if !result.is_empty() => {
                info!(cached = result.len(), %error, "serving cached subset of batch");
                Ok(result)
            }
            Err(error) => Err(error),
        }
    }

    async fn cached<T, F>(&self, key: CacheKey, fetch: F) -> Result<T, RouteError>
    where
        T: Serialize + DeserializeOwned,
        F: Future<Output = Result<T, RouteError>>,
    {
        if let Some(value) = self.lookup(&key).await {
            return Ok(value);
        }

        let value = fetch.await?;
        self.store_value(&key, &value).await;
        Ok(value)
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        if self.mode != CacheMode::Use {
            return None;
        }

        let Some(body) = self.store.get(key.as_str()).await else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(%key, "cache miss");
            return None;
        };

        match serde_json::from_str(&body) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "cache hit");
                Some(value)
            }
            Err(error) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                warn!(%key, %error, "unreadable cache entry; fetching from router");
                None
            }
        }
    }

    async fn store_value<T: Serialize>(&self, key: &CacheKey, value: &T) {
        if self.mode == CacheMode::Bypass {
            return;
        }

        match serde_json::to_string(value) {
            Ok(body) => {
                let ttl = self.ttl.for_type(key.data_type());
                self.store.put(key.as_str(), body, ttl).await;
            }
            Err(error) => warn!(%key, %error, "failed to serialize value; not caching"),
        }
    }
}

impl<M: MarketData> MarketData for CachedRouter<M> {
    fn quote<'a>(&'a self, symbol: Symbol) -> RouteFuture<'a, Quote> {
        Box::pin(CachedRouter::quote(self, symbol))
    }

    fn quotes<'a>(&'a self, symbols: Vec<Symbol>) -> RouteFuture<'a, QuoteMap> {
        Box::pin(CachedRouter::quotes(self, symbols))
    }

    fn historical<'a>(&'a self, req: HistoricalRequest) -> RouteFuture<'a, BarSeries> {
        Box::pin(CachedRouter::historical(self, req))
    }

    fn fundamentals<'a>(&'a self, symbol: Symbol) -> RouteFuture<'a, Fundamentals> {
        Box::pin(CachedRouter::fundamentals(self, symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::{Interval, Period};

    fn store() -> (Arc<ManualClock>, CacheStore) {
        let clock = Arc::new(ManualClock::at_epoch());
        (clock.clone(), CacheStore::new(clock))
    }

    #[tokio::test]
    async fn test_cache_store_basic_operations() {
        let (_, cache) = store();

        // Cache miss
        assert!(cache.get("key1").await.is_none());

        // Put and get
        cache.put("key1", "value1".to_string(), Duration::from_secs(1)).await;
        assert_eq!(cache.get("key1").await, Some("value1".to_string()));

        // Overwrite
        cache.put("key1", "value2".to_string(), Duration::from_secs(1)).await;
        assert_eq!(cache.get("key1").await, Some("value2".to_string()));
    }

    #[tokio::test]
    async fn test_cache_expiration_is_lazy() {
        let (clock, cache) = store();

        cache.put("key1", "value1".to_string(), Duration::from_secs(60)).await;
        clock.advance(Duration::from_secs(59));
        assert!(cache.get("key1").await.is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get("key1").await.is_none());
        // still physically retained until superseded or purged
        assert_eq!(cache.len().await, 1);

        cache.put("key1", "value2".to_string(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("key1").await, Some("value2".to_string()));
    }

    #[tokio::test]
    async fn test_cache_purge_expired() {
        let (clock, cache) = store();

        cache.put("short", "a".to_string(), Duration::from_secs(10)).await;
        cache.put("long", "b".to_string(), Duration::from_secs(100)).await;
        clock.advance(Duration::from_secs(11));

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_cache_put_clamps_oversized_ttl() {
        let (clock, cache) = store();

        cache.put("forever", "a".to_string(), Duration::MAX).await;
        assert_eq!(cache.get("forever").await, Some("a".to_string()));

        clock.advance(Duration::from_secs(MAX_TTL_SECS));
        assert!(cache.get("forever").await.is_none());
    }

    #[tokio::test]
    async fn test_full_cache_drops_expired_entries_first() {
        let (clock, cache) = store();
        let cache = cache.with_max_entries(2);

        cache.put("stale", "a".to_string(), Duration::from_secs(10)).await;
        cache.put("fresh", "b".to_string(), Duration::from_secs(100)).await;
        clock.advance(Duration::from_secs(11));
        cache.put("new", "c".to_string(), Duration::from_secs(5)).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("fresh").await, Some("b".to_string()));
        assert_eq!(cache.get("new").await, Some("c".to_string()));
    }

    #[tokio::test]
    async fn test_full_cache_evicts_entry_closest_to_expiry() {
        let (_, cache) = store();
        let cache = cache.with_max_entries(2);

        cache.put("soon", "a".to_string(), Duration::from_secs(10)).await;
        cache.put("later", "b".to_string(), Duration::from_secs(100)).await;
        cache.put("newest", "c".to_string(), Duration::from_secs(50)).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("soon").await.is_none());
        assert!(cache.get("later").await.is_some());
        assert!(cache.get("newest").await.is_some());

        // overwriting a present key never evicts
        cache.put("later", "d".to_string(), Duration::from_secs(100)).await;
        assert_eq!(cache.len().await, 2);
        assert!(cache.get("newest").await.is_some());
    }

    #[test]
    fn test_cache_mode_default() {
        let mode: CacheMode = Default::default();
        assert_eq!(mode, CacheMode::Use);
    }

    #[test]
    fn keys_render_type_symbol_and_params() {
        let symbol = Symbol::parse("aapl").expect("valid");
        assert_eq!(CacheKey::quote(&symbol).as_str(), "quote:AAPL");
        assert_eq!(CacheKey::fundamentals(&symbol).as_str(), "fundamentals:AAPL");

        let daily = HistoricalRequest::new(symbol.clone(), Period::OneYear, Interval::OneDay);
        let key = CacheKey::historical(&daily);
        assert_eq!(key.as_str(), "historical:AAPL:1y:1d");
        assert_eq!(key.data_type(), DataType::DailyHistorical);

        let intraday = HistoricalRequest::new(symbol, Period::OneDay, Interval::FiveMinutes);
        assert_eq!(
            CacheKey::historical(&intraday).data_type(),
            DataType::IntradayHistorical
        );
    }

    #[test]
    fn intraday_data_expires_before_fundamentals() {
        let ttl = CacheTtl::default();
        assert!(ttl.for_type(DataType::IntradayQuote) < ttl.for_type(DataType::Fundamentals));
        assert!(
            ttl.for_type(DataType::IntradayHistorical) < ttl.for_type(DataType::DailyHistorical)
        );
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let ttl = CacheTtl {
            fundamentals_secs: 0,
            ..CacheTtl::default()
        };
        assert_eq!(
            ttl.validate(),
            Err(ValidationError::ZeroTtl {
                field: "fundamentals_secs"
            })
        );
    }

    #[test]
    fn oversized_ttl_is_rejected() {
        let ttl = CacheTtl {
            intraday_quote_secs: u64::MAX,
            ..CacheTtl::default()
        };
        assert_eq!(
            ttl.validate(),
            Err(ValidationError::TooLarge {
                field: "intraday_quote_secs",
                max: MAX_TTL_SECS
            })
        );
    }

    #[test]
    fn hit_rate_handles_no_traffic() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        let stats = CacheStats { hits: 3, misses: 1 };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
