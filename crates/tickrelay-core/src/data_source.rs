//! Backend adapter contract and the error vocabulary it speaks.
//!
//! Every external data backend is wrapped by one [`DataSource`] implementation. The
//! adapter declares a fixed [`CapabilitySet`] when it is constructed and translates
//! whatever its backend reports into exactly one [`SourceError`] variant, so the
//! router above it never sees backend-specific failures.
//!
//! # Operations
//!
//! | Method | Capability | Response |
//! |--------|------------|----------|
//! | [`quote`](DataSource::quote) | [`Capability::Quote`] | [`Quote`] |
//! | [`quotes`](DataSource::quotes) | [`Capability::Quote`] | [`QuoteBatch`] (partial allowed) |
//! | [`historical`](DataSource::historical) | [`Capability::Historical`] | [`BarSeries`] |
//! | [`fundamentals`](DataSource::fundamentals) | [`Capability::Fundamentals`] | [`Fundamentals`] |
//! | [`health_check`](DataSource::health_check) | any | `bool` |

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::{BarSeries, Fundamentals, Interval, Period, ProviderId, Quote, Symbol};

/// Symbol used by the default health probe.
pub const HEALTH_PROBE_SYMBOL: &str = "AAPL";

/// Category of data an adapter can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Quote,
    Historical,
    Fundamentals,
    News,
    Crypto,
    Options,
}

impl Capability {
    pub const ALL: [Self; 6] = [
        Self::Quote,
        Self::Historical,
        Self::Fundamentals,
        Self::News,
        Self::Crypto,
        Self::Options,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Historical => "historical",
            Self::Fundamentals => "fundamentals",
            Self::News => "news",
            Self::Crypto => "crypto",
            Self::Options => "options",
        }
    }

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable set of capabilities declared by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet {
    bits: u8,
}

impl CapabilitySet {
    pub const fn new(capabilities: &[Capability]) -> Self {
        let mut bits = 0;
        let mut index = 0;
        while index < capabilities.len() {
            bits |= capabilities[index].bit();
            index += 1;
        }
        Self { bits }
    }

    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    pub const fn contains(self, capability: Capability) -> bool {
        self.bits & capability.bit() != 0
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL
            .into_iter()
            .filter(move |capability| self.contains(*capability))
    }

    pub fn names(self) -> Vec<&'static str> {
        self.iter().map(Capability::as_str).collect()
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.iter())
    }
}

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    RateLimited,
    SymbolNotFound,
    CapabilityUnsupported,
    Provider,
}

/// Error returned by a backend adapter.
///
/// Network, parse and unexpected failures all collapse into [`SourceError::Provider`];
/// the router only branches on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("rate limited{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("symbol '{symbol}' not found")]
    SymbolNotFound { symbol: String },

    #[error("capability '{capability}' is not supported by this source")]
    CapabilityUnsupported { capability: Capability },

    #[error("provider error: {cause}")]
    Provider { cause: String },
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs
        .map(|secs| format!(" (retry after {secs}s)"))
        .unwrap_or_default()
}

impl SourceError {
    pub const fn rate_limited(retry_after_secs: Option<u64>) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    pub fn symbol_not_found(symbol: impl Display) -> Self {
        Self::SymbolNotFound {
            symbol: symbol.to_string(),
        }
    }

    pub const fn unsupported(capability: Capability) -> Self {
        Self::CapabilityUnsupported { capability }
    }

    pub fn provider(cause: impl Into<String>) -> Self {
        Self::Provider {
            cause: cause.into(),
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        match self {
            Self::RateLimited { .. } => SourceErrorKind::RateLimited,
            Self::SymbolNotFound { .. } => SourceErrorKind::SymbolNotFound,
            Self::CapabilityUnsupported { .. } => SourceErrorKind::CapabilityUnsupported,
            Self::Provider { .. } => SourceErrorKind::Provider,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "source.rate_limited",
            Self::SymbolNotFound { .. } => "source.symbol_not_found",
            Self::CapabilityUnsupported { .. } => "source.capability_unsupported",
            Self::Provider { .. } => "source.provider_error",
        }
    }

    /// Whether another backend, or the same one later, may succeed.
    pub const fn retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Provider { .. })
    }

    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Parameters for a historical bar request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoricalRequest {
    pub symbol: Symbol,
    pub period: Period,
    pub interval: Interval,
}

impl HistoricalRequest {
    pub fn new(symbol: Symbol, period: Period, interval: Interval) -> Self {
        Self {
            symbol,
            period,
            interval,
        }
    }
}

/// Batch quote result keyed by normalized symbol. Missing keys mean "not resolvable".
pub type QuoteMap = BTreeMap<Symbol, Quote>;

/// Answer to one batch quote call.
///
/// A backend that hits a rate limit part-way through a batch still hands back what it
/// resolved before that point, together with the rate limit it stopped at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuoteBatch {
    pub quotes: QuoteMap,
    /// The [`SourceError::RateLimited`] that cut the batch short, if any.
    pub interrupted_by: Option<SourceError>,
}

impl QuoteBatch {
    pub fn complete(quotes: QuoteMap) -> Self {
        Self {
            quotes,
            interrupted_by: None,
        }
    }

    pub fn interrupted(quotes: QuoteMap, error: SourceError) -> Self {
        Self {
            quotes,
            interrupted_by: Some(error),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.interrupted_by.is_none()
    }
}

/// Boxed future returned by every adapter operation.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Source adapter contract.
///
/// Only [`id`](DataSource::id) and [`capabilities`](DataSource::capabilities) are required.
/// Operations the backend does not serve keep their default body, which fails with
/// [`SourceError::CapabilityUnsupported`]; callers filter on the declared capability set
/// first, so that default should only surface on misuse.
///
/// Implementations must be `Send + Sync` as one adapter is shared by all in-flight requests.
pub trait DataSource: Send + Sync {
    /// Returns the unique backend name.
    fn id(&self) -> ProviderId;

    /// Returns the capability set fixed at construction.
    fn capabilities(&self) -> CapabilitySet;

    fn quote<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Quote> {
        let _ = symbol;
        Box::pin(async { Err(SourceError::unsupported(Capability::Quote)) })
    }

    /// Fetches quotes for several symbols.
    ///
    /// Symbols the backend cannot resolve are left out of the map. The default body
    /// calls [`quote`](DataSource::quote) once per symbol and stops at the first rate
    /// limit. With nothing resolved yet the rate limit is the error; otherwise the
    /// partial batch carries it in [`QuoteBatch::interrupted_by`].
    fn quotes<'a>(&'a self, symbols: Vec<Symbol>) -> SourceFuture<'a, QuoteBatch> {
        Box::pin(async move {
            if !self.capabilities().contains(Capability::Quote) {
                return Err(SourceError::unsupported(Capability::Quote));
            }

            let mut resolved = QuoteMap::new();
            for symbol in symbols {
                match self.quote(symbol.clone()).await {
                    Ok(quote) => {
                        resolved.insert(symbol, quote);
                    }
                    Err(error @ SourceError::RateLimited { .. }) => {
                        if resolved.is_empty() {
                            return Err(error);
                        }
                        return Ok(QuoteBatch::interrupted(resolved, error));
                    }
                    Err(error) => {
                        tracing::debug!(provider = %self.id(), %symbol, %error, "symbol left unresolved");
                    }
                }
            }
            Ok(QuoteBatch::complete(resolved))
        })
    }

    fn historical<'a>(&'a self, req: HistoricalRequest) -> SourceFuture<'a, BarSeries> {
        let _ = req;
        Box::pin(async { Err(SourceError::unsupported(Capability::Historical)) })
    }

    fn fundamentals<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Fundamentals> {
        let _ = symbol;
        Box::pin(async { Err(SourceError::unsupported(Capability::Fundamentals)) })
    }

    /// Probes the backend.
    ///
    /// The default fetches a quote for [`HEALTH_PROBE_SYMBOL`]. A rate limit is returned as
    /// an error so the caller can decide how to report it.
    fn health_check<'a>(&'a self) -> SourceFuture<'a, bool> {
        Box::pin(async move {
            let probe = Symbol::parse(HEALTH_PROBE_SYMBOL)
                .map_err(|error| SourceError::provider(error.to_string()))?;
            match self.quote(probe).await {
                Ok(_) => Ok(true),
                Err(SourceError::SymbolNotFound { .. }) => Ok(false),
                Err(error) => Err(error),
            }
        })
    }
}
