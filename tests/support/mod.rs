//! Test doubles shared by the behavior suites.

#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tickrelay_core::{
    BarSeries, Capability, CapabilitySet, DataSource, FundamentalMetrics, Fundamentals,
    HistoricalBar, HistoricalRequest, ManualClock, ProviderId, Quote, QuoteBatch, QuoteDetails,
    QuoteMap, SourceError, SourceFuture, Symbol, UtcDateTime,
};

pub const ALL_CAPABILITIES: [Capability; 3] = [
    Capability::Quote,
    Capability::Historical,
    Capability::Fundamentals,
];

/// What a spy does when called.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Serve data priced at this value.
    Serve(f64),
    Fail(SourceError),
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Quote(Symbol),
    Quotes(Vec<Symbol>),
    Historical(HistoricalRequest),
    Fundamentals(Symbol),
    Health,
}

/// Adapter double that replays scripted outcomes and records every call.
///
/// Scripted outcomes are consumed in order; once they run out the default outcome repeats.
pub struct SpyAdapter {
    id: ProviderId,
    capabilities: CapabilitySet,
    script: Mutex<VecDeque<Outcome>>,
    default: Outcome,
    unknown: BTreeSet<String>,
    extra: Option<Symbol>,
    limit_at: Option<(String, Option<u64>)>,
    health: Result<bool, SourceError>,
    health_delay: Option<Duration>,
    calls: Mutex<Vec<Call>>,
}

impl SpyAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            id: ProviderId::new(name),
            capabilities: CapabilitySet::new(&ALL_CAPABILITIES),
            script: Mutex::new(VecDeque::new()),
            default: Outcome::Serve(100.0),
            unknown: BTreeSet::new(),
            extra: None,
            limit_at: None,
            health: Ok(true),
            health_delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn serving(mut self, capabilities: &[Capability]) -> Self {
        self.capabilities = CapabilitySet::new(capabilities);
        self
    }

    pub fn priced_at(mut self, price: f64) -> Self {
        self.default = Outcome::Serve(price);
        self
    }

    pub fn failing(mut self, error: SourceError) -> Self {
        self.default = Outcome::Fail(error);
        self
    }

    /// Queues an outcome ahead of the default one.
    pub fn then(self, outcome: Outcome) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(outcome);
        self
    }

    /// Symbols this backend reports as unknown.
    pub fn not_knowing(mut self, symbols: &[&str]) -> Self {
        self.unknown = symbols.iter().map(|s| s.to_ascii_uppercase()).collect();
        self
    }

    /// Adds an unrequested symbol to every batch answer.
    pub fn with_extra(mut self, symbol: &str) -> Self {
        self.extra = Some(sym(symbol));
        self
    }

    /// Makes a served batch stop with a rate limit when it reaches `symbol`, the way a
    /// backend that quotes one symbol at a time runs out of budget part-way.
    pub fn rate_limited_at(mut self, symbol: &str, retry_after_secs: Option<u64>) -> Self {
        self.limit_at = Some((symbol.to_ascii_uppercase(), retry_after_secs));
        self
    }

    pub fn health(mut self, outcome: Result<bool, SourceError>) -> Self {
        self.health = outcome;
        self
    }

    pub fn slow_health(mut self, delay: Duration) -> Self {
        self.health_delay = Some(delay);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    fn record(&self, call: Call) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }

    fn next_outcome(&self) -> Outcome {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }

    fn price_for(&self, symbol: &Symbol) -> Result<f64, SourceError> {
        match self.next_outcome() {
            Outcome::Fail(error) => Err(error),
            Outcome::Serve(_) if self.unknown.contains(symbol.as_str()) => {
                Err(SourceError::symbol_not_found(symbol))
            }
            Outcome::Serve(price) => Ok(price),
        }
    }
}

impl SpyAdapter {
    fn serve_batch(&self, symbols: &[Symbol], price: f64) -> Result<QuoteBatch, SourceError> {
        let mut map = QuoteMap::new();
        for symbol in symbols {
            if let Some((limit_at, hint)) = &self.limit_at {
                if symbol.as_str() == limit_at {
                    let error = SourceError::rate_limited(*hint);
                    if map.is_empty() {
                        return Err(error);
                    }
                    return Ok(QuoteBatch::interrupted(map, error));
                }
            }
            if !self.unknown.contains(symbol.as_str()) {
                map.insert(symbol.clone(), quote(symbol, price, &self.id));
            }
        }
        if let Some(extra) = &self.extra {
            map.insert(extra.clone(), quote(extra, price, &self.id));
        }
        Ok(QuoteBatch::complete(map))
    }
}

impl DataSource for SpyAdapter {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn quote<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Quote> {
        self.record(Call::Quote(symbol.clone()));
        let outcome = self
            .price_for(&symbol)
            .map(|price| quote(&symbol, price, &self.id));
        Box::pin(async move { outcome })
    }

    fn quotes<'a>(&'a self, symbols: Vec<Symbol>) -> SourceFuture<'a, QuoteBatch> {
        self.record(Call::Quotes(symbols.clone()));
        let outcome = match self.next_outcome() {
            Outcome::Fail(error) => Err(error),
            Outcome::Serve(price) => self.serve_batch(&symbols, price),
        };
        Box::pin(async move { outcome })
    }

    fn historical<'a>(&'a self, req: HistoricalRequest) -> SourceFuture<'a, BarSeries> {
        self.record(Call::Historical(req.clone()));
        let outcome = self
            .price_for(&req.symbol)
            .map(|price| series(&req, price));
        Box::pin(async move { outcome })
    }

    fn fundamentals<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Fundamentals> {
        self.record(Call::Fundamentals(symbol.clone()));
        let outcome = self.price_for(&symbol).map(|pe| {
            let metrics = FundamentalMetrics {
                pe_ratio: Some(pe),
                ..FundamentalMetrics::default()
            };
            Fundamentals::new(symbol, "Test Corp", self.id.clone(), metrics)
                .expect("valid fundamentals")
        });
        Box::pin(async move { outcome })
    }

    fn health_check<'a>(&'a self) -> SourceFuture<'a, bool> {
        self.record(Call::Health);
        let outcome = self.health.clone();
        let delay = self.health_delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            outcome
        })
    }
}

pub fn sym(raw: &str) -> Symbol {
    Symbol::parse(raw).expect("valid symbol")
}

pub fn quote(symbol: &Symbol, price: f64, provider: &ProviderId) -> Quote {
    Quote::new(
        symbol.clone(),
        price,
        0.0,
        0.0,
        1_000,
        UtcDateTime::from_unix_seconds(1_704_412_800).expect("valid timestamp"),
        provider.clone(),
        QuoteDetails::default(),
    )
    .expect("valid quote")
}

fn series(req: &HistoricalRequest, price: f64) -> BarSeries {
    let ts = UtcDateTime::from_unix_seconds(1_704_412_800).expect("valid timestamp");
    let bar = HistoricalBar::new(ts, price, price, price, price, 10).expect("valid bar");
    BarSeries::new(req.symbol.clone(), req.interval, vec![bar])
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::at_epoch())
}
