//! # Domain Models
//!
//! Read-only value types returned by the relay.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Quote`] | Price snapshot with change figures and originating backend |
//! | [`HistoricalBar`] | OHLCV bar with timestamp |
//! | [`BarSeries`] | Ascending, duplicate-free bars for a symbol/interval |
//! | [`Fundamentals`] | Company fundamentals snapshot |
//! | [`Symbol`] | Normalized ticker |
//! | [`Interval`] / [`Period`] | Bar bucket size and lookback window |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! All constructors validate their inputs; nothing is mutated after construction.

mod interval;
mod models;
mod symbol;
mod timestamp;

pub use interval::{Interval, Period};
pub use models::{
    BarSeries, FundamentalMetrics, Fundamentals, HistoricalBar, Quote, QuoteDetails,
};
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
