use serde::{Deserialize, Serialize};

use crate::{Interval, ProviderId, Symbol, UtcDateTime, ValidationError};

/// Optional quote fields that not every backend reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteDetails {
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub previous_close: Option<f64>,
    pub market_cap: Option<f64>,
    pub name: Option<String>,
}

/// Point-in-time quote snapshot attributed to the backend that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: u64,
    pub as_of: UtcDateTime,
    pub provider: ProviderId,
    #[serde(flatten)]
    pub details: QuoteDetails,
}

impl Quote {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        price: f64,
        change: f64,
        change_percent: f64,
        volume: u64,
        as_of: UtcDateTime,
        provider: ProviderId,
        details: QuoteDetails,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("price", price)?;
        validate_finite("change", change)?;
        validate_finite("change_percent", change_percent)?;
        validate_optional_non_negative("open", details.open)?;
        validate_optional_non_negative("high", details.high)?;
        validate_optional_non_negative("low", details.low)?;
        validate_optional_non_negative("previous_close", details.previous_close)?;
        validate_optional_non_negative("market_cap", details.market_cap)?;

        Ok(Self {
            symbol,
            price,
            change,
            change_percent,
            volume,
            as_of,
            provider,
            details,
        })
    }

    /// Derives change figures from a previous close, for backends that only report prices.
    pub fn change_from(price: f64, previous_close: f64) -> (f64, f64) {
        let change = price - previous_close;
        let percent = if previous_close > 0.0 {
            change / previous_close * 100.0
        } else {
            0.0
        };
        (change, percent)
    }
}

/// OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalBar {
    pub ts: UtcDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl HistoricalBar {
    pub fn new(
        ts: UtcDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("open", open)?;
        validate_non_negative("high", high)?;
        validate_non_negative("low", low)?;
        validate_non_negative("close", close)?;

        if high < low {
            return Err(ValidationError::InvalidBarRange);
        }

        Ok(Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

/// Bars for one symbol and interval, ascending by timestamp with no duplicate timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSeries {
    pub symbol: Symbol,
    pub interval: Interval,
    pub bars: Vec<HistoricalBar>,
}

impl BarSeries {
    /// Sorts the bars and keeps the first bar seen for any repeated timestamp.
    pub fn new(symbol: Symbol, interval: Interval, mut bars: Vec<HistoricalBar>) -> Self {
        // stable sort keeps provider order among equal timestamps
        bars.sort_by_key(|bar| bar.ts);
        bars.dedup_by_key(|bar| bar.ts);
        Self {
            symbol,
            interval,
            bars,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Company fundamentals snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fundamentals {
    pub symbol: Symbol,
    pub name: String,
    pub pe_ratio: Option<f64>,
    pub eps: Option<f64>,
    pub market_cap: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub provider: ProviderId,
}

impl Fundamentals {
    pub fn new(
        symbol: Symbol,
        name: impl Into<String>,
        provider: ProviderId,
        metrics: FundamentalMetrics,
    ) -> Result<Self, ValidationError> {
        validate_optional_finite("pe_ratio", metrics.pe_ratio)?;
        validate_optional_finite("eps", metrics.eps)?;
        validate_optional_non_negative("market_cap", metrics.market_cap)?;
        validate_optional_non_negative("dividend_yield", metrics.dividend_yield)?;
        validate_optional_non_negative("fifty_two_week_high", metrics.fifty_two_week_high)?;
        validate_optional_non_negative("fifty_two_week_low", metrics.fifty_two_week_low)?;

        let name = name.into();
        let name = if name.trim().is_empty() {
            symbol.as_str().to_owned()
        } else {
            name
        };

        Ok(Self {
            name,
            pe_ratio: metrics.pe_ratio,
            eps: metrics.eps,
            market_cap: metrics.market_cap,
            dividend_yield: metrics.dividend_yield,
            fifty_two_week_high: metrics.fifty_two_week_high,
            fifty_two_week_low: metrics.fifty_two_week_low,
            sector: metrics.sector,
            industry: metrics.industry,
            symbol,
            provider,
        })
    }
}

/// Nullable metrics accepted by [`Fundamentals::new`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FundamentalMetrics {
    pub pe_ratio: Option<f64>,
    pub eps: Option<f64>,
    pub market_cap: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
    pub sector: Option<String>,
    pub industry: Option<String>,
}

fn validate_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    Ok(())
}

fn validate_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    validate_finite(field, value)?;
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}

fn validate_optional_finite(
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ValidationError> {
    if let Some(value) = value {
        validate_finite(field, value)?;
    }
    Ok(())
}

fn validate_optional_non_negative(
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ValidationError> {
    if let Some(value) = value {
        validate_non_negative(field, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(input: &str) -> UtcDateTime {
        UtcDateTime::parse(input).expect("valid timestamp")
    }

    fn bar(at: &str, close: f64) -> HistoricalBar {
        HistoricalBar::new(ts(at), close, close + 1.0, close - 1.0, close, 10).expect("valid bar")
    }

    #[test]
    fn quote_rejects_negative_price() {
        let err = Quote::new(
            Symbol::parse("AAPL").expect("valid"),
            -1.0,
            0.0,
            0.0,
            0,
            UtcDateTime::now(),
            ProviderId::YAHOO,
            QuoteDetails::default(),
        )
        .expect_err("must fail");
        assert_eq!(err, ValidationError::NegativeValue { field: "price" });
    }

    #[test]
    fn change_is_derived_from_previous_close() {
        let (change, percent) = Quote::change_from(110.0, 100.0);
        assert!((change - 10.0).abs() < f64::EPSILON);
        assert!((percent - 10.0).abs() < 1e-9);
        assert_eq!(Quote::change_from(5.0, 0.0).1, 0.0);
    }

    #[test]
    fn bar_rejects_inverted_range() {
        let err = HistoricalBar::new(ts("2024-01-01T00:00:00Z"), 1.0, 1.0, 2.0, 1.0, 0)
            .expect_err("must fail");
        assert_eq!(err, ValidationError::InvalidBarRange);
    }

    #[test]
    fn series_is_sorted_and_free_of_duplicate_timestamps() {
        let series = BarSeries::new(
            Symbol::parse("MSFT").expect("valid"),
            Interval::OneDay,
            vec![
                bar("2024-01-03T00:00:00Z", 30.0),
                bar("2024-01-01T00:00:00Z", 10.0),
                bar("2024-01-03T00:00:00Z", 99.0),
                bar("2024-01-02T00:00:00Z", 20.0),
            ],
        );

        let closes = series.bars.iter().map(|bar| bar.close).collect::<Vec<_>>();
        assert_eq!(closes, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn fundamentals_fall_back_to_symbol_for_blank_name() {
        let fundamentals = Fundamentals::new(
            Symbol::parse("IBM").expect("valid"),
            " ",
            ProviderId::ALPHAVANTAGE,
            FundamentalMetrics::default(),
        )
        .expect("valid fundamentals");
        assert_eq!(fundamentals.name, "IBM");
    }
}
