use thiserror::Error;

/// Validation errors raised while constructing domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid interval '{value}', expected one of 1m, 5m, 15m, 30m, 1h, 1d, 1wk, 1mo")]
    InvalidInterval { value: String },
    #[error("invalid period '{value}', expected one of 1d, 5d, 1mo, 3mo, 6mo, 1y, 2y, 5y, ytd, max")]
    InvalidPeriod { value: String },
    #[error("provider name cannot be empty")]
    EmptyProviderName,

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },

    #[error("bar high must be >= low")]
    InvalidBarRange,

    #[error("cache ttl for '{field}' must be greater than zero")]
    ZeroTtl { field: &'static str },
    #[error("'{field}' must be greater than zero")]
    ZeroValue { field: &'static str },
    #[error("'{field}' must be at most {max}")]
    TooLarge { field: &'static str, max: u64 },
}

/// Errors raised while loading relay configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error("unknown provider '{name}' in configuration")]
    UnknownProvider { name: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
