use thiserror::Error;
use tickrelay_core::{RouteError, SourceError};

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] tickrelay_core::ValidationError),

    #[error(transparent)]
    Config(#[from] tickrelay_core::ConfigError),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("data temporarily unavailable ({capability})")]
    Unavailable { capability: String },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<RouteError> for CliError {
    fn from(error: RouteError) -> Self {
        if let RouteError::AllProvidersExhausted {
            last_error: Some(SourceError::SymbolNotFound { symbol }),
            ..
        } = &error
        {
            return Self::SymbolNotFound {
                symbol: symbol.clone(),
            };
        }
        Self::Unavailable {
            capability: error.capability().to_string(),
        }
    }
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Config(_) => 2,
            Self::SymbolNotFound { .. } => 3,
            Self::Unavailable { .. } => 4,
            Self::Serialization(_) => 5,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickrelay_core::{Capability, ProviderId};

    #[test]
    fn unknown_symbol_after_exhaustion_is_not_found() {
        let error = CliError::from(RouteError::AllProvidersExhausted {
            capability: Capability::Quote,
            attempted: vec![ProviderId::YAHOO],
            last_error: Some(SourceError::symbol_not_found("ZZZZ")),
        });

        assert_eq!(error.to_string(), "symbol not found: ZZZZ");
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn exhaustion_and_empty_chain_are_unavailable() {
        let exhausted = CliError::from(RouteError::AllProvidersExhausted {
            capability: Capability::Historical,
            attempted: vec![ProviderId::YAHOO],
            last_error: Some(SourceError::rate_limited(Some(60))),
        });
        assert!(exhausted.to_string().starts_with("data temporarily unavailable"));

        let empty = CliError::from(RouteError::NoProvidersAvailable {
            capability: Capability::Fundamentals,
        });
        assert_eq!(empty.exit_code(), 4);
    }
}
