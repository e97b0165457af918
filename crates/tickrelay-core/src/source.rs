use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ValidationError;

/// Backend name used for priority ordering, cooldown bookkeeping and result attribution.
///
/// Well-known backends are `'static` constants; names read from configuration or
/// built by tests are owned.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProviderId(Cow<'static, str>);

impl ProviderId {
    pub const YAHOO: Self = Self(Cow::Borrowed("yahoo"));
    pub const POLYGON: Self = Self(Cow::Borrowed("polygon"));
    pub const ALPHAVANTAGE: Self = Self(Cow::Borrowed("alphavantage"));
    pub const FINNHUB: Self = Self(Cow::Borrowed("finnhub"));
    pub const TWELVEDATA: Self = Self(Cow::Borrowed("twelvedata"));

    pub const BUILTIN: [Self; 5] = [
        Self::YAHOO,
        Self::POLYGON,
        Self::ALPHAVANTAGE,
        Self::FINNHUB,
        Self::TWELVEDATA,
    ];

    /// Builds an id from an arbitrary backend name, lowercased and trimmed.
    pub fn new(name: impl AsRef<str>) -> Self {
        let normalized = name.as_ref().trim().to_ascii_lowercase();
        match Self::BUILTIN.iter().find(|id| id.as_str() == normalized) {
            Some(id) => id.clone(),
            None => Self(Cow::Owned(normalized)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_builtin(&self) -> bool {
        Self::BUILTIN.contains(self)
    }

    /// Priority used when configuration does not set one. Lower is tried first.
    pub fn default_priority(&self) -> i32 {
        match self.as_str() {
            "yahoo" => 0,
            "polygon" => 5,
            "alphavantage" => 10,
            "finnhub" => 15,
            "twelvedata" => 20,
            _ => 100,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        self.is_builtin() && *self != Self::YAHOO
    }

    /// Environment variable consulted for this backend's key, e.g. `FINNHUB_API_KEY`.
    pub fn api_key_env(&self) -> String {
        format!("{}_API_KEY", self.as_str().to_ascii_uppercase())
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Err(ValidationError::EmptyProviderName);
        }
        Ok(Self::new(value))
    }
}

impl Serialize for ProviderId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProviderId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
