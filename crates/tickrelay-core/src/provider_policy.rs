use std::time::Duration;

use crate::ProviderId;

/// Client-side request budget for one backend's free tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    pub quota_window: Duration,
    pub quota_limit: u32,
}

impl ProviderPolicy {
    pub const fn new(provider_id: ProviderId, quota_window: Duration, quota_limit: u32) -> Self {
        Self {
            provider_id,
            quota_window,
            quota_limit,
        }
    }

    pub const fn alphavantage_default() -> Self {
        Self::new(ProviderId::ALPHAVANTAGE, Duration::from_secs(60), 5)
    }

    pub const fn finnhub_default() -> Self {
        Self::new(ProviderId::FINNHUB, Duration::from_secs(60), 60)
    }

    pub const fn twelvedata_default() -> Self {
        Self::new(ProviderId::TWELVEDATA, Duration::from_secs(60), 8)
    }

    pub const fn polygon_default() -> Self {
        Self::new(ProviderId::POLYGON, Duration::from_secs(60), 5)
    }

    /// Yahoo publishes no quota and is left unthrottled.
    pub fn default_for(provider_id: &ProviderId) -> Option<Self> {
        match provider_id.as_str() {
            "alphavantage" => Some(Self::alphavantage_default()),
            "finnhub" => Some(Self::finnhub_default()),
            "twelvedata" => Some(Self::twelvedata_default()),
            "polygon" => Some(Self::polygon_default()),
            _ => None,
        }
    }
}
