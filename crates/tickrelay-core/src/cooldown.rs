//! Per-backend rate-limit cooldown bookkeeping.
//!
//! A cooldown is a single "unavailable until" timestamp per backend. Entries are never
//! swept; every read compares against the clock, so a lapsed entry reads as available.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use time::OffsetDateTime;

use crate::clock::{Clock, SystemClock};
use crate::ProviderId;

/// Longest window a single mark can start; longer hints are clamped to it.
pub const MAX_COOLDOWN: Duration = Duration::from_secs(86_400);

/// Thread-safe map of backend name to cooldown expiry.
#[derive(Clone)]
pub struct CooldownTracker {
    until: Arc<Mutex<HashMap<ProviderId, OffsetDateTime>>>,
    clock: Arc<dyn Clock>,
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for CooldownTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooldownTracker")
            .field("entries", &self.entries().len())
            .finish()
    }
}

impl CooldownTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            until: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Puts `provider` in cooldown for `duration` from now.
    ///
    /// An existing window that ends later is kept; cooldowns only ever extend. Durations
    /// above [`MAX_COOLDOWN`] are clamped to it.
    pub fn mark_cooldown(&self, provider: &ProviderId, duration: Duration) -> OffsetDateTime {
        let now = self.clock.now();
        let window = time::Duration::try_from(duration.min(MAX_COOLDOWN))
            .unwrap_or(time::Duration::ZERO);
        let candidate = now.saturating_add(window);
        let mut entries = self.entries();
        let until = entries
            .entry(provider.clone())
            .and_modify(|existing| {
                if candidate > *existing {
                    *existing = candidate;
                }
            })
            .or_insert(candidate);
        *until
    }

    /// True iff no record exists or `now >= cooldown-until`.
    pub fn is_available_at(&self, provider: &ProviderId, now: OffsetDateTime) -> bool {
        match self.entries().get(provider) {
            Some(until) => now >= *until,
            None => true,
        }
    }

    pub fn is_available(&self, provider: &ProviderId) -> bool {
        self.is_available_at(provider, self.clock.now())
    }

    /// Time left in the current window, `None` when the backend is available.
    pub fn remaining(&self, provider: &ProviderId) -> Option<Duration> {
        let now = self.clock.now();
        let until = *self.entries().get(provider)?;
        if now >= until {
            return None;
        }
        Duration::try_from(until - now).ok()
    }

    pub fn clear(&self, provider: &ProviderId) {
        self.entries().remove(provider);
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ProviderId, OffsetDateTime>> {
        // entries are independent timestamps, so a poisoned guard is still consistent
        self.until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker() -> (Arc<ManualClock>, CooldownTracker) {
        let clock = Arc::new(ManualClock::at_epoch());
        let tracker = CooldownTracker::new(clock.clone());
        (clock, tracker)
    }

    #[test]
    fn unknown_provider_is_available() {
        let (_, tracker) = tracker();
        assert!(tracker.is_available(&ProviderId::YAHOO));
        assert_eq!(tracker.remaining(&ProviderId::YAHOO), None);
    }

    #[test]
    fn provider_becomes_available_exactly_at_expiry() {
        let (clock, tracker) = tracker();
        tracker.mark_cooldown(&ProviderId::FINNHUB, Duration::from_secs(60));

        clock.advance(Duration::from_secs(59));
        assert!(!tracker.is_available(&ProviderId::FINNHUB));
        assert_eq!(
            tracker.remaining(&ProviderId::FINNHUB),
            Some(Duration::from_secs(1))
        );

        clock.advance(Duration::from_secs(1));
        assert!(tracker.is_available(&ProviderId::FINNHUB));
    }

    #[test]
    fn shorter_mark_never_shrinks_existing_window() {
        let (clock, tracker) = tracker();
        tracker.mark_cooldown(&ProviderId::ALPHAVANTAGE, Duration::from_secs(86_400));
        tracker.mark_cooldown(&ProviderId::ALPHAVANTAGE, Duration::from_secs(60));

        clock.advance(Duration::from_secs(61));
        assert!(!tracker.is_available(&ProviderId::ALPHAVANTAGE));
    }

    #[test]
    fn longer_mark_extends_window() {
        let (clock, tracker) = tracker();
        tracker.mark_cooldown(&ProviderId::POLYGON, Duration::from_secs(10));
        clock.advance(Duration::from_secs(5));
        tracker.mark_cooldown(&ProviderId::POLYGON, Duration::from_secs(30));

        clock.advance(Duration::from_secs(10));
        assert!(!tracker.is_available(&ProviderId::POLYGON));
        clock.advance(Duration::from_secs(20));
        assert!(tracker.is_available(&ProviderId::POLYGON));
    }

    #[test]
    fn zero_duration_leaves_provider_available() {
        let (_, tracker) = tracker();
        tracker.mark_cooldown(&ProviderId::YAHOO, Duration::ZERO);
        assert!(tracker.is_available(&ProviderId::YAHOO));
    }

    #[test]
    fn oversized_duration_is_clamped_to_max_cooldown() {
        let (clock, tracker) = tracker();
        let until =
            tracker.mark_cooldown(&ProviderId::FINNHUB, Duration::from_secs(u64::MAX / 2));

        assert_eq!(until, OffsetDateTime::UNIX_EPOCH + MAX_COOLDOWN);
        assert_eq!(tracker.remaining(&ProviderId::FINNHUB), Some(MAX_COOLDOWN));

        clock.advance(MAX_COOLDOWN);
        assert!(tracker.is_available(&ProviderId::FINNHUB));
    }

    #[test]
    fn explicit_now_is_honored() {
        let (_, tracker) = tracker();
        tracker.mark_cooldown(&ProviderId::TWELVEDATA, Duration::from_secs(60));

        let later = OffsetDateTime::UNIX_EPOCH + Duration::from_secs(60);
        assert!(tracker.is_available_at(&ProviderId::TWELVEDATA, later));
        assert!(!tracker.is_available(&ProviderId::TWELVEDATA));
    }
}
