//! # Warmer Options
//!
//! Tuning knobs for the warming engine. Every knob has a production-safe
//! default, so `WarmerOptions::default()` is a complete configuration; hosts
//! usually deserialize these from their own config file and override a field
//! or two.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default refresh period applied when a result carries no freshness of its
/// own (milliseconds).
pub const DEFAULT_WARMUP_INTERVAL_MS: u64 = 60_000;

/// Default number of consecutive failures after which a subscription is
/// dropped.
pub const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 3;

/// Default idle window after which a subscription nobody re-requested is
/// dropped (milliseconds).
pub const DEFAULT_SUBSCRIPTION_TTL_MS: u64 = 600_000;

/// Default ring size of the observer event tap.
pub const DEFAULT_EVENT_TAP_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// # Warmer Options
///
/// Recognized tuning options for the warming engine. Unknown keys in a
/// host's config are ignored; missing keys fall back to the defaults above.
pub struct WarmerOptions {
    /// Default refresh period, in milliseconds, for subscriptions whose
    /// originating result did not carry its own freshness window.
    #[serde(rename = "warmupInterval")]
    pub warmup_interval_ms: u64,

    /// Consecutive-failure count at which a subscription is considered
    /// unhealthy and evicted.
    pub unhealthy_threshold: u32,

    /// Idle duration, in milliseconds, after which a subscription that no
    /// request has renewed is dropped.
    #[serde(rename = "subscriptionTTL")]
    pub subscription_ttl_ms: u64,

    /// Ring size of the broadcast tap observers read lifecycle events from.
    /// Slow observers skip old events rather than slow the engine down.
    pub event_tap_capacity: usize,
}

impl Default for WarmerOptions {
    fn default() -> Self {
        Self {
            warmup_interval_ms: DEFAULT_WARMUP_INTERVAL_MS,
            unhealthy_threshold: DEFAULT_UNHEALTHY_THRESHOLD,
            subscription_ttl_ms: DEFAULT_SUBSCRIPTION_TTL_MS,
            event_tap_capacity: DEFAULT_EVENT_TAP_CAPACITY,
        }
    }
}

impl WarmerOptions {
    /// The default refresh period as a [`Duration`].
    pub fn warmup_interval(&self) -> Duration {
        Duration::from_millis(self.warmup_interval_ms)
    }

    /// The subscription idle window as a [`Duration`].
    pub fn subscription_ttl(&self) -> Duration {
        Duration::from_millis(self.subscription_ttl_ms)
    }

    /// Clamps degenerate values to workable minimums.
    ///
    /// A zero interval cannot drive a repeating timer and a zero threshold
    /// would evict on the first failure ever, so the engine normalizes its
    /// options once at startup instead of checking at every use site.
    pub fn normalized(mut self) -> Self {
        self.warmup_interval_ms = self.warmup_interval_ms.max(1);
        self.unhealthy_threshold = self.unhealthy_threshold.max(1);
        self.subscription_ttl_ms = self.subscription_ttl_ms.max(1);
        self.event_tap_capacity = self.event_tap_capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_constants() {
        let options = WarmerOptions::default();
        assert_eq!(options.warmup_interval_ms, 60_000);
        assert_eq!(options.unhealthy_threshold, 3);
        assert_eq!(options.subscription_ttl_ms, 600_000);
        assert_eq!(options.warmup_interval(), Duration::from_secs(60));
        assert_eq!(options.subscription_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn deserializes_from_camel_case_keys() {
        // 1. A host config overriding two knobs.
        let parsed: WarmerOptions = serde_json::from_str(
            r#"{ "warmupInterval": 5000, "subscriptionTTL": 30000 }"#,
        )
        .unwrap();

        // 2. Overridden knobs are taken, the rest keep their defaults.
        assert_eq!(parsed.warmup_interval_ms, 5_000);
        assert_eq!(parsed.subscription_ttl_ms, 30_000);
        assert_eq!(parsed.unhealthy_threshold, DEFAULT_UNHEALTHY_THRESHOLD);
        assert_eq!(parsed.event_tap_capacity, DEFAULT_EVENT_TAP_CAPACITY);
    }

    #[test]
    fn normalized_rejects_zero_values() {
        let options = WarmerOptions {
            warmup_interval_ms: 0,
            unhealthy_threshold: 0,
            subscription_ttl_ms: 0,
            event_tap_capacity: 0,
        }
        .normalized();

        assert_eq!(options.warmup_interval_ms, 1);
        assert_eq!(options.unhealthy_threshold, 1);
        assert_eq!(options.subscription_ttl_ms, 1);
        assert_eq!(options.event_tap_capacity, 1);
    }
}
