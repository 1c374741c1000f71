//! Checkout configuration.

use chrono::Duration;
use serde::Deserialize;

/// Tunables for the checkout services.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckoutConfig {
    /// Default hold TTL when the caller does not pass one.
    pub hold_ttl_minutes: i64,
    /// Grace added to the one-shot expiry task, so the scheduled trigger
    /// fires strictly after `expires_at` has passed.
    pub expiry_grace_seconds: i64,
    /// Bounded transaction retry on serialization/deadlock conflicts.
    pub max_tx_attempts: u32,
    /// Batch bound for the periodic sweeps (due holds, waiting webhooks)
    /// and the task worker's claim.
    pub sweep_batch: usize,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            hold_ttl_minutes: 2,
            expiry_grace_seconds: 5,
            max_tx_attempts: 5,
            sweep_batch: 100,
        }
    }
}

impl CheckoutConfig {
    pub fn hold_ttl(&self) -> Duration {
        Duration::minutes(self.hold_ttl_minutes)
    }

    pub fn expiry_grace(&self) -> Duration {
        Duration::seconds(self.expiry_grace_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_flash_sale_tuning() {
        let config = CheckoutConfig::default();
        assert_eq!(config.hold_ttl(), Duration::minutes(2));
        assert_eq!(config.max_tx_attempts, 5);
        assert_eq!(config.sweep_batch, 100);
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: CheckoutConfig = serde_json::from_str(r#"{ "hold_ttl_minutes": 10 }"#).unwrap();
        assert_eq!(config.hold_ttl(), Duration::minutes(10));
        assert_eq!(config.sweep_batch, 100);
    }
}
