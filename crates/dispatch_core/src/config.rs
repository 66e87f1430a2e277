//! Runtime configuration. Every tunable has a default and an environment
//! override, read once at startup.

use std::time::Duration;

/// Fare parameters used for the quote-time estimate.
#[derive(Debug, Clone, Copy)]
pub struct FareConfig {
    pub base: f64,
    pub per_km: f64,
    pub per_minute: f64,
}

impl Default for FareConfig {
    fn default() -> Self {
        Self {
            base: 2.50,
            per_km: 1.50,
            per_minute: 0.30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Deadline for a driver to answer an offer.
    pub offer_ttl: Duration,
    /// Slack added to the offer fast-lookup entry beyond the offer deadline.
    pub offer_entry_slack: Duration,
    /// Maximum matching attempts before a request is exhausted.
    pub max_attempts: u32,
    /// Default nearest-neighbor search radius in kilometers.
    pub default_radius_km: f64,
    /// Presence marker lifetime; a driver missing heartbeats this long drops
    /// out of matching.
    pub presence_ttl: Duration,
    /// Surge cache entry lifetime.
    pub surge_cache_ttl: Duration,
    /// Demand counter window.
    pub demand_counter_ttl: Duration,
    /// Idempotency record lifetime.
    pub idempotency_ttl: Duration,
    /// Request-level expiry set at intake.
    pub request_expiry: Duration,
    /// Per-ride lock lifetime.
    pub lock_ttl: Duration,
    pub surge_min: f64,
    pub surge_max: f64,
    /// Smoothing constant applied to the raw demand/supply ratio.
    pub surge_smoothing: f64,
    /// Radius used when counting supply for a surge cell.
    pub surge_supply_radius_km: f64,
    /// Candidate list size per matching attempt.
    pub match_candidate_limit: usize,
    pub fare: FareConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            offer_ttl: Duration::from_secs(15),
            offer_entry_slack: Duration::from_secs(5),
            max_attempts: 5,
            default_radius_km: 5.0,
            presence_ttl: Duration::from_secs(30),
            surge_cache_ttl: Duration::from_secs(60),
            demand_counter_ttl: Duration::from_secs(300),
            idempotency_ttl: Duration::from_secs(86_400),
            request_expiry: Duration::from_secs(300),
            lock_ttl: Duration::from_secs(5),
            surge_min: 1.0,
            surge_max: 3.0,
            surge_smoothing: 0.5,
            surge_supply_radius_km: 2.0,
            match_candidate_limit: 10,
            fare: FareConfig::default(),
        }
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

impl DispatchConfig {
    /// Build a config from the environment, falling back to defaults for
    /// missing or unparseable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            offer_ttl: env_secs("OFFER_TTL", defaults.offer_ttl),
            offer_entry_slack: defaults.offer_entry_slack,
            max_attempts: env_u32("MAX_ATTEMPTS", defaults.max_attempts),
            default_radius_km: env_f64("DEFAULT_RADIUS_KM", defaults.default_radius_km),
            presence_ttl: env_secs("PRESENCE_TTL", defaults.presence_ttl),
            surge_cache_ttl: env_secs("SURGE_CACHE_TTL", defaults.surge_cache_ttl),
            demand_counter_ttl: env_secs("DEMAND_COUNTER_TTL", defaults.demand_counter_ttl),
            idempotency_ttl: env_secs("IDEMPOTENCY_TTL", defaults.idempotency_ttl),
            request_expiry: env_secs("REQUEST_EXPIRY", defaults.request_expiry),
            lock_ttl: defaults.lock_ttl,
            surge_min: env_f64("SURGE_MIN", defaults.surge_min),
            surge_max: env_f64("SURGE_MAX", defaults.surge_max),
            surge_smoothing: env_f64("SURGE_SMOOTHING", defaults.surge_smoothing),
            surge_supply_radius_km: defaults.surge_supply_radius_km,
            match_candidate_limit: defaults.match_candidate_limit,
            fare: FareConfig {
                base: env_f64("FARE_BASE", defaults.fare.base),
                per_km: env_f64("FARE_PER_KM", defaults.fare.per_km),
                per_minute: env_f64("FARE_PER_MINUTE", defaults.fare.per_minute),
            },
        }
    }

    /// The fast-lookup entry outlives the offer deadline by the slack window.
    pub fn offer_entry_ttl(&self) -> Duration {
        self.offer_ttl + self.offer_entry_slack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = DispatchConfig::default();
        assert_eq!(config.offer_ttl, Duration::from_secs(15));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.presence_ttl, Duration::from_secs(30));
        assert_eq!(config.surge_cache_ttl, Duration::from_secs(60));
        assert_eq!(config.demand_counter_ttl, Duration::from_secs(300));
        assert_eq!(config.idempotency_ttl, Duration::from_secs(86_400));
        assert_eq!(config.surge_min, 1.0);
        assert_eq!(config.surge_max, 3.0);
        assert_eq!(config.surge_smoothing, 0.5);
        assert_eq!(config.offer_entry_ttl(), Duration::from_secs(20));
    }
}
