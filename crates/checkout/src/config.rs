//! Checkout configuration loaded from environment variables.

use std::time::Duration;

use resilience::{BreakerConfig, RetryPolicy};

/// Timeouts, breaker tuning, compensation retry and sweeper cadence.
///
/// Reads from environment variables (defaults in parentheses):
/// - `CHECKOUT_INVENTORY_TIMEOUT_SECS` (5), `CHECKOUT_ORDER_TIMEOUT_SECS` (5),
///   `CHECKOUT_PAYMENT_TIMEOUT_SECS` (15)
/// - `CHECKOUT_SESSION_TTL_SECS` (900)
/// - `BREAKER_MAX_HALF_OPEN_REQUESTS` (1), `BREAKER_INTERVAL_SECS` (60),
///   `BREAKER_COOLDOWN_SECS` (30), `BREAKER_FAILURE_RATIO` (0.5),
///   `BREAKER_MIN_REQUESTS` (5)
/// - `COMPENSATION_MAX_ATTEMPTS` (3), `COMPENSATION_BACKOFF_MS` (200)
/// - `SWEEPER_INTERVAL_SECS` (30), `SWEEPER_BATCH_SIZE` (100)
/// - `EVENT_PUBLISH_MAX_ATTEMPTS` (3)
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutConfig {
    pub inventory_timeout: Duration,
    pub order_timeout: Duration,
    pub payment_timeout: Duration,
    pub session_ttl: chrono::Duration,
    pub breaker: BreakerConfig,
    pub compensation: RetryPolicy,
    pub sweeper_interval: Duration,
    pub sweeper_batch_size: usize,
    pub event_publish_max_attempts: u32,
}

impl CheckoutConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let secs = |key: &str, default: Duration| parse(key).map(Duration::from_secs).unwrap_or(default);

        let breaker = BreakerConfig {
            max_half_open_requests: parse("BREAKER_MAX_HALF_OPEN_REQUESTS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.breaker.max_half_open_requests),
            interval: secs("BREAKER_INTERVAL_SECS", defaults.breaker.interval),
            cooldown: secs("BREAKER_COOLDOWN_SECS", defaults.breaker.cooldown),
            failure_ratio: lookup("BREAKER_FAILURE_RATIO")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|r| (0.0..=1.0).contains(r))
                .unwrap_or(defaults.breaker.failure_ratio),
            min_requests: parse("BREAKER_MIN_REQUESTS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.breaker.min_requests),
        };

        let compensation = RetryPolicy::new(
            parse("COMPENSATION_MAX_ATTEMPTS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.compensation.max_attempts),
            parse("COMPENSATION_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.compensation.initial_backoff),
        );

        Self {
            inventory_timeout: secs("CHECKOUT_INVENTORY_TIMEOUT_SECS", defaults.inventory_timeout),
            order_timeout: secs("CHECKOUT_ORDER_TIMEOUT_SECS", defaults.order_timeout),
            payment_timeout: secs("CHECKOUT_PAYMENT_TIMEOUT_SECS", defaults.payment_timeout),
            session_ttl: parse("CHECKOUT_SESSION_TTL_SECS")
                .and_then(|v| i64::try_from(v).ok())
                .map(chrono::Duration::seconds)
                .unwrap_or(defaults.session_ttl),
            breaker,
            compensation,
            sweeper_interval: secs("SWEEPER_INTERVAL_SECS", defaults.sweeper_interval),
            sweeper_batch_size: parse("SWEEPER_BATCH_SIZE")
                .and_then(|v| usize::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.sweeper_batch_size),
            event_publish_max_attempts: parse("EVENT_PUBLISH_MAX_ATTEMPTS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.event_publish_max_attempts),
        }
    }

    /// Retry policy for event publication.
    pub fn publish_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.event_publish_max_attempts, Duration::from_millis(100))
    }
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            inventory_timeout: Duration::from_secs(5),
            order_timeout: Duration::from_secs(5),
            payment_timeout: Duration::from_secs(15),
            session_ttl: chrono::Duration::seconds(900),
            breaker: BreakerConfig::default(),
            compensation: RetryPolicy::new(3, Duration::from_millis(200)),
            sweeper_interval: Duration::from_secs(30),
            sweeper_batch_size: 100,
            event_publish_max_attempts: 3,
        }
    }
}
