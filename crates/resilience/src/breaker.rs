//! Circuit breaker state machine.
//!
//! State transitions:
//! ```text
//! Closed ──(failure ratio exceeded)─► Open ──(cooldown elapsed)──► HalfOpen
//!   ▲                                   ▲                             │
//!   └────────────(trial succeeded)──────┼─────────────────────────────┤
//!                                       └──────(trial failed)─────────┘
//! ```
//!
//! Breaker state lives in process memory only and starts `Closed` after a
//! restart.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Tuning knobs shared by every breaker instance.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Trial calls admitted concurrently while half-open.
    pub max_half_open_requests: u32,
    /// Length of the rolling window while closed; counts reset when it elapses.
    pub interval: Duration,
    /// Time spent open before probing.
    pub cooldown: Duration,
    /// Failure ratio (0.0..=1.0) the window must exceed to trip the breaker.
    pub failure_ratio: f64,
    /// Minimum number of requests in the window before the ratio is evaluated.
    pub min_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_half_open_requests: 1,
            interval: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            failure_ratio: 0.5,
            min_requests: 5,
        }
    }
}

/// The observable state of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::HalfOpen => 1.0,
            BreakerState::Open => 2.0,
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome counters for the current window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub successes: u32,
    pub failures: u32,
    pub consecutive_failures: u32,
    /// Calls short-circuited without reaching the downstream.
    pub rejected: u32,
}

/// Admission and outcome interface the orchestrator depends on.
pub trait Breaker: Send + Sync {
    /// Name of the protected downstream target.
    fn name(&self) -> &str;

    /// Returns true if a request may be sent now.
    fn allow(&self) -> bool;

    fn record_success(&self);

    fn record_failure(&self);

    /// Returns the admission of a call that ended without an outcome, such
    /// as one whose future was dropped.
    fn release(&self);

    fn state(&self) -> BreakerState;
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    counts: Counts,
    window_started: Instant,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
}

/// Mutex-protected breaker for one downstream target.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let name = name.into();
        metrics::gauge!("circuit_breaker_state", "target" => name.clone())
            .set(BreakerState::Closed.gauge_value());
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                counts: Counts::default(),
                window_started: Instant::now(),
                opened_at: None,
                half_open_in_flight: 0,
            }),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Returns a copy of the current window counters.
    pub fn counts(&self) -> Counts {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.counts
    }

    /// Applies time-based transitions: window roll-over and cooldown expiry.
    fn refresh(&self, inner: &mut Inner, now: Instant) {
        match inner.state {
            BreakerState::Closed => {
                if now.duration_since(inner.window_started) >= self.config.interval {
                    inner.counts = Counts::default();
                    inner.window_started = now;
                }
            }
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|at| now.duration_since(at) >= self.config.cooldown);
                if cooled {
                    self.transition(inner, BreakerState::HalfOpen, now);
                }
            }
            BreakerState::HalfOpen => {}
        }
    }

    fn should_trip(&self, counts: &Counts) -> bool {
        counts.requests >= self.config.min_requests
            && counts.requests > 0
            && f64::from(counts.failures) / f64::from(counts.requests) > self.config.failure_ratio
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.counts = Counts::default();
        inner.window_started = now;
        inner.half_open_in_flight = 0;
        inner.opened_at = (to == BreakerState::Open).then_some(now);

        metrics::gauge!("circuit_breaker_state", "target" => self.name.clone())
            .set(to.gauge_value());
        metrics::counter!(
            "circuit_breaker_transitions_total",
            "target" => self.name.clone(),
            "to" => to.as_str()
        )
        .increment(1);

        if to == BreakerState::Open {
            tracing::warn!(target_service = %self.name, %from, %to, "circuit breaker opened");
        } else {
            tracing::info!(target_service = %self.name, %from, %to, "circuit breaker state changed");
        }
    }
}

impl Breaker for CircuitBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn allow(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);

        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                inner.counts.rejected += 1;
                false
            }
            BreakerState::HalfOpen => {
                if inner.half_open_in_flight < self.config.max_half_open_requests {
                    inner.half_open_in_flight += 1;
                    true
                } else {
                    inner.counts.rejected += 1;
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);

        match inner.state {
            BreakerState::Closed => {
                inner.counts.requests += 1;
                inner.counts.successes += 1;
                inner.counts.consecutive_failures = 0;
                if self.should_trip(&inner.counts) {
                    self.transition(&mut inner, BreakerState::Open, now);
                }
            }
            BreakerState::HalfOpen => self.transition(&mut inner, BreakerState::Closed, now),
            // Late result of a call admitted before the breaker opened.
            BreakerState::Open => {}
        }
    }

    fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);

        match inner.state {
            BreakerState::Closed => {
                inner.counts.requests += 1;
                inner.counts.failures += 1;
                inner.counts.consecutive_failures += 1;
                if self.should_trip(&inner.counts) {
                    self.transition(&mut inner, BreakerState::Open, now);
                }
            }
            BreakerState::HalfOpen => self.transition(&mut inner, BreakerState::Open, now),
            BreakerState::Open => {}
        }
    }

    fn release(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }
}

/// One breaker per downstream target of the checkout saga.
#[derive(Clone)]
pub struct Breakers {
    pub inventory: Arc<dyn Breaker>,
    pub order: Arc<dyn Breaker>,
    pub payment: Arc<dyn Breaker>,
}

impl Breakers {
    /// Builds independent circuit breakers for every target from one config.
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            inventory: Arc::new(CircuitBreaker::new("inventory", config.clone())),
            order: Arc::new(CircuitBreaker::new("order", config.clone())),
            payment: Arc::new(CircuitBreaker::new("payment", config.clone())),
        }
    }
}

impl Default for Breakers {
    fn default() -> Self {
        Self::new(&BreakerConfig::default())
    }
}

impl std::fmt::Debug for Breakers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Breakers")
            .field("inventory", &self.inventory.state())
            .field("order", &self.order.state())
            .field("payment", &self.payment.state())
            .finish()
    }
}
