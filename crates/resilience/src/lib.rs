//! Failure isolation for calls to downstream services.
//!
//! - [`CircuitBreaker`] per target, bundled as [`Breakers`]
//! - [`guarded`] runs a call through a breaker with a step timeout
//! - [`retry`] bounded retry with exponential backoff

pub mod breaker;
pub mod guard;
pub mod retry;

pub use breaker::{Breaker, BreakerConfig, BreakerState, Breakers, CircuitBreaker, Counts};
pub use guard::{CallError, guarded, timed};
pub use retry::{Exhausted, RetryPolicy, retry};
