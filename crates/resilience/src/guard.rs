//! Breaker- and timeout-guarded downstream calls.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::breaker::Breaker;

/// Failure of a guarded call.
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The breaker rejected the call; the downstream was never contacted.
    #[error("circuit breaker open for {target}")]
    BreakerOpen { target: String },

    /// The downstream did not answer within the step timeout.
    #[error("{target} did not respond within {after:?}")]
    Timeout { target: String, after: Duration },

    /// The downstream answered with an error.
    #[error("{0}")]
    Inner(E),
}

impl<E> CallError<E> {
    /// True for breaker rejections and timeouts.
    pub fn is_transient(&self) -> bool {
        matches!(self, CallError::BreakerOpen { .. } | CallError::Timeout { .. })
    }

    pub fn map_inner<F, O>(self, f: F) -> CallError<O>
    where
        F: FnOnce(E) -> O,
    {
        match self {
            CallError::BreakerOpen { target } => CallError::BreakerOpen { target },
            CallError::Timeout { target, after } => CallError::Timeout { target, after },
            CallError::Inner(e) => CallError::Inner(f(e)),
        }
    }
}

/// An admitted call. Dropping it before an outcome is recorded hands the
/// admission back to the breaker.
struct Admission<'a> {
    breaker: &'a dyn Breaker,
    settled: bool,
}

impl Admission<'_> {
    fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(target_service = self.breaker.name(), "guarded call abandoned");
            self.breaker.release();
        }
    }
}

/// Runs `fut` through `breaker` with a timeout.
///
/// `counts_as_failure` decides whether an inner error reflects downstream
/// health; business rejections should return false so they do not trip the
/// breaker. If the returned future is dropped mid-call no outcome is recorded
/// and the admission is released.
pub async fn guarded<T, E, F, C>(
    breaker: &dyn Breaker,
    timeout: Duration,
    counts_as_failure: C,
    fut: F,
) -> Result<T, CallError<E>>
where
    F: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
{
    if !breaker.allow() {
        metrics::counter!("circuit_breaker_rejections_total", "target" => breaker.name().to_string())
            .increment(1);
        return Err(CallError::BreakerOpen {
            target: breaker.name().to_string(),
        });
    }
    let admission = Admission {
        breaker,
        settled: false,
    };

    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => {
            admission.success();
            Ok(value)
        }
        Ok(Err(e)) => {
            if counts_as_failure(&e) {
                admission.failure();
            } else {
                admission.success();
            }
            Err(CallError::Inner(e))
        }
        Err(_) => {
            admission.failure();
            tracing::warn!(target_service = breaker.name(), ?timeout, "downstream call timed out");
            Err(CallError::Timeout {
                target: breaker.name().to_string(),
                after: timeout,
            })
        }
    }
}

/// Runs `fut` with a timeout only. Used for compensations, which must reach the
/// downstream even while its breaker is open.
pub async fn timed<T, E, F>(target: &str, timeout: Duration, fut: F) -> Result<T, CallError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(CallError::Inner),
        Err(_) => Err(CallError::Timeout {
            target: target.to_string(),
            after: timeout,
        }),
    }
}
