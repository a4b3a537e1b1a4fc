//! Card processor abstraction.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::Money;
use parking_lot::RwLock;
use thiserror::Error;

use crate::types::Payment;

/// Settled answer from the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    Approved { reference: String },
    Declined { reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl From<GatewayError> for crate::error::PaymentError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Unavailable(msg) => Self::GatewayUnavailable(msg),
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, payment: &Payment) -> Result<GatewayOutcome, GatewayError>;

    /// Returns `amount` of a captured charge. A repeated `idempotency_key`
    /// acknowledges without paying out again.
    async fn refund(
        &self,
        payment: &Payment,
        amount: Money,
        idempotency_key: &str,
    ) -> Result<(), GatewayError>;
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    charges: Vec<Money>,
    refunds: Vec<Money>,
    refund_keys: HashSet<String>,
    next_reference: u32,
    decline_reason: Option<String>,
    unavailable: bool,
    fail_on_refund: bool,
    latency: Option<Duration>,
}

/// In-memory gateway for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines every charge with `reason` until cleared.
    pub fn set_decline(&self, reason: Option<&str>) {
        self.state.write().decline_reason = reason.map(str::to_string);
    }

    /// Fails every call with `Unavailable` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unavailable = unavailable;
    }

    pub fn set_fail_on_refund(&self, fail: bool) {
        self.state.write().fail_on_refund = fail;
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.write().latency = latency;
    }

    /// Charge calls that reached the processor, approved or declined.
    pub fn charge_count(&self) -> usize {
        self.state.read().charges.len()
    }

    /// Refunds actually paid out, repeated keys excluded.
    pub fn refund_count(&self) -> usize {
        self.state.read().refunds.len()
    }

    pub fn refunded_total(&self) -> Money {
        self.state.read().refunds.iter().copied().sum()
    }

    async fn delay(&self) {
        let latency = self.state.read().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    async fn charge(&self, payment: &Payment) -> Result<GatewayOutcome, GatewayError> {
        self.delay().await;
        let mut state = self.state.write();

        if state.unavailable {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }
        state.charges.push(payment.amount);

        if let Some(reason) = &state.decline_reason {
            return Ok(GatewayOutcome::Declined {
                reason: reason.clone(),
            });
        }

        state.next_reference += 1;
        Ok(GatewayOutcome::Approved {
            reference: format!("GW-{:06}", state.next_reference),
        })
    }

    async fn refund(
        &self,
        _payment: &Payment,
        amount: Money,
        idempotency_key: &str,
    ) -> Result<(), GatewayError> {
        self.delay().await;
        let mut state = self.state.write();

        if state.unavailable || state.fail_on_refund {
            return Err(GatewayError::Unavailable("refund endpoint down".to_string()));
        }
        if state.refund_keys.insert(idempotency_key.to_string()) {
            state.refunds.push(amount);
        }
        Ok(())
    }
}
