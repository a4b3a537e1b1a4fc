//! Payment persistence.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{Money, PaymentId};
use parking_lot::Mutex;

use crate::error::{PaymentError, Result};
use crate::types::{Payment, PaymentStatus};

/// Stored state a conditional update must still find.
///
/// The refunded amount is part of the condition so a stale writer cannot
/// settle a later refund claim that happens to share its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    pub status: PaymentStatus,
    pub refunded_amount: Money,
}

impl Expected {
    pub fn of(payment: &Payment) -> Self {
        Self {
            status: payment.status,
            refunded_amount: payment.refunded_amount,
        }
    }

    /// A payment nothing has been refunded from yet.
    pub fn unrefunded(status: PaymentStatus) -> Self {
        Self {
            status,
            refunded_amount: Money::zero(),
        }
    }

    fn matches(&self, stored: &Payment) -> bool {
        stored.status == self.status && stored.refunded_amount == self.refunded_amount
    }
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Inserts a new payment. Fails with `Conflict` when its idempotency key
    /// is already taken.
    async fn insert(&self, payment: &Payment) -> Result<()>;

    /// Overwrites `payment` if the stored row still matches `expected`.
    ///
    /// Returns `false` when another writer moved the payment first.
    async fn update(&self, payment: &Payment, expected: Expected) -> Result<bool>;

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>>;

    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<Payment>>;
}

#[derive(Debug, Default)]
struct State {
    payments: HashMap<PaymentId, Payment>,
    by_key: HashMap<String, PaymentId>,
}

/// In-memory payment repository for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentRepository {
    state: Arc<Mutex<State>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().payments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert(&self, payment: &Payment) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(key) = &payment.idempotency_key {
            if state.by_key.contains_key(key) {
                return Err(PaymentError::Conflict(key.clone()));
            }
            state.by_key.insert(key.clone(), payment.id);
        }
        state.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn update(&self, payment: &Payment, expected: Expected) -> Result<bool> {
        let mut state = self.state.lock();
        let stored = state
            .payments
            .get_mut(&payment.id)
            .ok_or(PaymentError::NotFound(payment.id))?;
        if !expected.matches(stored) {
            return Ok(false);
        }
        *stored = payment.clone();
        Ok(true)
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.state.lock().payments.get(&id).cloned())
    }

    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<Payment>> {
        let state = self.state.lock();
        Ok(state
            .by_key
            .get(idempotency_key)
            .and_then(|id| state.payments.get(id))
            .cloned())
    }
}
