//! Checkout event payloads.

use common::{Money, OrderId, PaymentId, SessionId, UserId};
use serde::{Deserialize, Serialize};

use crate::session::CheckoutSession;
use crate::state::CheckoutStatus;

pub const AGGREGATE_TYPE: &str = "CheckoutSession";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutStarted {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub item_count: usize,
    pub total: Money,
    pub currency: String,
}

impl From<&CheckoutSession> for CheckoutStarted {
    fn from(s: &CheckoutSession) -> Self {
        Self {
            session_id: s.id,
            user_id: s.user_id,
            item_count: s.items.len(),
            total: s.total,
            currency: s.currency.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutCompleted {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub order_id: Option<OrderId>,
    pub payment_id: Option<PaymentId>,
    pub total: Money,
    pub currency: String,
}

impl From<&CheckoutSession> for CheckoutCompleted {
    fn from(s: &CheckoutSession) -> Self {
        Self {
            session_id: s.id,
            user_id: s.user_id,
            order_id: s.order_id,
            payment_id: s.payment_id,
            total: s.total,
            currency: s.currency.to_string(),
        }
    }
}

/// Published for failed and expired sessions alike; `status` tells them apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutFailed {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub status: CheckoutStatus,
    pub reason: String,
    /// Error classification, e.g. `business` or `transient`.
    pub kind: String,
    pub reconciliation_required: bool,
}

impl CheckoutFailed {
    pub fn new(session: &CheckoutSession, kind: &str) -> Self {
        Self {
            session_id: session.id,
            user_id: session.user_id,
            status: session.status,
            reason: session.failure_reason.clone().unwrap_or_default(),
            kind: kind.to_string(),
            reconciliation_required: session.reconciliation_required,
        }
    }
}
