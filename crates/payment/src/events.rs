//! Payloads of the events published on `ecommerce.payment.*`.

use common::{Currency, Money, OrderId, PaymentId, SessionId};
use serde::{Deserialize, Serialize};

pub const AGGREGATE_TYPE: &str = "Payment";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSucceeded {
    pub payment_id: PaymentId,
    pub checkout_id: SessionId,
    pub order_id: Option<OrderId>,
    pub amount: Money,
    pub currency: Currency,
    pub gateway_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub payment_id: PaymentId,
    pub checkout_id: SessionId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRefunded {
    pub payment_id: PaymentId,
    pub checkout_id: SessionId,
    pub amount: Money,
    pub total_refunded: Money,
    pub full: bool,
}
