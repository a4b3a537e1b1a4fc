use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{Currency, Money, OrderId, PaymentId, SessionId};
use serde::{Deserialize, Serialize};

/// Status of a payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Claimed by an idempotency key, gateway not called yet.
    Pending,
    /// Gateway call in flight or outcome unknown.
    Processing,
    Succeeded,
    Failed,
    Canceled,
    /// A refund of `pending_refund` was claimed and sent to the gateway.
    Refunding,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Refunding => "refunding",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
        }
    }

    /// The charge has not settled either way.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Money was captured and not fully returned.
    pub fn is_captured(&self) -> bool {
        matches!(self, Self::Succeeded | Self::PartiallyRefunded)
    }

    /// Captured money is held or a refund of it is still in flight.
    pub fn holds_funds(&self) -> bool {
        self.is_captured() || *self == Self::Refunding
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            "refunding" => Ok(Self::Refunding),
            "refunded" => Ok(Self::Refunded),
            "partially_refunded" => Ok(Self::PartiallyRefunded),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Card,
    Wallet,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Wallet => "wallet",
            Self::BankTransfer => "bank_transfer",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(Self::Card),
            "wallet" => Ok(Self::Wallet),
            "bank_transfer" => Ok(Self::BankTransfer),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub checkout_id: SessionId,
    pub order_id: Option<OrderId>,
    pub amount: Money,
    pub currency: Currency,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    /// Globally unique when present.
    pub idempotency_key: Option<String>,
    pub refunded_amount: Money,
    /// Amount of the claimed refund while `refunding`, zero otherwise.
    #[serde(default)]
    pub pending_refund: Money,
    pub gateway_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Amount still refundable.
    pub fn refundable(&self) -> Money {
        self.amount - self.refunded_amount
    }

    /// Gateway idempotency key for the refund that starts at the current
    /// `refunded_amount`. Every retry of that refund sends the same key.
    pub fn refund_key(&self) -> String {
        format!("{}-refund-{}", self.id, self.refunded_amount.minor())
    }
}

/// A charge attempt, deduplicated by `idempotency_key`.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub idempotency_key: String,
    pub checkout_id: SessionId,
    pub order_id: Option<OrderId>,
    pub amount: Money,
    pub currency: Currency,
    pub method: PaymentMethod,
}
