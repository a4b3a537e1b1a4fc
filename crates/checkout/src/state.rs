//! Checkout session state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The status of a checkout session.
///
/// State transitions:
/// ```text
/// Initiated ──► ItemsReserved ──► PaymentPending ──► PaymentProcessing ──► Completed
///     │               │                 │                   │
///     └───────────────┴─────────────────┴───────────────────┴──► Failed | Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    /// Session created, nothing reserved yet.
    #[default]
    Initiated,

    /// Every item holds a reservation.
    ItemsReserved,

    /// A pending order exists; payment not attempted yet.
    PaymentPending,

    /// The charge was sent; its outcome may still be unknown.
    PaymentProcessing,

    /// Paid and reservations committed (terminal state).
    Completed,

    /// A step failed and compensation ran (terminal state).
    Failed,

    /// Deadline passed before completion (terminal state).
    Expired,
}

impl CheckoutStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    /// Name of the step `Advance` runs from this status.
    pub fn step(&self) -> Option<&'static str> {
        match self {
            Self::Initiated => Some("reserve_items"),
            Self::ItemsReserved => Some("create_order"),
            Self::PaymentPending => Some("charge_payment"),
            Self::PaymentProcessing => Some("confirm_payment"),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::ItemsReserved => "items_reserved",
            Self::PaymentPending => "payment_pending",
            Self::PaymentProcessing => "payment_processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for CheckoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckoutStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(Self::Initiated),
            "items_reserved" => Ok(Self::ItemsReserved),
            "payment_pending" => Ok(Self::PaymentPending),
            "payment_processing" => Ok(Self::PaymentProcessing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown checkout status: {other}")),
        }
    }
}
