//! Stock, reservations and the adjustment ledger.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{ProductId, ReservationId, SessionId, VariantId};
use serde::{Deserialize, Serialize};

/// Stock level of one product variant.
///
/// `total` is the on-hand quantity. Committing a reservation removes its
/// units from both `total` and `reserved` and adds them to `sold`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub total: i64,
    pub reserved: i64,
    pub sold: i64,
    pub updated_at: DateTime<Utc>,
}

impl Stock {
    pub fn new(product_id: ProductId, variant_id: VariantId, at: DateTime<Utc>) -> Self {
        Self {
            product_id,
            variant_id,
            total: 0,
            reserved: 0,
            sold: 0,
            updated_at: at,
        }
    }

    /// Units that can still be reserved.
    pub fn available(&self) -> i64 {
        self.total - self.reserved
    }
}

/// Lifecycle of a reservation. Only `Active` has outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Committed,
    Released,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::Released => "released",
            Self::Expired => "expired",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Released and expired reservations no longer hold stock.
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released | Self::Expired)
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "committed" => Ok(Self::Committed),
            "released" => Ok(Self::Released),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

/// Why a reservation stopped holding stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    Requested,
    Expired,
}

impl ReleaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(Self::Requested),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown release reason: {other}")),
        }
    }
}

/// A temporary hold on stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReservation {
    pub id: ReservationId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub quantity: u32,
    pub status: ReservationStatus,
    pub release_reason: Option<ReleaseReason>,
    /// Checkout session that asked for the hold, if any.
    pub session_id: Option<SessionId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockReservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at <= now
    }
}

/// Result of a status-conditioned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub reservation: StockReservation,
    /// False when the reservation was already in the target state.
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    Restock,
    Correction,
    Damage,
    Return,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restock => "restock",
            Self::Correction => "correction",
            Self::Damage => "damage",
            Self::Return => "return",
        }
    }
}

impl std::fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdjustmentReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restock" => Ok(Self::Restock),
            "correction" => Ok(Self::Correction),
            "damage" => Ok(Self::Damage),
            "return" => Ok(Self::Return),
            other => Err(format!("unknown adjustment reason: {other}")),
        }
    }
}

/// Ledger row written for every quantity adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub delta: i64,
    pub reason: AdjustmentReason,
    pub reference_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Parameters of a new reservation.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub quantity: u32,
    pub session_id: Option<SessionId>,
    /// Overrides the manager's default hold duration.
    pub ttl: Option<chrono::Duration>,
}

impl ReserveRequest {
    pub fn new(product_id: impl Into<ProductId>, variant_id: impl Into<VariantId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            variant_id: variant_id.into(),
            quantity,
            session_id: None,
            ttl: None,
        }
    }

    pub fn for_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}
