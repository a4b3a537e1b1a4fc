//! Payloads of the events published on `ecommerce.inventory.*`.

use chrono::{DateTime, Utc};
use common::{ProductId, ReservationId, SessionId, VariantId};
use serde::{Deserialize, Serialize};

use crate::types::{ReleaseReason, StockReservation};

pub const AGGREGATE_TYPE: &str = "StockReservation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReserved {
    pub reservation_id: ReservationId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub quantity: u32,
    pub session_id: Option<SessionId>,
    pub expires_at: DateTime<Utc>,
}

impl From<&StockReservation> for InventoryReserved {
    fn from(r: &StockReservation) -> Self {
        Self {
            reservation_id: r.id,
            product_id: r.product_id.clone(),
            variant_id: r.variant_id.clone(),
            quantity: r.quantity,
            session_id: r.session_id,
            expires_at: r.expires_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReleased {
    pub reservation_id: ReservationId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub quantity: u32,
    pub session_id: Option<SessionId>,
    pub reason: ReleaseReason,
}

impl From<&StockReservation> for InventoryReleased {
    fn from(r: &StockReservation) -> Self {
        Self {
            reservation_id: r.id,
            product_id: r.product_id.clone(),
            variant_id: r.variant_id.clone(),
            quantity: r.quantity,
            session_id: r.session_id,
            reason: r.release_reason.unwrap_or(ReleaseReason::Requested),
        }
    }
}
