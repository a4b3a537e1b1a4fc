use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ProductId, ReservationId, VariantId};

use crate::error::Result;
use crate::types::{ReleaseReason, Stock, StockAdjustment, StockReservation, Transition};

/// Persistence for stock rows and reservations.
///
/// Every mutating method is a single atomic unit: the availability or status
/// check and the write it guards cannot interleave with another caller.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Increments `reserved` and inserts `reservation` if enough stock is
    /// available, otherwise fails with `InsufficientStock`.
    async fn reserve(&self, reservation: StockReservation) -> Result<StockReservation>;

    /// Moves an active reservation to committed, converting reserved units to sold.
    async fn commit(&self, id: ReservationId, at: DateTime<Utc>) -> Result<Transition>;

    /// Moves an active reservation to released, returning its units.
    async fn release(
        &self,
        id: ReservationId,
        reason: ReleaseReason,
        at: DateTime<Utc>,
    ) -> Result<Transition>;

    /// Active reservations whose hold ended at or before `now`, oldest first.
    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ReservationId>>;

    /// Applies `adjustment.delta` to `total` and appends it to the ledger.
    async fn adjust(&self, adjustment: StockAdjustment) -> Result<Stock>;

    async fn get_stock(&self, product_id: &ProductId, variant_id: &VariantId)
    -> Result<Option<Stock>>;

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<StockReservation>>;

    /// Ledger rows for a variant, oldest first.
    async fn adjustments(
        &self,
        product_id: &ProductId,
        variant_id: &VariantId,
    ) -> Result<Vec<StockAdjustment>>;
}
