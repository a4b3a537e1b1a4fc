//! In-memory stock store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ProductId, ReservationId, VariantId};
use tokio::sync::Mutex;

use crate::error::{InventoryError, Result};
use crate::store::StockStore;
use crate::types::{
    ReleaseReason, ReservationStatus, Stock, StockAdjustment, StockReservation, Transition,
};

type StockKey = (ProductId, VariantId);

#[derive(Debug, Default)]
struct State {
    stock: HashMap<StockKey, Stock>,
    reservations: HashMap<ReservationId, StockReservation>,
    adjustments: Vec<StockAdjustment>,
    unavailable: bool,
    latency: Option<Duration>,
}

impl State {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(InventoryError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn stock_mut(&mut self, product_id: &ProductId, variant_id: &VariantId) -> Result<&mut Stock> {
        self.stock
            .get_mut(&(product_id.clone(), variant_id.clone()))
            .ok_or_else(|| InventoryError::StockNotFound {
                product_id: product_id.clone(),
                variant_id: variant_id.clone(),
            })
    }
}

/// In-memory stock store for tests and single-process runs.
///
/// All state sits behind one async mutex, so each operation is one critical
/// section. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail with `Unavailable` until cleared.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Delays every operation by `latency` before it runs.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().await.latency = latency;
    }

    /// Number of reservations currently holding stock.
    pub async fn active_count(&self) -> usize {
        self.state
            .lock()
            .await
            .reservations
            .values()
            .filter(|r| r.is_active())
            .count()
    }

    async fn delay(&self) {
        let latency = self.state.lock().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn finish(
        state: &mut State,
        id: ReservationId,
        target: ReservationStatus,
        reason: Option<ReleaseReason>,
        at: DateTime<Utc>,
    ) -> Result<Transition> {
        let current = state
            .reservations
            .get(&id)
            .cloned()
            .ok_or(InventoryError::ReservationNotFound(id))?;

        match (current.status, target) {
            (ReservationStatus::Active, _) => {}
            (from, to) if from == to => {
                return Ok(Transition {
                    reservation: current,
                    changed: false,
                });
            }
            (ReservationStatus::Expired, ReservationStatus::Released) => {
                return Ok(Transition {
                    reservation: current,
                    changed: false,
                });
            }
            (from, to) => return Err(InventoryError::InvalidTransition { id, from, to }),
        }

        let quantity = i64::from(current.quantity);
        let stock = state.stock_mut(&current.product_id, &current.variant_id)?;
        stock.reserved -= quantity;
        if target == ReservationStatus::Committed {
            stock.total -= quantity;
            stock.sold += quantity;
        }
        stock.updated_at = at;

        let reservation = state
            .reservations
            .get_mut(&id)
            .ok_or(InventoryError::ReservationNotFound(id))?;
        reservation.status = target;
        reservation.release_reason = reason;
        reservation.updated_at = at;

        Ok(Transition {
            reservation: reservation.clone(),
            changed: true,
        })
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn reserve(&self, reservation: StockReservation) -> Result<StockReservation> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.check_available()?;

        let requested = i64::from(reservation.quantity);
        let key = (reservation.product_id.clone(), reservation.variant_id.clone());
        let available = state.stock.get(&key).map(Stock::available).unwrap_or(0);
        if available < requested {
            return Err(InventoryError::InsufficientStock {
                product_id: reservation.product_id,
                variant_id: reservation.variant_id,
                requested,
                available,
            });
        }

        let stock = state.stock_mut(&reservation.product_id, &reservation.variant_id)?;
        stock.reserved += requested;
        stock.updated_at = reservation.created_at;

        state
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn commit(&self, id: ReservationId, at: DateTime<Utc>) -> Result<Transition> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.check_available()?;
        Self::finish(&mut state, id, ReservationStatus::Committed, None, at)
    }

    async fn release(
        &self,
        id: ReservationId,
        reason: ReleaseReason,
        at: DateTime<Utc>,
    ) -> Result<Transition> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.check_available()?;
        Self::finish(&mut state, id, ReservationStatus::Released, Some(reason), at)
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ReservationId>> {
        let state = self.state.lock().await;
        state.check_available()?;

        let mut expired: Vec<&StockReservation> = state
            .reservations
            .values()
            .filter(|r| r.is_expired_at(now))
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        Ok(expired.into_iter().take(limit).map(|r| r.id).collect())
    }

    async fn adjust(&self, adjustment: StockAdjustment) -> Result<Stock> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.check_available()?;

        let key = (adjustment.product_id.clone(), adjustment.variant_id.clone());
        let stock = match state.stock.get_mut(&key) {
            Some(stock) => {
                let Some(new_total) = stock.total.checked_add(adjustment.delta) else {
                    return Err(InventoryError::Validation(format!(
                        "adjusting {}/{} by {} overflows its total",
                        adjustment.product_id, adjustment.variant_id, adjustment.delta
                    )));
                };
                if new_total < stock.reserved {
                    return Err(InventoryError::InsufficientStock {
                        product_id: adjustment.product_id,
                        variant_id: adjustment.variant_id,
                        requested: adjustment.delta.saturating_neg(),
                        available: stock.available(),
                    });
                }
                stock.total = new_total;
                stock.updated_at = adjustment.created_at;
                stock.clone()
            }
            None => {
                if adjustment.delta < 0 {
                    return Err(InventoryError::Validation(format!(
                        "cannot remove {} units from untracked variant {}/{}",
                        adjustment.delta.saturating_neg(), adjustment.product_id, adjustment.variant_id
                    )));
                }
                let mut stock = Stock::new(
                    adjustment.product_id.clone(),
                    adjustment.variant_id.clone(),
                    adjustment.created_at,
                );
                stock.total = adjustment.delta;
                state.stock.insert(key, stock.clone());
                stock
            }
        };

        state.adjustments.push(adjustment);
        Ok(stock)
    }

    async fn get_stock(
        &self,
        product_id: &ProductId,
        variant_id: &VariantId,
    ) -> Result<Option<Stock>> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state
            .stock
            .get(&(product_id.clone(), variant_id.clone()))
            .cloned())
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<StockReservation>> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.reservations.get(&id).cloned())
    }

    async fn adjustments(
        &self,
        product_id: &ProductId,
        variant_id: &VariantId,
    ) -> Result<Vec<StockAdjustment>> {
        let state = self.state.lock().await;
        Ok(state
            .adjustments
            .iter()
            .filter(|a| &a.product_id == product_id && &a.variant_id == variant_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::types::AdjustmentReason;

    fn restock(delta: i64) -> StockAdjustment {
        StockAdjustment {
            product_id: "SKU-1".into(),
            variant_id: "red".into(),
            delta,
            reason: AdjustmentReason::Restock,
            reference_id: None,
            created_at: Utc::now(),
        }
    }

    fn hold(quantity: u32) -> StockReservation {
        let now = Utc::now();
        StockReservation {
            id: ReservationId::new(),
            product_id: "SKU-1".into(),
            variant_id: "red".into(),
            quantity,
            status: ReservationStatus::Active,
            release_reason: None,
            session_id: None,
            created_at: now,
            expires_at: now + ChronoDuration::minutes(15),
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn reserve_then_commit_moves_units_to_sold() {
        let store = InMemoryStockStore::new();
        store.adjust(restock(10)).await.unwrap();

        let reservation = store.reserve(hold(4)).await.unwrap();
        let stock = store.get_stock(&"SKU-1".into(), &"red".into()).await.unwrap().unwrap();
        assert_eq!((stock.total, stock.reserved, stock.available()), (10, 4, 6));

        let transition = store.commit(reservation.id, Utc::now()).await.unwrap();
        assert!(transition.changed);
        let stock = store.get_stock(&"SKU-1".into(), &"red".into()).await.unwrap().unwrap();
        assert_eq!((stock.total, stock.reserved, stock.sold), (6, 0, 4));
    }

    #[tokio::test]
    async fn reserve_beyond_available_fails() {
        let store = InMemoryStockStore::new();
        store.adjust(restock(3)).await.unwrap();

        let err = store.reserve(hold(4)).await.unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientStock { available: 3, .. }));
        assert_eq!(store.active_count().await, 0);
    }

    #[tokio::test]
    async fn reserve_untracked_variant_is_insufficient() {
        let store = InMemoryStockStore::new();
        let err = store.reserve(hold(1)).await.unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientStock { available: 0, .. }));
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let store = InMemoryStockStore::new();
        store.adjust(restock(5)).await.unwrap();
        let reservation = store.reserve(hold(5)).await.unwrap();

        let first = store
            .release(reservation.id, ReleaseReason::Requested, Utc::now())
            .await
            .unwrap();
        let second = store
            .release(reservation.id, ReleaseReason::Requested, Utc::now())
            .await
            .unwrap();

        assert!(first.changed);
        assert!(!second.changed);
        let stock = store.get_stock(&"SKU-1".into(), &"red".into()).await.unwrap().unwrap();
        assert_eq!(stock.available(), 5);
    }

    #[tokio::test]
    async fn committed_reservation_cannot_be_released() {
        let store = InMemoryStockStore::new();
        store.adjust(restock(5)).await.unwrap();
        let reservation = store.reserve(hold(2)).await.unwrap();
        store.commit(reservation.id, Utc::now()).await.unwrap();

        let err = store
            .release(reservation.id, ReleaseReason::Requested, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn negative_adjustment_cannot_undercut_reserved() {
        let store = InMemoryStockStore::new();
        store.adjust(restock(5)).await.unwrap();
        store.reserve(hold(4)).await.unwrap();

        let err = store.adjust(restock(-2)).await.unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientStock { .. }));

        let stock = store.adjust(restock(-1)).await.unwrap();
        assert_eq!((stock.total, stock.reserved), (4, 4));
    }

    #[tokio::test]
    async fn negative_adjustment_on_missing_row_is_rejected() {
        let store = InMemoryStockStore::new();
        let err = store.adjust(restock(-1)).await.unwrap_err();
        assert!(matches!(err, InventoryError::Validation(_)));
        assert!(store.adjustments(&"SKU-1".into(), &"red".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overflowing_adjustment_is_rejected() {
        let store = InMemoryStockStore::new();
        store.adjust(restock(5)).await.unwrap();

        let err = store.adjust(restock(i64::MAX)).await.unwrap_err();
        assert!(matches!(err, InventoryError::Validation(_)));

        let stock = store.get_stock(&"SKU-1".into(), &"red".into()).await.unwrap().unwrap();
        assert_eq!(stock.total, 5);
        assert_eq!(store.adjustments(&"SKU-1".into(), &"red".into()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryStockStore::new();
        store.set_unavailable(true).await;
        let err = store.adjust(restock(1)).await.unwrap_err();
        assert!(err.is_transient());
    }
}
