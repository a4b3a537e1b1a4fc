//! Reservation lifecycle on top of a [`StockStore`].

use std::sync::Arc;

use common::{Clock, ProductId, ReservationId, VariantId};
use event_bus::{EventPublisher, PublishContext, Version, topics};
use serde::Serialize;

use crate::error::{InventoryError, Result};
use crate::events::{AGGREGATE_TYPE, InventoryReleased, InventoryReserved};
use crate::store::StockStore;
use crate::types::{
    AdjustmentReason, ReleaseReason, ReservationStatus, ReserveRequest, Stock, StockAdjustment,
    StockReservation,
};

/// How long a reservation holds stock unless the request says otherwise.
pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 15 * 60;

/// Holds, commits, releases and expires stock reservations.
///
/// Every call maps onto one atomic store operation, so any number of
/// managers, sweepers and checkout sagas may share one store.
#[derive(Clone)]
pub struct ReservationManager {
    store: Arc<dyn StockStore>,
    clock: Arc<dyn Clock>,
    publisher: EventPublisher,
    default_ttl: chrono::Duration,
}

impl ReservationManager {
    pub fn new(store: Arc<dyn StockStore>, clock: Arc<dyn Clock>, publisher: EventPublisher) -> Self {
        Self {
            store,
            clock,
            publisher,
            default_ttl: chrono::Duration::seconds(DEFAULT_RESERVATION_TTL_SECS),
        }
    }

    pub fn with_default_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn store(&self) -> &Arc<dyn StockStore> {
        &self.store
    }

    /// Places a hold on `request.quantity` units.
    ///
    /// Fails with `InsufficientStock` when fewer units are available.
    #[tracing::instrument(skip(self, request), fields(product_id = %request.product_id, variant_id = %request.variant_id, quantity = request.quantity))]
    pub async fn reserve(&self, request: ReserveRequest) -> Result<StockReservation> {
        if request.quantity == 0 {
            return Err(InventoryError::Validation(
                "reservation quantity must be positive".to_string(),
            ));
        }

        let now = self.clock.now();
        let ttl = request.ttl.unwrap_or(self.default_ttl);
        let reservation = StockReservation {
            id: ReservationId::new(),
            product_id: request.product_id,
            variant_id: request.variant_id,
            quantity: request.quantity,
            status: ReservationStatus::Active,
            release_reason: None,
            session_id: request.session_id,
            created_at: now,
            expires_at: now + ttl,
            updated_at: now,
        };

        match self.store.reserve(reservation).await {
            Ok(reservation) => {
                metrics::counter!("inventory_reservations_total", "outcome" => "reserved")
                    .increment(1);
                tracing::info!(reservation_id = %reservation.id, "stock reserved");
                self.emit(
                    topics::INVENTORY_RESERVED,
                    &reservation,
                    &InventoryReserved::from(&reservation),
                )
                .await;
                Ok(reservation)
            }
            Err(e) => {
                let outcome = match e {
                    InventoryError::InsufficientStock { .. } => "insufficient",
                    _ => "error",
                };
                metrics::counter!("inventory_reservations_total", "outcome" => outcome)
                    .increment(1);
                Err(e)
            }
        }
    }

    /// Converts a hold into a sale. Committing twice is a no-op.
    #[tracing::instrument(skip(self, id), fields(reservation_id = %id))]
    pub async fn commit(&self, id: ReservationId) -> Result<StockReservation> {
        let transition = self.store.commit(id, self.clock.now()).await?;
        if transition.changed {
            metrics::counter!("inventory_reservations_total", "outcome" => "committed")
                .increment(1);
            tracing::info!("reservation committed");
        }
        Ok(transition.reservation)
    }

    /// Returns held units to available stock. Releasing twice is a no-op;
    /// releasing a committed reservation is an error.
    #[tracing::instrument(skip(self, id), fields(reservation_id = %id))]
    pub async fn release(&self, id: ReservationId) -> Result<StockReservation> {
        self.release_with(id, ReleaseReason::Requested).await
    }

    async fn release_with(&self, id: ReservationId, reason: ReleaseReason) -> Result<StockReservation> {
        let transition = self.store.release(id, reason, self.clock.now()).await?;
        if transition.changed {
            metrics::counter!("inventory_reservations_total", "outcome" => "released")
                .increment(1);
            tracing::info!(%reason, "reservation released");
            self.emit(
                topics::INVENTORY_RELEASED,
                &transition.reservation,
                &InventoryReleased::from(&transition.reservation),
            )
            .await;
        }
        Ok(transition.reservation)
    }

    /// Releases up to `limit` active reservations whose hold has ended.
    ///
    /// Returns how many this call released. A reservation committed or
    /// released concurrently is skipped.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired(&self, limit: usize) -> Result<usize> {
        let expired = self.store.list_expired(self.clock.now(), limit).await?;
        let mut released = 0;

        for id in expired {
            match self.store.release(id, ReleaseReason::Expired, self.clock.now()).await {
                Ok(transition) if transition.changed => {
                    released += 1;
                    self.emit(
                        topics::INVENTORY_RELEASED,
                        &transition.reservation,
                        &InventoryReleased::from(&transition.reservation),
                    )
                    .await;
                }
                Ok(_) => {}
                // Lost a race with commit
                Err(InventoryError::InvalidTransition { .. }) => {}
                Err(e) => {
                    tracing::warn!(reservation_id = %id, error = %e, "failed to release expired reservation");
                }
            }
        }

        if released > 0 {
            metrics::counter!("inventory_reservations_swept_total").increment(released as u64);
            tracing::info!(released, "expired reservations released");
        }
        Ok(released)
    }

    /// Adds `delta` (which may be negative) to the on-hand quantity.
    ///
    /// Creates the stock row when the variant is not tracked yet.
    #[tracing::instrument(skip(self, product_id, variant_id, reference_id), fields(product_id = %product_id, variant_id = %variant_id))]
    pub async fn adjust_quantity(
        &self,
        product_id: ProductId,
        variant_id: VariantId,
        delta: i64,
        reason: AdjustmentReason,
        reference_id: Option<String>,
    ) -> Result<Stock> {
        let stock = self
            .store
            .adjust(StockAdjustment {
                product_id,
                variant_id,
                delta,
                reason,
                reference_id,
                created_at: self.clock.now(),
            })
            .await?;
        tracing::info!(delta, %reason, total = stock.total, "stock adjusted");
        Ok(stock)
    }

    pub async fn get_stock(&self, product_id: &ProductId, variant_id: &VariantId) -> Result<Stock> {
        self.store
            .get_stock(product_id, variant_id)
            .await?
            .ok_or_else(|| InventoryError::StockNotFound {
                product_id: product_id.clone(),
                variant_id: variant_id.clone(),
            })
    }

    pub async fn get_reservation(&self, id: ReservationId) -> Result<StockReservation> {
        self.store
            .get_reservation(id)
            .await?
            .ok_or(InventoryError::ReservationNotFound(id))
    }

    async fn emit<P: Serialize>(&self, topic: event_bus::Topic, reservation: &StockReservation, payload: &P) {
        let ctx = PublishContext {
            correlation_id: reservation.session_id.map(|s| s.to_string()),
            ..PublishContext::default()
        };
        // reserved is the first event of a hold, released or expired the last
        let version = match reservation.status {
            ReservationStatus::Active => Version::new(1),
            _ => Version::new(2),
        };
        if let Err(e) = self
            .publisher
            .publish_at(topic, &reservation.id.to_string(), AGGREGATE_TYPE, version, payload, &ctx)
            .await
        {
            tracing::error!(reservation_id = %reservation.id, error = %e, "failed to publish inventory event");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::ManualClock;
    use event_bus::InMemoryBroker;
    use resilience::RetryPolicy;

    use super::*;
    use crate::memory::InMemoryStockStore;

    struct Fixture {
        manager: ReservationManager,
        broker: InMemoryBroker,
        clock: ManualClock,
    }

    async fn fixture(stock: i64) -> Fixture {
        let broker = InMemoryBroker::new();
        let clock = ManualClock::new(Utc::now());
        let publisher = EventPublisher::new(Arc::new(broker.clone()), "inventory-service", RetryPolicy::once());
        let manager = ReservationManager::new(
            Arc::new(InMemoryStockStore::new()),
            Arc::new(clock.clone()),
            publisher,
        );
        manager
            .adjust_quantity("SKU-1".into(), "red".into(), stock, AdjustmentReason::Restock, None)
            .await
            .unwrap();
        Fixture { manager, broker, clock }
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected() {
        let f = fixture(5).await;
        let err = f.manager.reserve(ReserveRequest::new("SKU-1", "red", 0)).await.unwrap_err();
        assert!(matches!(err, InventoryError::Validation(_)));
    }

    #[tokio::test]
    async fn reserve_publishes_event() {
        let f = fixture(5).await;
        let reservation = f.manager.reserve(ReserveRequest::new("SKU-1", "red", 2)).await.unwrap();

        let events = f.broker.published("ecommerce.inventory.reserved");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].aggregate_id, reservation.id.to_string());
        let payload: InventoryReserved = events[0].decode().unwrap();
        assert_eq!(payload.quantity, 2);
    }

    #[tokio::test]
    async fn release_publishes_once() {
        let f = fixture(5).await;
        let reservation = f.manager.reserve(ReserveRequest::new("SKU-1", "red", 2)).await.unwrap();

        f.manager.release(reservation.id).await.unwrap();
        f.manager.release(reservation.id).await.unwrap();

        assert_eq!(f.broker.count("ecommerce.inventory.released"), 1);
    }

    #[tokio::test]
    async fn event_versions_follow_the_reservation_lifecycle() {
        let f = fixture(5).await;
        let reservation = f.manager.reserve(ReserveRequest::new("SKU-1", "red", 2)).await.unwrap();
        f.manager.release(reservation.id).await.unwrap();

        let reserved = &f.broker.published("ecommerce.inventory.reserved")[0];
        let released = &f.broker.published("ecommerce.inventory.released")[0];
        assert_eq!(reserved.version, Version::new(1));
        assert_eq!(released.version, Version::new(2));
    }

    #[tokio::test]
    async fn sweep_releases_only_expired_holds() {
        let f = fixture(10).await;
        let short = f
            .manager
            .reserve(ReserveRequest::new("SKU-1", "red", 3).with_ttl(chrono::Duration::minutes(1)))
            .await
            .unwrap();
        let long = f
            .manager
            .reserve(ReserveRequest::new("SKU-1", "red", 3).with_ttl(chrono::Duration::hours(1)))
            .await
            .unwrap();

        f.clock.advance(chrono::Duration::minutes(2));
        assert_eq!(f.manager.sweep_expired(100).await.unwrap(), 1);

        let short = f.manager.get_reservation(short.id).await.unwrap();
        assert_eq!(short.status, ReservationStatus::Released);
        assert_eq!(short.release_reason, Some(ReleaseReason::Expired));
        assert!(f.manager.get_reservation(long.id).await.unwrap().is_active());

        let stock = f.manager.get_stock(&"SKU-1".into(), &"red".into()).await.unwrap();
        assert_eq!(stock.available(), 7);
    }

    #[tokio::test]
    async fn missing_reservation_is_not_found() {
        let f = fixture(1).await;
        let err = f.manager.commit(ReservationId::new()).await.unwrap_err();
        assert!(matches!(err, InventoryError::ReservationNotFound(_)));
    }
}
