//! Inventory collaborator.

use async_trait::async_trait;
use common::{ReservationId, SessionId};
use inventory::{InventoryError, ReservationManager, ReserveRequest};

use super::ServiceError;
use crate::session::CheckoutItem;

/// Stock holds for checkout items.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Holds `item.quantity` units for `session_id` for `ttl`.
    async fn reserve(
        &self,
        session_id: SessionId,
        item: &CheckoutItem,
        ttl: chrono::Duration,
    ) -> Result<ReservationId, ServiceError>;

    /// Converts the hold into a sale. Idempotent.
    async fn commit(&self, id: ReservationId) -> Result<(), ServiceError>;

    /// Returns held units. Idempotent on released or expired holds.
    async fn release(&self, id: ReservationId) -> Result<(), ServiceError>;

    /// True while the hold is still active.
    async fn is_active(&self, id: ReservationId) -> Result<bool, ServiceError>;
}

impl From<InventoryError> for ServiceError {
    fn from(e: InventoryError) -> Self {
        match e {
            InventoryError::ReservationNotFound(_) => ServiceError::NotFound(e.to_string()),
            InventoryError::Validation(_)
            | InventoryError::StockNotFound { .. }
            | InventoryError::InsufficientStock { .. }
            | InventoryError::InvalidTransition { .. } => ServiceError::Rejected(e.to_string()),
            InventoryError::Unavailable(_)
            | InventoryError::InvalidData(_)
            | InventoryError::Database(_)
            | InventoryError::Migration(_) => ServiceError::Unavailable(e.to_string()),
        }
    }
}

#[async_trait]
impl InventoryClient for ReservationManager {
    async fn reserve(
        &self,
        session_id: SessionId,
        item: &CheckoutItem,
        ttl: chrono::Duration,
    ) -> Result<ReservationId, ServiceError> {
        let request = ReserveRequest::new(item.product_id.clone(), item.variant_id.clone(), item.quantity)
            .for_session(session_id)
            .with_ttl(ttl);
        let reservation = ReservationManager::reserve(self, request).await?;
        Ok(reservation.id)
    }

    async fn commit(&self, id: ReservationId) -> Result<(), ServiceError> {
        ReservationManager::commit(self, id).await?;
        Ok(())
    }

    async fn release(&self, id: ReservationId) -> Result<(), ServiceError> {
        ReservationManager::release(self, id).await?;
        Ok(())
    }

    async fn is_active(&self, id: ReservationId) -> Result<bool, ServiceError> {
        match self.get_reservation(id).await {
            Ok(reservation) => Ok(reservation.is_active()),
            Err(InventoryError::ReservationNotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use common::{ManualClock, Money};
    use event_bus::{EventPublisher, InMemoryBroker};
    use inventory::{AdjustmentReason, InMemoryStockStore};
    use resilience::RetryPolicy;

    use super::*;

    async fn manager(on_hand: i64) -> ReservationManager {
        let manager = ReservationManager::new(
            Arc::new(InMemoryStockStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
            EventPublisher::new(Arc::new(InMemoryBroker::new()), "inventory-service", RetryPolicy::once()),
        );
        manager
            .adjust_quantity("SKU-1".into(), "default".into(), on_hand, AdjustmentReason::Restock, None)
            .await
            .unwrap();
        manager
    }

    fn item(quantity: u32) -> CheckoutItem {
        CheckoutItem::new("SKU-1", "default", Money::from_minor(100), quantity)
    }

    #[tokio::test]
    async fn insufficient_stock_is_a_rejection() {
        let manager = manager(1).await;
        let err = InventoryClient::reserve(&manager, SessionId::new(), &item(2), chrono::Duration::minutes(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Rejected(_)));
        assert!(!err.is_failure());
    }

    #[tokio::test]
    async fn released_hold_is_not_active() {
        let manager = manager(5).await;
        let id = InventoryClient::reserve(&manager, SessionId::new(), &item(2), chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert!(manager.is_active(id).await.unwrap());

        InventoryClient::release(&manager, id).await.unwrap();
        InventoryClient::release(&manager, id).await.unwrap();
        assert!(!manager.is_active(id).await.unwrap());
        assert!(!manager.is_active(ReservationId::new()).await.unwrap());
    }
}
