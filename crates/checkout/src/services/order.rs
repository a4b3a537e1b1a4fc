//! Order collaborator trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Currency, Money, OrderId, SessionId, UserId};
use event_bus::{EventPublisher, PublishContext, Version, topics};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::ServiceError;
use crate::session::CheckoutItem;

/// A pending order for a reserved checkout.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub items: Vec<CheckoutItem>,
    pub total: Money,
    pub currency: Currency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub total: Money,
    pub currency: Currency,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

/// Order lifecycle as seen by checkout.
#[async_trait]
pub trait OrderClient: Send + Sync {
    /// Creates a pending order. At most one order exists per session; a
    /// repeated call returns the existing one.
    async fn create_pending(&self, request: &OrderRequest) -> Result<OrderId, ServiceError>;

    async fn find_by_checkout(&self, session_id: SessionId)
    -> Result<Option<OrderRecord>, ServiceError>;

    /// Cancels the order. Idempotent.
    async fn cancel(&self, order_id: OrderId, reason: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryOrderState {
    orders: HashMap<OrderId, OrderRecord>,
    by_session: HashMap<SessionId, OrderId>,
    create_calls: usize,
    fail_on_create: bool,
    fail_on_cancel: bool,
    latency: Option<Duration>,
}

/// In-memory order service for testing.
#[derive(Clone, Default)]
pub struct InMemoryOrderService {
    state: Arc<RwLock<InMemoryOrderState>>,
    publisher: Option<EventPublisher>,
}

impl InMemoryOrderService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `order.created` and `order.canceled` through `publisher`.
    pub fn with_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Configures the service to fail create calls as unavailable.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state.write().fail_on_create = fail;
    }

    /// Configures the service to fail cancel calls as unavailable.
    pub fn set_fail_on_cancel(&self, fail: bool) {
        self.state.write().fail_on_cancel = fail;
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.write().latency = latency;
    }

    /// Number of create calls that reached the service.
    pub fn create_calls(&self) -> usize {
        self.state.read().create_calls
    }

    pub fn order_count(&self) -> usize {
        self.state.read().orders.len()
    }

    /// Orders not canceled.
    pub fn open_orders(&self) -> usize {
        self.state
            .read()
            .orders
            .values()
            .filter(|o| o.status != OrderStatus::Canceled)
            .count()
    }

    pub fn get(&self, id: OrderId) -> Option<OrderRecord> {
        self.state.read().orders.get(&id).cloned()
    }

    async fn delay(&self) {
        let latency = self.state.read().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn emit(&self, topic: event_bus::Topic, order: &OrderRecord) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let ctx = PublishContext::new(order.session_id.to_string(), order.user_id.to_string());
        let version = match order.status {
            OrderStatus::Pending => Version::new(1),
            OrderStatus::Canceled => Version::new(2),
        };
        if let Err(e) = publisher
            .publish_at(topic, &order.id.to_string(), "Order", version, order, &ctx)
            .await
        {
            tracing::error!(order_id = %order.id, error = %e, "failed to publish order event");
        }
    }
}

#[async_trait]
impl OrderClient for InMemoryOrderService {
    async fn create_pending(&self, request: &OrderRequest) -> Result<OrderId, ServiceError> {
        self.delay().await;

        let created = {
            let mut state = self.state.write();
            state.create_calls += 1;
            if state.fail_on_create {
                return Err(ServiceError::Unavailable("order service unavailable".to_string()));
            }
            if let Some(existing) = state.by_session.get(&request.session_id) {
                return Ok(*existing);
            }

            let order = OrderRecord {
                id: OrderId::new(),
                session_id: request.session_id,
                user_id: request.user_id,
                total: request.total,
                currency: request.currency.clone(),
                status: OrderStatus::Pending,
                cancel_reason: None,
            };
            state.by_session.insert(order.session_id, order.id);
            state.orders.insert(order.id, order.clone());
            order
        };

        self.emit(topics::ORDER_CREATED, &created).await;
        Ok(created.id)
    }

    async fn find_by_checkout(
        &self,
        session_id: SessionId,
    ) -> Result<Option<OrderRecord>, ServiceError> {
        self.delay().await;
        let state = self.state.read();
        Ok(state
            .by_session
            .get(&session_id)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn cancel(&self, order_id: OrderId, reason: &str) -> Result<(), ServiceError> {
        self.delay().await;

        let canceled = {
            let mut state = self.state.write();
            if state.fail_on_cancel {
                return Err(ServiceError::Unavailable("order service unavailable".to_string()));
            }
            let order = state
                .orders
                .get_mut(&order_id)
                .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))?;
            if order.status == OrderStatus::Canceled {
                return Ok(());
            }
            order.status = OrderStatus::Canceled;
            order.cancel_reason = Some(reason.to_string());
            order.clone()
        };

        self.emit(topics::ORDER_CANCELED, &canceled).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use event_bus::InMemoryBroker;
    use resilience::RetryPolicy;

    use super::*;

    fn request(session_id: SessionId) -> OrderRequest {
        OrderRequest {
            session_id,
            user_id: UserId::new(),
            items: vec![CheckoutItem::new("SKU-1", "default", Money::from_minor(500), 2)],
            total: Money::from_minor(1_000),
            currency: Currency::default(),
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_per_session() {
        let service = InMemoryOrderService::new();
        let session_id = SessionId::new();

        let first = service.create_pending(&request(session_id)).await.unwrap();
        let second = service.create_pending(&request(session_id)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(service.order_count(), 1);
        assert_eq!(service.create_calls(), 2);
        let found = service.find_by_checkout(session_id).await.unwrap().unwrap();
        assert_eq!(found.id, first);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_publishes_once() {
        let broker = InMemoryBroker::new();
        let service = InMemoryOrderService::new().with_publisher(EventPublisher::new(
            Arc::new(broker.clone()),
            "order-service",
            RetryPolicy::once(),
        ));
        let id = service.create_pending(&request(SessionId::new())).await.unwrap();

        service.cancel(id, "payment declined").await.unwrap();
        service.cancel(id, "payment declined").await.unwrap();

        let order = service.get(id).unwrap();
        assert_eq!(order.status, OrderStatus::Canceled);
        assert_eq!(order.cancel_reason.as_deref(), Some("payment declined"));
        assert_eq!(service.open_orders(), 0);
        assert_eq!(broker.count(&topics::ORDER_CREATED.name()), 1);
        assert_eq!(broker.count(&topics::ORDER_CANCELED.name()), 1);
        assert_eq!(broker.published(&topics::ORDER_CREATED.name())[0].version, Version::new(1));
        assert_eq!(broker.published(&topics::ORDER_CANCELED.name())[0].version, Version::new(2));
    }

    #[tokio::test]
    async fn fail_on_create() {
        let service = InMemoryOrderService::new();
        service.set_fail_on_create(true);

        let err = service.create_pending(&request(SessionId::new())).await.unwrap_err();
        assert!(err.is_failure());
        assert_eq!(service.order_count(), 0);
    }

    #[tokio::test]
    async fn cancel_unknown_order_is_not_found() {
        let service = InMemoryOrderService::new();
        let err = service.cancel(OrderId::new(), "x").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
