//! Shared application state and its wiring.

use std::sync::Arc;

use checkout::{
    CheckoutConfig, CheckoutOrchestrator, ExpirationSweeper, InMemoryOrderService,
    InMemorySessionStore, PostgresSessionStore, SessionStore,
};
use common::{Clock, SystemClock};
use event_bus::{Broker, EventPublisher};
use inventory::{InMemoryStockStore, PostgresStockStore, ReservationManager, StockStore};
use payment::{
    InMemoryGateway, InMemoryPaymentRepository, PaymentGuard, PaymentRepository,
    PostgresPaymentRepository,
};
use sqlx::PgPool;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: CheckoutOrchestrator,
    pub reservations: ReservationManager,
}

impl AppState {
    /// A sweeper over this state's orchestrator and reservations.
    pub fn sweeper(&self) -> ExpirationSweeper {
        ExpirationSweeper::new(self.orchestrator.clone(), self.reservations.clone())
    }
}

/// Persistence backends for sessions, stock and payments.
pub struct Backends {
    pub sessions: Arc<dyn SessionStore>,
    pub stock: Arc<dyn StockStore>,
    pub payments: Arc<dyn PaymentRepository>,
}

impl Backends {
    pub fn in_memory() -> Self {
        Self {
            sessions: Arc::new(InMemorySessionStore::new()),
            stock: Arc::new(InMemoryStockStore::new()),
            payments: Arc::new(InMemoryPaymentRepository::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            sessions: Arc::new(PostgresSessionStore::new(pool.clone())),
            stock: Arc::new(PostgresStockStore::new(pool.clone())),
            payments: Arc::new(PostgresPaymentRepository::new(pool)),
        }
    }
}

/// Wires the services over `backends`, publishing through `broker`.
///
/// Orders and the payment gateway are the in-memory stand-ins.
pub fn create_state(backends: Backends, broker: Arc<dyn Broker>, config: CheckoutConfig) -> Arc<AppState> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let publisher =
        |source: &str| EventPublisher::new(broker.clone(), source, config.publish_policy());

    let reservations = ReservationManager::new(
        backends.stock,
        clock.clone(),
        publisher("inventory-service"),
    )
    .with_default_ttl(config.session_ttl);
    let payments = PaymentGuard::new(
        backends.payments,
        Arc::new(InMemoryGateway::new()),
        clock.clone(),
        publisher("payment-service"),
    );
    let orders = InMemoryOrderService::new().with_publisher(publisher("order-service"));
    let events = publisher("checkout-service");

    let orchestrator = CheckoutOrchestrator::new(
        backends.sessions,
        Arc::new(reservations.clone()),
        Arc::new(orders),
        Arc::new(payments),
        clock,
        events,
        config,
    );

    Arc::new(AppState {
        orchestrator,
        reservations,
    })
}
