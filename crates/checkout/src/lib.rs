//! Checkout saga orchestration.
//!
//! A [`CheckoutSession`] moves through
//! reserve stock → create order → charge payment under
//! [`CheckoutOrchestrator`]. Collaborators sit behind narrow traits
//! ([`InventoryClient`], [`OrderClient`], [`PaymentClient`]); each forward
//! call is wrapped by that target's circuit breaker and step timeout. The
//! [`ExpirationSweeper`] expires overdue sessions and retries failed
//! compensations.

pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod services;
pub mod session;
pub mod state;
pub mod store;
pub mod sweeper;

pub use config::CheckoutConfig;
pub use error::{CheckoutError, Result, StoreError};
pub use events::{CheckoutCompleted, CheckoutFailed, CheckoutStarted};
pub use orchestrator::CheckoutOrchestrator;
pub use services::{
    InMemoryOrderService, InventoryClient, OrderClient, OrderRecord, OrderRequest, OrderStatus,
    PaymentClient, ServiceError,
};
pub use session::{Address, CheckoutItem, CheckoutSession, StartCheckout, payment_idempotency_key};
pub use state::CheckoutStatus;
pub use store::{InMemorySessionStore, PostgresSessionStore, SessionStore};
pub use sweeper::{ExpirationSweeper, SweepReport, SweeperHandle};
