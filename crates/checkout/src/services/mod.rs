//! Collaborators the checkout saga calls, one narrow trait per capability.

pub mod inventory;
pub mod order;
pub mod payment;

pub use inventory::InventoryClient;
pub use order::{InMemoryOrderService, OrderClient, OrderRecord, OrderRequest, OrderStatus};
pub use payment::PaymentClient;

use thiserror::Error;

/// How a collaborator call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The collaborator answered and refused, e.g. insufficient stock.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The collaborator could not be reached or failed internally.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    /// Whether the error says something about the collaborator's health.
    /// Only these count against its circuit breaker.
    pub fn is_failure(&self) -> bool {
        matches!(self, ServiceError::Unavailable(_))
    }
}
