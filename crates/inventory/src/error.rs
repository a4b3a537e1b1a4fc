use common::{ProductId, ReservationId, VariantId};
use thiserror::Error;

use crate::types::ReservationStatus;

/// Errors that can occur in stock and reservation operations.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The request was malformed. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    #[error("Stock not found for {product_id}/{variant_id}")]
    StockNotFound {
        product_id: ProductId,
        variant_id: VariantId,
    },

    /// Not enough unreserved stock. A business outcome, not a fault.
    #[error(
        "Insufficient stock for {product_id}/{variant_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        variant_id: VariantId,
        requested: i64,
        available: i64,
    },

    #[error("Invalid transition for reservation {id}: {from} -> {to}")]
    InvalidTransition {
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    },

    /// The backing store could not be reached.
    #[error("Inventory unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl InventoryError {
    /// Faults of the inventory service itself, as opposed to business outcomes.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Database(_))
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
