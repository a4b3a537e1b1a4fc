use common::PaymentId;
use thiserror::Error;

use crate::types::PaymentStatus;

/// Errors that can occur in payment operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payment not found: {0}")]
    NotFound(PaymentId),

    /// Another payment already owns the idempotency key.
    #[error("Idempotency key already used: {0}")]
    Conflict(String),

    #[error("Cannot {action} payment {id} in status {status}")]
    InvalidTransition {
        id: PaymentId,
        status: PaymentStatus,
        action: &'static str,
    },

    /// The gateway could not be reached; the outcome of the call is unknown.
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl PaymentError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::GatewayUnavailable(_) | Self::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
