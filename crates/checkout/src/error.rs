//! Checkout error types.

use std::time::Duration;

use common::SessionId;
use thiserror::Error;

use crate::state::CheckoutStatus;

/// Session persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("checkout session not found: {0}")]
    NotFound(SessionId),

    /// The stored version moved on since the session was loaded.
    #[error("version conflict on session {id}: expected {expected}, actual {actual}")]
    Conflict { id: SessionId, expected: i64, actual: i64 },

    #[error("checkout session already exists: {0}")]
    Duplicate(SessionId),

    #[error("invalid stored data: {0}")]
    InvalidData(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Errors surfaced by the checkout orchestrator.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The request was rejected before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("checkout session not found: {0}")]
    NotFound(SessionId),

    /// Another writer saved the session first.
    #[error("session {id} was modified concurrently (expected version {expected})")]
    Conflict { id: SessionId, expected: i64 },

    #[error("session {id} is {status}")]
    InvalidState { id: SessionId, status: CheckoutStatus },

    /// A collaborator refused the step, e.g. insufficient stock.
    #[error("step '{step}' rejected: {reason}")]
    StepRejected { step: &'static str, reason: String },

    #[error("step '{step}' timed out after {after:?}")]
    DownstreamTimeout { step: &'static str, after: Duration },

    #[error("step '{step}' short-circuited: breaker open for {target}")]
    BreakerOpen { step: &'static str, target: String },

    /// A collaborator was unreachable or failed internally.
    #[error("step '{step}' failed: {reason}")]
    Downstream { step: &'static str, reason: String },

    /// Compensation could not restore consistency; the session needs
    /// reconciliation.
    #[error("compensation failed for session {id}: {}", errors.join("; "))]
    CompensationFailure { id: SessionId, errors: Vec<String> },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl CheckoutError {
    /// Classification used for metric labels and HTTP status mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) | Self::Store(StoreError::NotFound(_)) => "not_found",
            Self::Conflict { .. } | Self::InvalidState { .. } | Self::Store(StoreError::Conflict { .. }) => {
                "conflict"
            }
            Self::StepRejected { .. } => "business",
            Self::DownstreamTimeout { .. } | Self::BreakerOpen { .. } | Self::Downstream { .. } => {
                "transient"
            }
            Self::CompensationFailure { .. } => "fatal",
            Self::Store(_) => "internal",
        }
    }

    /// True for downstream timeouts and outages.
    pub fn is_transient(&self) -> bool {
        self.kind() == "transient"
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
