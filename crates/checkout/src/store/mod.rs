//! Checkout session persistence.

mod memory;
mod postgres;

pub use memory::InMemorySessionStore;
pub use postgres::PostgresSessionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::SessionId;

use crate::error::StoreError;
use crate::session::CheckoutSession;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable home of [`CheckoutSession`] records.
///
/// Saves are compare-and-swap on `version`. The cancellation flag is written
/// out of band and survives every save.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new session. Fails with `Duplicate` if the id exists.
    async fn insert(&self, session: &CheckoutSession) -> StoreResult<()>;

    async fn load(&self, id: SessionId) -> StoreResult<Option<CheckoutSession>>;

    /// Writes `session` if the stored version still equals `session.version`.
    ///
    /// Returns the stored record: version incremented, `cancel_requested`
    /// taken from the stored row.
    async fn save(&self, session: &CheckoutSession) -> StoreResult<CheckoutSession>;

    /// Records a cancellation reason on a non-terminal session without
    /// touching its version. The first reason wins.
    ///
    /// Returns the current record, or `None` if the session does not exist.
    async fn request_cancel(
        &self,
        id: SessionId,
        reason: &str,
    ) -> StoreResult<Option<CheckoutSession>>;

    /// Non-terminal sessions whose deadline is at or before `now`, oldest first.
    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<SessionId>>;

    /// Failed sessions flagged for reconciliation, least recently touched first.
    async fn list_needing_reconciliation(&self, limit: usize) -> StoreResult<Vec<SessionId>>;
}
