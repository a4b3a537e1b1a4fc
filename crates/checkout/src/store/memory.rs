use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::SessionId;
use parking_lot::Mutex;

use super::{SessionStore, StoreResult};
use crate::error::StoreError;
use crate::session::CheckoutSession;

#[derive(Debug, Default)]
struct InMemoryState {
    sessions: HashMap<SessionId, CheckoutSession>,
    fail_next_saves: u32,
}

/// In-memory session store for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` saves fail as if the database were unreachable.
    pub fn set_fail_next_saves(&self, count: u32) {
        self.state.lock().fail_next_saves = count;
    }

    pub fn len(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrites a record, bypassing the version check.
    pub fn put(&self, session: CheckoutSession) {
        self.state.lock().sessions.insert(session.id, session);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: &CheckoutSession) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.sessions.contains_key(&session.id) {
            return Err(StoreError::Duplicate(session.id));
        }
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn load(&self, id: SessionId) -> StoreResult<Option<CheckoutSession>> {
        Ok(self.state.lock().sessions.get(&id).cloned())
    }

    async fn save(&self, session: &CheckoutSession) -> StoreResult<CheckoutSession> {
        let mut state = self.state.lock();
        if state.fail_next_saves > 0 {
            state.fail_next_saves -= 1;
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let stored = state
            .sessions
            .get_mut(&session.id)
            .ok_or(StoreError::NotFound(session.id))?;
        if stored.version != session.version {
            return Err(StoreError::Conflict {
                id: session.id,
                expected: session.version,
                actual: stored.version,
            });
        }

        let mut next = session.clone();
        next.version = stored.version + 1;
        next.cancel_requested = stored.cancel_requested.clone();
        *stored = next.clone();
        Ok(next)
    }

    async fn request_cancel(
        &self,
        id: SessionId,
        reason: &str,
    ) -> StoreResult<Option<CheckoutSession>> {
        let mut state = self.state.lock();
        let Some(stored) = state.sessions.get_mut(&id) else {
            return Ok(None);
        };
        if !stored.is_terminal() && stored.cancel_requested.is_none() {
            stored.cancel_requested = Some(reason.to_string());
        }
        Ok(Some(stored.clone()))
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<SessionId>> {
        let state = self.state.lock();
        let mut expired: Vec<_> = state
            .sessions
            .values()
            .filter(|s| s.is_expired_at(now))
            .map(|s| (s.expires_at, s.id))
            .collect();
        expired.sort();
        Ok(expired.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn list_needing_reconciliation(&self, limit: usize) -> StoreResult<Vec<SessionId>> {
        let state = self.state.lock();
        let mut flagged: Vec<_> = state
            .sessions
            .values()
            .filter(|s| s.reconciliation_required)
            .map(|s| (s.updated_at, s.id))
            .collect();
        flagged.sort();
        Ok(flagged.into_iter().take(limit).map(|(_, id)| id).collect())
    }
}
