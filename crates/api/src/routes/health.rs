//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use resilience::{Breaker, BreakerState};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` while any downstream breaker is not closed.
    pub status: &'static str,
    pub breakers: BreakerStates,
}

#[derive(Serialize)]
pub struct BreakerStates {
    pub inventory: &'static str,
    pub order: &'static str,
    pub payment: &'static str,
}

/// GET /health
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let breakers = state.orchestrator.breakers();
    let states = [
        breakers.inventory.state(),
        breakers.order.state(),
        breakers.payment.state(),
    ];
    let status = if states.iter().all(|s| *s == BreakerState::Closed) {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        breakers: BreakerStates {
            inventory: states[0].as_str(),
            order: states[1].as_str(),
            payment: states[2].as_str(),
        },
    })
}
