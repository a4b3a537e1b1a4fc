//! Checkout session endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use checkout::{CheckoutSession, CheckoutStatus, StartCheckout};
use common::SessionId;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_CANCEL_REASON: &str = "canceled by customer";

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunAccepted {
    pub session_id: SessionId,
    pub status: CheckoutStatus,
}

/// POST /checkout: validate and persist a new session.
#[tracing::instrument(skip(state, command), fields(user_id = %command.user_id))]
pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(command): Json<StartCheckout>,
) -> Result<(StatusCode, Json<CheckoutSession>), ApiError> {
    let session = state.orchestrator.start_checkout(command).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /checkout/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CheckoutSession>, ApiError> {
    let id = parse_session_id(&id)?;
    Ok(Json(state.orchestrator.get_session(id).await?))
}

/// POST /checkout/{id}/advance: run the step for the current status.
#[tracing::instrument(skip(state))]
pub async fn advance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CheckoutSession>, ApiError> {
    let id = parse_session_id(&id)?;
    Ok(Json(state.orchestrator.advance(id).await?))
}

/// POST /checkout/{id}/run: drive the session to a terminal status in the
/// background. Poll `GET /checkout/{id}` for the outcome.
#[tracing::instrument(skip(state))]
pub async fn run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<RunAccepted>), ApiError> {
    let id = parse_session_id(&id)?;
    let session = state.orchestrator.get_session(id).await?;

    if !session.is_terminal() {
        let orchestrator = state.orchestrator.clone();
        tokio::spawn(async move {
            match orchestrator.run_to_completion(id).await {
                Ok(session) => {
                    tracing::info!(session_id = %id, status = %session.status, "checkout run finished")
                }
                Err(e) => tracing::warn!(session_id = %id, error = %e, "checkout run stopped"),
            }
        });
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            session_id: id,
            status: session.status,
        }),
    ))
}

/// POST /checkout/{id}/cancel
#[tracing::instrument(skip(state, req))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<CheckoutSession>, ApiError> {
    let id = parse_session_id(&id)?;
    let reason = req
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
    Ok(Json(state.orchestrator.request_cancel(id, &reason).await?))
}

fn parse_session_id(id: &str) -> Result<SessionId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid session ID: {e}")))
}
