//! Stock level endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use inventory::{AdjustmentReason, Stock};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub delta: i64,
    pub reason: AdjustmentReason,
    #[serde(default)]
    pub reference_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StockResponse {
    pub product_id: String,
    pub variant_id: String,
    pub total: i64,
    pub reserved: i64,
    pub sold: i64,
    pub available: i64,
}

impl From<Stock> for StockResponse {
    fn from(stock: Stock) -> Self {
        Self {
            available: stock.available(),
            product_id: stock.product_id.as_str().to_string(),
            variant_id: stock.variant_id.as_str().to_string(),
            total: stock.total,
            reserved: stock.reserved,
            sold: stock.sold,
        }
    }
}

/// GET /inventory/{product}/{variant}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path((product, variant)): Path<(String, String)>,
) -> Result<Json<StockResponse>, ApiError> {
    let stock = state
        .reservations
        .get_stock(&product.as_str().into(), &variant.as_str().into())
        .await?;
    Ok(Json(stock.into()))
}

/// POST /inventory/{product}/{variant}/adjust
#[tracing::instrument(skip(state, req), fields(delta = req.delta, reason = %req.reason))]
pub async fn adjust(
    State(state): State<Arc<AppState>>,
    Path((product, variant)): Path<(String, String)>,
    Json(req): Json<AdjustRequest>,
) -> Result<Json<StockResponse>, ApiError> {
    if req.delta == 0 {
        return Err(ApiError::BadRequest("delta must not be zero".to_string()));
    }
    let stock = state
        .reservations
        .adjust_quantity(
            product.as_str().into(),
            variant.as_str().into(),
            req.delta,
            req.reason,
            req.reference_id,
        )
        .await?;
    Ok(Json(stock.into()))
}
