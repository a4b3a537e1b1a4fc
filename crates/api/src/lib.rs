//! HTTP API server for the checkout platform.
//!
//! Exposes checkout sessions and stock levels over REST, with structured
//! logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{AppState, Backends, create_state};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkout", post(routes::checkout::start))
        .route("/checkout/{id}", get(routes::checkout::get))
        .route("/checkout/{id}/advance", post(routes::checkout::advance))
        .route("/checkout/{id}/run", post(routes::checkout::run))
        .route("/checkout/{id}/cancel", post(routes::checkout::cancel))
        .route("/inventory/{product}/{variant}", get(routes::inventory::get))
        .route(
            "/inventory/{product}/{variant}/adjust",
            post(routes::inventory::adjust),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
