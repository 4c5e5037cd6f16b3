//! HTTP router configuration.
//!
//! This module provides functions to build the Axum router with all
//! necessary routes and middleware.

use std::time::Duration;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use tower::Layer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handler::{health_check, readiness_check};
use crate::middleware::wasm_middleware;
use crate::state::AppState;

/// Build the main application router.
///
/// Routes:
/// - `GET /health` - Health check
/// - `GET /ready` - Readiness check with pool occupancy
/// - everything else - through the guest to `downstream`
pub fn build_router(state: AppState, downstream: Router, request_timeout: Duration) -> Router {
    let guarded = from_fn_with_state(state.clone(), wasm_middleware).layer(downstream);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(state)
        .fallback_service(guarded)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
}
