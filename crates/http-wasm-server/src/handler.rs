//! Health and readiness handlers.
//!
//! These routes bypass the guest so probes keep working while the pool is
//! saturated.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use http_wasm_core::PoolStats;

use crate::state::AppState;

/// Body of the readiness response.
#[derive(Debug, Serialize)]
pub struct Readiness {
    pub status: &'static str,
    pub content_hash: String,
    pub pool: PoolStats,
}

/// Health check handler.
///
/// Returns 200 OK if the server is running.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
///
/// Returns 200 with pool occupancy, or 503 once the runtime is closed.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let runtime = state.runtime();
    let pool = runtime.stats();
    let (status, label) = if pool.closed {
        (StatusCode::SERVICE_UNAVAILABLE, "closed")
    } else {
        (StatusCode::OK, "ready")
    };

    let body = Readiness {
        status: label,
        content_hash: runtime.module().content_hash().to_string(),
        pool,
    };
    (status, Json(body))
}
