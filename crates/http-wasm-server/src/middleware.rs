//! The guest middleware.
//!
//! Every request that is not a health probe runs through the guest. The
//! guest either answers it directly or calls `next`, which forwards the
//! request to the wrapped router.

use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, instrument};

use http_wasm_common::RuntimeError;
use http_wasm_core::Invocation;

use crate::exchange::HttpExchange;
use crate::state::AppState;

/// Run the request through a pooled guest instance.
///
/// Install with [`axum::middleware::from_fn_with_state`].
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn wasm_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();

    let exchange = match HttpExchange::from_request(request, state.max_body_bytes()).await {
        Ok(exchange) => exchange.with_next(next),
        Err(e) => return state.policy().respond(&RuntimeError::Host(e)),
    };

    let invocation = match state.runtime().handle(exchange).await {
        Ok(invocation) => invocation,
        Err(e) => return state.policy().respond(&e),
    };

    let Invocation {
        guest_id,
        exchange,
        result,
    } = invocation;

    match (result, exchange) {
        (Ok(outcome), Some(exchange)) => {
            debug!(
                guest_id,
                exchange_id = exchange.id(),
                ?outcome,
                duration_ms = start.elapsed().as_millis(),
                "Exchange completed"
            );
            exchange.into_response()
        }
        (Err(e), _) => state.policy().respond(&e),
        (Ok(_), None) => state
            .policy()
            .respond(&RuntimeError::trap("exchange was not returned", None)),
    }
}
