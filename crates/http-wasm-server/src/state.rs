//! Shared application state.
//!
//! This module provides [`AppState`], which holds shared resources
//! across all HTTP request handlers.

use std::sync::Arc;

use http_wasm_host::Runtime;

use crate::host::AxumHost;
use crate::response::ErrorPolicy;

/// Shared state across all request handlers.
///
/// This struct is cloned for each request, so it uses `Arc` for shared data.
#[derive(Clone)]
pub struct AppState {
    /// Compiled guest and its instance pool.
    runtime: Arc<Runtime<AxumHost>>,

    /// How failed exchanges are answered.
    policy: ErrorPolicy,

    /// Largest request or downstream response body buffered for a guest.
    max_body_bytes: usize,
}

impl AppState {
    /// Create new application state.
    pub fn new(runtime: Runtime<AxumHost>, policy: ErrorPolicy, max_body_bytes: usize) -> Self {
        Self {
            runtime: Arc::new(runtime),
            policy,
            max_body_bytes,
        }
    }

    /// Get the guest runtime.
    pub fn runtime(&self) -> &Runtime<AxumHost> {
        &self.runtime
    }

    /// Get the error policy.
    pub fn policy(&self) -> &ErrorPolicy {
        &self.policy
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("pool", &self.runtime.stats())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
