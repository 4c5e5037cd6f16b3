//! Reverse proxy to an upstream HTTP server.
//!
//! Used as the downstream handler in the binary: a request the guest
//! passes on with `next` is forwarded to the upstream, and the upstream's
//! response comes back through the guest.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::header::{CONNECTION, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use http_wasm_common::RuntimeError;

use crate::response::error_response;

/// Forwards requests to a fixed upstream base URL.
#[derive(Debug, Clone)]
pub struct UpstreamProxy {
    client: Client,
    base: Url,
    max_body_bytes: usize,
}

impl UpstreamProxy {
    /// Create a proxy to `base`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidConfig`] if `base` is not an absolute
    /// http(s) URL or the HTTP client cannot be built.
    pub fn new(base: &str, max_body_bytes: usize) -> Result<Self, RuntimeError> {
        let base = Url::parse(base)
            .map_err(|e| RuntimeError::invalid_config(format!("Invalid upstream URL: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(RuntimeError::invalid_config(format!(
                "Upstream must be http or https, got '{}'",
                base.scheme()
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to build client: {e}")))?;

        Ok(Self {
            client,
            base,
            max_body_bytes,
        })
    }

    /// Upstream URL for a request path and query.
    pub fn target(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.base.clone();
        let joined = format!("{}{}", self.base.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        url.set_query(query);
        url
    }

    /// A router that forwards every request to the upstream.
    pub fn into_router(self) -> Router {
        Router::new()
            .fallback(forward)
            .with_state(Arc::new(self))
    }

    async fn send(&self, request: Request) -> Result<Response, String> {
        let (parts, body) = request.into_parts();
        let body = to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|e| format!("Failed to read request body: {e}"))?;
        let url = self.target(parts.uri.path(), parts.uri.query());

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(HOST);

        debug!(method = %parts.method, url = %url, "Proxying request");
        let upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| format!("Upstream request failed: {e}"))?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = upstream
            .bytes()
            .await
            .map_err(|e| format!("Failed to read upstream body: {e}"))?;

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    headers.remove(CONNECTION);
    headers.remove(TRANSFER_ENCODING);
}

async fn forward(State(proxy): State<Arc<UpstreamProxy>>, request: Request) -> Response {
    match proxy.send(request).await {
        Ok(response) => response,
        Err(reason) => {
            warn!(reason = %reason, "Upstream unavailable");
            error_response(StatusCode::BAD_GATEWAY, &reason)
        }
    }
}
