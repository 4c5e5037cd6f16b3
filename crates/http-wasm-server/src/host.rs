//! [`Host`] implementation over axum requests.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use http_wasm_common::HostError;
use http_wasm_core::{BodyChunk, Host};

use crate::exchange::HttpExchange;

/// Receives messages guests log, with the exchange being served if any.
///
/// An error fails the guest invocation that logged.
pub type LogSink =
    Arc<dyn Fn(Option<&HttpExchange>, &str) -> Result<(), HostError> + Send + Sync>;

/// Serves guest capabilities from an [`HttpExchange`].
#[derive(Clone, Default)]
pub struct AxumHost {
    logger: Option<LogSink>,
}

impl AxumHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send guest log messages to `sink` instead of `tracing`.
    #[must_use]
    pub fn with_logger(
        mut self,
        sink: impl Fn(Option<&HttpExchange>, &str) -> Result<(), HostError> + Send + Sync + 'static,
    ) -> Self {
        self.logger = Some(Arc::new(sink));
        self
    }
}

impl std::fmt::Debug for AxumHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxumHost")
            .field("custom_logger", &self.logger.is_some())
            .finish()
    }
}

#[async_trait]
impl Host for AxumHost {
    type Exchange = HttpExchange;

    fn log(&self, exchange: Option<&HttpExchange>, message: &str) -> Result<(), HostError> {
        if let Some(sink) = &self.logger {
            return sink(exchange, message);
        }
        info!(
            guest_log = true,
            exchange_id = exchange.map(HttpExchange::id),
            "{message}"
        );
        Ok(())
    }

    fn get_method(&self, exchange: &HttpExchange) -> String {
        exchange.method().to_string()
    }

    fn get_path(&self, exchange: &HttpExchange) -> String {
        exchange.uri().path().to_string()
    }

    fn set_path(&self, exchange: &mut HttpExchange, path: &str) -> Result<(), HostError> {
        exchange.set_path(path)
    }

    fn get_protocol_version(&self, exchange: &HttpExchange) -> String {
        exchange.protocol().to_string()
    }

    fn get_request_header(&self, exchange: &HttpExchange, name: &str) -> Option<Vec<u8>> {
        exchange
            .request_headers()
            .get(name)
            .map(|value| value.as_bytes().to_vec())
    }

    fn read_request_body(
        &self,
        exchange: &mut HttpExchange,
        max: usize,
    ) -> Result<BodyChunk, HostError> {
        Ok(exchange.read_request_body(max))
    }

    fn write_request_body(&self, exchange: &mut HttpExchange, body: &[u8]) -> Result<(), HostError> {
        exchange.write_request_body(body)
    }

    fn set_response_header(
        &self,
        exchange: &mut HttpExchange,
        name: &str,
        value: &str,
    ) -> Result<(), HostError> {
        exchange.set_response_header(name, value)
    }

    fn send_response(
        &self,
        exchange: &mut HttpExchange,
        status: u32,
        body: &[u8],
    ) -> Result<(), HostError> {
        exchange.respond(status, body)
    }

    async fn next(&self, exchange: &mut HttpExchange) -> Result<(), HostError> {
        let (request, next) = exchange.dispatch()?;

        debug!(
            exchange_id = exchange.id(),
            uri = %request.uri(),
            "Forwarding request downstream"
        );
        let response = next.run(request).await;
        exchange.absorb(response).await
    }

    fn read_response_body(
        &self,
        exchange: &mut HttpExchange,
        max: usize,
    ) -> Result<BodyChunk, HostError> {
        Ok(exchange.read_response_body(max))
    }

    fn write_response_body(
        &self,
        exchange: &mut HttpExchange,
        body: &[u8],
    ) -> Result<(), HostError> {
        exchange.write_response_body(body)
    }
}
