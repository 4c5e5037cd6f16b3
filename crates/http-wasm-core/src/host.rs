//! The host capability interface.
//!
//! A concrete HTTP server adapts its native request/response objects to
//! [`Host`]. The dispatch table that serves guest imports is written purely
//! in terms of this trait: it marshals guest memory, then calls exactly one
//! capability method. Nothing here knows which server is on the other side.
//!
//! # Exchanges
//!
//! [`Host::Exchange`] is the per-request handle an adapter uses to reach the
//! real request and response. The runtime binds one exchange to a guest
//! instance for the length of a single `handle` call and hands it back
//! afterwards, so an instance never holds on to a request it is not serving.

use async_trait::async_trait;
use tracing::info;

use http_wasm_common::HostError;

use crate::abi::BodyChunk;

/// Capabilities a server engine exposes to guests.
///
/// All methods except [`Host::next`] are synchronous: they only touch state
/// already buffered in the exchange. `next` runs the downstream handler and
/// may await I/O.
#[async_trait]
pub trait Host: Send + Sync + 'static {
    /// Per-request state the adapter needs to serve one exchange.
    type Exchange: Send + 'static;

    /// Record a message logged by the guest.
    ///
    /// `exchange` is `None` when the guest logs during `_start`. Returning an
    /// error traps the guest.
    fn log(&self, exchange: Option<&Self::Exchange>, message: &str) -> Result<(), HostError> {
        let _ = exchange;
        info!(guest_log = true, "{message}");
        Ok(())
    }

    /// Request method, e.g. `GET`.
    fn get_method(&self, exchange: &Self::Exchange) -> String;

    /// Request path without the query string.
    fn get_path(&self, exchange: &Self::Exchange) -> String;

    /// Replace the request path. The query string is left as is.
    fn set_path(&self, exchange: &mut Self::Exchange, path: &str) -> Result<(), HostError>;

    /// Protocol version, e.g. `HTTP/1.1`.
    fn get_protocol_version(&self, exchange: &Self::Exchange) -> String;

    /// Look up a request header by case-insensitive name.
    ///
    /// `Some(vec![])` is a header that is present but empty.
    fn get_request_header(&self, exchange: &Self::Exchange, name: &str) -> Option<Vec<u8>>;

    /// Read up to `max` bytes of the request body.
    fn read_request_body(
        &self,
        exchange: &mut Self::Exchange,
        max: usize,
    ) -> Result<BodyChunk, HostError>;

    /// Write to the request body forwarded by `next`.
    ///
    /// The first write in an exchange replaces the body; later writes append.
    fn write_request_body(
        &self,
        exchange: &mut Self::Exchange,
        body: &[u8],
    ) -> Result<(), HostError>;

    /// Set or overwrite a response header.
    fn set_response_header(
        &self,
        exchange: &mut Self::Exchange,
        name: &str,
        value: &str,
    ) -> Result<(), HostError>;

    /// Answer the request directly.
    ///
    /// When `body` is non-empty and no `Content-Length` was set, the adapter
    /// sets it to `body.len()`.
    fn send_response(
        &self,
        exchange: &mut Self::Exchange,
        status: u32,
        body: &[u8],
    ) -> Result<(), HostError>;

    /// Delegate the request to the downstream handler.
    async fn next(&self, exchange: &mut Self::Exchange) -> Result<(), HostError>;

    /// Read up to `max` bytes of the downstream response body.
    fn read_response_body(
        &self,
        exchange: &mut Self::Exchange,
        max: usize,
    ) -> Result<BodyChunk, HostError>;

    /// Write to the response body returned to the client.
    ///
    /// The first write in an exchange replaces the downstream body; later
    /// writes append.
    fn write_response_body(
        &self,
        exchange: &mut Self::Exchange,
        body: &[u8],
    ) -> Result<(), HostError>;
}
