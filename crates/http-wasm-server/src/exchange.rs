//! Per-request exchange state for axum.
//!
//! An [`HttpExchange`] is what a guest instance sees of one HTTP request.
//! The request body is buffered up front so the guest can read it in
//! chunks and rewrite it; the downstream response is buffered after `next`
//! for the same reason.

use axum::body::{Body, to_bytes};
use axum::extract::Request;
use axum::http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, Version};
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use uuid::Uuid;

use http_wasm_common::HostError;
use http_wasm_core::BodyChunk;

/// A body buffered in memory with a read cursor.
///
/// The first write replaces the buffered content; later writes append.
#[derive(Debug, Default)]
struct BufferedBody {
    bytes: Vec<u8>,
    cursor: usize,
    written: bool,
}

impl BufferedBody {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            cursor: 0,
            written: false,
        }
    }

    fn read(&mut self, max: usize) -> BodyChunk {
        let start = self.cursor.min(self.bytes.len());
        let end = self.bytes.len().min(start.saturating_add(max));
        let chunk = self.bytes[start..end].to_vec();
        self.cursor = end;
        BodyChunk::new(chunk, end == self.bytes.len())
    }

    fn write(&mut self, chunk: &[u8], limit: usize) -> Result<(), HostError> {
        let base = if self.written { self.bytes.len() } else { 0 };
        if base + chunk.len() > limit {
            return Err(HostError::BodyTooLarge { limit });
        }
        // A replacement body is read from its start
        if !self.written {
            self.bytes.clear();
            self.cursor = 0;
            self.written = true;
        }
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    fn replace(&mut self, bytes: Vec<u8>) {
        *self = Self::new(bytes);
    }
}

/// One HTTP request as served to a guest, and the response it produces.
pub struct HttpExchange {
    id: String,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    request_body: BufferedBody,
    status: Option<StatusCode>,
    response_headers: HeaderMap,
    response_body: BufferedBody,
    next: Option<Next>,
    max_body_bytes: usize,
}

impl HttpExchange {
    /// Buffer `request` and wrap it for a guest.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::BodyTooLarge`] when the body exceeds
    /// `max_body_bytes`.
    pub async fn from_request(request: Request, max_body_bytes: usize) -> Result<Self, HostError> {
        let (parts, body) = request.into_parts();
        let body = to_bytes(body, max_body_bytes)
            .await
            .map_err(|_| HostError::BodyTooLarge {
                limit: max_body_bytes,
            })?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            request_body: BufferedBody::new(body.to_vec()),
            status: None,
            response_headers: HeaderMap::new(),
            response_body: BufferedBody::default(),
            next: None,
            max_body_bytes,
        })
    }

    /// Attach the downstream handler `next` forwards to.
    #[must_use]
    pub fn with_next(mut self, next: Next) -> Self {
        self.next = Some(next);
        self
    }

    /// Unique id for log correlation.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Protocol version in its wire form, e.g. `HTTP/1.1`.
    pub fn protocol(&self) -> &'static str {
        match self.version {
            Version::HTTP_09 => "HTTP/0.9",
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_2 => "HTTP/2.0",
            Version::HTTP_3 => "HTTP/3.0",
            _ => "HTTP/1.1",
        }
    }

    pub fn request_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Current request body, including guest rewrites.
    pub fn request_body(&self) -> &[u8] {
        &self.request_body.bytes
    }

    /// Status set by the guest or the downstream handler.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub fn response_body(&self) -> &[u8] {
        &self.response_body.bytes
    }

    /// Replace the request path, keeping the query string.
    ///
    /// An empty path becomes `/`.
    pub fn set_path(&mut self, path: &str) -> Result<(), HostError> {
        let invalid = || HostError::InvalidPath {
            path: path.to_string(),
        };
        if path.contains('?') {
            return Err(invalid());
        }

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let path_and_query = match self.uri.query() {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };

        let mut parts = self.uri.clone().into_parts();
        parts.path_and_query =
            Some(PathAndQuery::try_from(path_and_query.as_str()).map_err(|_| invalid())?);
        self.uri = Uri::from_parts(parts).map_err(|_| invalid())?;
        Ok(())
    }

    pub fn read_request_body(&mut self, max: usize) -> BodyChunk {
        self.request_body.read(max)
    }

    pub fn write_request_body(&mut self, chunk: &[u8]) -> Result<(), HostError> {
        self.request_body.write(chunk, self.max_body_bytes)
    }

    /// Set or overwrite a response header.
    pub fn set_response_header(&mut self, name: &str, value: &str) -> Result<(), HostError> {
        let invalid = || HostError::InvalidHeader {
            name: name.to_string(),
        };
        let name = HeaderName::try_from(name).map_err(|_| invalid())?;
        let value = HeaderValue::try_from(value).map_err(|_| invalid())?;
        self.response_headers.insert(name, value);
        Ok(())
    }

    /// Answer the request from the guest.
    ///
    /// A non-empty body without an explicit `Content-Length` gets one.
    pub fn respond(&mut self, status: u32, body: &[u8]) -> Result<(), HostError> {
        let status = u16::try_from(status)
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or(HostError::InvalidStatus { code: status })?;

        if !body.is_empty() && !self.response_headers.contains_key(CONTENT_LENGTH) {
            self.response_headers
                .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }
        self.status = Some(status);
        self.response_body.replace(body.to_vec());
        Ok(())
    }

    /// Take the downstream handler and the request to send it.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Downstream`] if there is no downstream handler,
    /// it was already taken, or the request cannot be rebuilt.
    pub fn dispatch(&mut self) -> Result<(Request, Next), HostError> {
        let next = self.next.take().ok_or_else(|| HostError::Downstream {
            reason: "no downstream handler".to_string(),
        })?;
        let request = self.downstream_request()?;
        Ok((request, next))
    }

    /// The request as it goes downstream, with guest rewrites applied.
    ///
    /// The buffered body stays in place so the guest can keep reading it.
    fn downstream_request(&self) -> Result<Request, HostError> {
        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone())
            .version(self.version);
        if let Some(headers) = builder.headers_mut() {
            headers.clone_from(&self.headers);
            if self.request_body.written {
                headers.insert(
                    CONTENT_LENGTH,
                    HeaderValue::from(self.request_body.bytes.len()),
                );
                headers.remove(TRANSFER_ENCODING);
            }
        }

        builder
            .body(Body::from(self.request_body.bytes.clone()))
            .map_err(|e| HostError::Downstream {
                reason: format!("Failed to build downstream request: {e}"),
            })
    }

    /// Buffer the downstream response.
    ///
    /// Downstream headers win over ones the guest set earlier under the
    /// same name.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::BodyTooLarge`] when the body exceeds
    /// `max_body_bytes`.
    pub async fn absorb(&mut self, response: Response) -> Result<(), HostError> {
        let (parts, body) = response.into_parts();
        let body = to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|_| HostError::BodyTooLarge {
                limit: self.max_body_bytes,
            })?;
        self.absorb_buffered(parts.status, &parts.headers, body);
        Ok(())
    }

    fn absorb_buffered(&mut self, status: StatusCode, headers: &HeaderMap, body: Bytes) {
        for name in headers.keys() {
            self.response_headers.remove(name);
        }
        for (name, value) in headers {
            self.response_headers.append(name.clone(), value.clone());
        }
        self.response_headers.remove(TRANSFER_ENCODING);
        self.response_headers.remove(CONNECTION);
        self.response_headers
            .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

        self.status = Some(status);
        self.response_body.replace(body.to_vec());
    }

    pub fn read_response_body(&mut self, max: usize) -> BodyChunk {
        self.response_body.read(max)
    }

    /// Write to the response body, keeping `Content-Length` in step.
    pub fn write_response_body(&mut self, chunk: &[u8]) -> Result<(), HostError> {
        self.response_body.write(chunk, self.max_body_bytes)?;
        self.response_headers.insert(
            CONTENT_LENGTH,
            HeaderValue::from(self.response_body.bytes.len()),
        );
        Ok(())
    }

    /// Build the response returned to the client.
    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.response_body.bytes));
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.response_headers;
        response
    }
}

impl std::fmt::Debug for HttpExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpExchange")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("status", &self.status)
            .field("dispatched", &self.next.is_none())
            .finish_non_exhaustive()
    }
}
