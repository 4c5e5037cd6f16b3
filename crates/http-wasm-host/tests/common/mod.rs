//! Shared fixtures: an in-memory exchange and a recording host.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use http_wasm_common::{HostError, RuntimeConfig};
use http_wasm_core::{BodyChunk, Host};
use http_wasm_host::Runtime;

/// An exchange backed by plain fields.
#[derive(Debug, Clone)]
pub struct TestExchange {
    pub method: String,
    pub path: String,
    pub protocol: String,
    pub request_headers: Vec<(String, Vec<u8>)>,
    pub request_body: Vec<u8>,
    request_cursor: usize,
    request_body_written: bool,
    pub response_headers: Vec<(String, String)>,
    pub status: Option<u32>,
    pub response_body: Vec<u8>,
    response_cursor: usize,
    response_body_written: bool,
    pub next_called: bool,
    /// Shared with the test so it can tell when the exchange was dropped.
    pub tracker: Arc<()>,
}

impl Default for TestExchange {
    fn default() -> Self {
        Self {
            method: "GET".into(),
            path: "/".into(),
            protocol: "HTTP/1.1".into(),
            request_headers: Vec::new(),
            request_body: Vec::new(),
            request_cursor: 0,
            request_body_written: false,
            response_headers: Vec::new(),
            status: None,
            response_body: Vec::new(),
            response_cursor: 0,
            response_body_written: false,
            next_called: false,
            tracker: Arc::new(()),
        }
    }
}

impl TestExchange {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.request_headers
            .push((name.into(), value.as_bytes().to_vec()));
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.request_body = body.as_bytes().to_vec();
        self
    }

    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.response_body).unwrap()
    }
}

/// A host that records what guests do to it.
#[derive(Debug, Default)]
pub struct TestHost {
    pub logs: Mutex<Vec<String>>,
    pub downstream_body: Vec<u8>,
    pub next_delay: Duration,
    pub fail_next: bool,
    pub fail_log: bool,
    pub hang_next: bool,
    pub downstream_calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl TestHost {
    pub fn new() -> Self {
        Self {
            downstream_body: b"downstream".to_vec(),
            ..Default::default()
        }
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().clone()
    }
}

fn read_chunk(body: &[u8], cursor: &mut usize, max: usize) -> BodyChunk {
    let start = (*cursor).min(body.len());
    let end = body.len().min(start.saturating_add(max));
    let bytes = body[start..end].to_vec();
    *cursor = end;
    BodyChunk::new(bytes, end == body.len())
}

fn write_body(body: &mut Vec<u8>, cursor: &mut usize, written: &mut bool, chunk: &[u8]) {
    if !*written {
        body.clear();
        *cursor = 0;
        *written = true;
    }
    body.extend_from_slice(chunk);
}

#[async_trait]
impl Host for TestHost {
    type Exchange = TestExchange;

    fn log(&self, _exchange: Option<&TestExchange>, message: &str) -> Result<(), HostError> {
        if self.fail_log {
            return Err(HostError::LogFailed {
                reason: "sink closed".into(),
            });
        }
        self.logs.lock().push(message.to_string());
        Ok(())
    }

    fn get_method(&self, exchange: &TestExchange) -> String {
        exchange.method.clone()
    }

    fn get_path(&self, exchange: &TestExchange) -> String {
        exchange.path.clone()
    }

    fn set_path(&self, exchange: &mut TestExchange, path: &str) -> Result<(), HostError> {
        exchange.path = path.to_string();
        Ok(())
    }

    fn get_protocol_version(&self, exchange: &TestExchange) -> String {
        exchange.protocol.clone()
    }

    fn get_request_header(&self, exchange: &TestExchange, name: &str) -> Option<Vec<u8>> {
        exchange
            .request_headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    fn read_request_body(
        &self,
        exchange: &mut TestExchange,
        max: usize,
    ) -> Result<BodyChunk, HostError> {
        Ok(read_chunk(
            &exchange.request_body,
            &mut exchange.request_cursor,
            max,
        ))
    }

    fn write_request_body(&self, exchange: &mut TestExchange, body: &[u8]) -> Result<(), HostError> {
        write_body(
            &mut exchange.request_body,
            &mut exchange.request_cursor,
            &mut exchange.request_body_written,
            body,
        );
        Ok(())
    }

    fn set_response_header(
        &self,
        exchange: &mut TestExchange,
        name: &str,
        value: &str,
    ) -> Result<(), HostError> {
        exchange
            .response_headers
            .retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        exchange
            .response_headers
            .push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn send_response(
        &self,
        exchange: &mut TestExchange,
        status: u32,
        body: &[u8],
    ) -> Result<(), HostError> {
        if !body.is_empty() && exchange.response_header("content-length").is_none() {
            exchange
                .response_headers
                .push(("Content-Length".into(), body.len().to_string()));
        }
        exchange.status = Some(status);
        exchange.response_body = body.to_vec();
        Ok(())
    }

    async fn next(&self, exchange: &mut TestExchange) -> Result<(), HostError> {
        self.downstream_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next {
            return Err(HostError::Downstream {
                reason: "connection refused".into(),
            });
        }

        if self.hang_next {
            std::future::pending::<()>().await;
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.next_delay.is_zero() {
            tokio::time::sleep(self.next_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        exchange.next_called = true;
        exchange.status = Some(200);
        exchange.response_body = self.downstream_body.clone();
        Ok(())
    }

    fn read_response_body(
        &self,
        exchange: &mut TestExchange,
        max: usize,
    ) -> Result<BodyChunk, HostError> {
        Ok(read_chunk(
            &exchange.response_body,
            &mut exchange.response_cursor,
            max,
        ))
    }

    fn write_response_body(
        &self,
        exchange: &mut TestExchange,
        body: &[u8],
    ) -> Result<(), HostError> {
        write_body(
            &mut exchange.response_body,
            &mut exchange.response_cursor,
            &mut exchange.response_body_written,
            body,
        );
        Ok(())
    }
}

/// Runtime configuration suited to tests: no pooling allocator, small pool.
pub fn test_config(pool_size: u32) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.engine.pooling_allocator = false;
    config.engine.optimize = false;
    config.pool.size = pool_size;
    config
}

/// Build a runtime for `wat` served by `host`.
pub async fn runtime(host: TestHost, wat: &str) -> Runtime<TestHost> {
    Runtime::builder(host)
        .config(test_config(2))
        .build(wat.as_bytes())
        .await
        .unwrap()
}
