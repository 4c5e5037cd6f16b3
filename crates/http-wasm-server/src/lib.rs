//! HTTP server for http-wasm guests.
//!
//! This crate puts a guest in front of an axum router. It handles:
//!
//! - Adapting axum requests and responses to the guest ABI ([`HttpExchange`], [`AxumHost`])
//! - Running every non-probe request through a pooled guest instance
//! - Forwarding delegated requests downstream, e.g. to an upstream via [`UpstreamProxy`]
//! - Health and readiness checks
//!
//! # Quick Start
//!
//! ```ignore
//! use http_wasm_host::Runtime;
//! use http_wasm_server::{AxumHost, HttpWasmServer, UpstreamProxy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let wasm = std::fs::read("auth.wasm")?;
//!     let runtime = Runtime::builder(AxumHost::new()).build(&wasm).await?;
//!     let upstream = UpstreamProxy::new("http://127.0.0.1:9000", 1 << 20)?;
//!
//!     HttpWasmServer::new(runtime, upstream.into_router()).run().await?;
//!     Ok(())
//! }
//! ```

pub mod exchange;
pub mod handler;
pub mod host;
pub mod middleware;
pub mod proxy;
pub mod response;
pub mod router;
pub mod server;
pub mod state;

pub use exchange::HttpExchange;
pub use host::{AxumHost, LogSink};
pub use proxy::UpstreamProxy;
pub use response::ErrorPolicy;
pub use server::{HttpWasmServer, ServerConfig, TestHandle};
pub use state::AppState;
