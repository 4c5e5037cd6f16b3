//! HTTP server implementation.
//!
//! This module provides the main [`HttpWasmServer`] struct for serving a
//! guest in front of a downstream router.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use http_wasm_common::RuntimeError;
use http_wasm_common::config_file::ServerConfigFile;
use http_wasm_host::Runtime;

use crate::host::AxumHost;
use crate::response::ErrorPolicy;
use crate::router::build_router;
use crate::state::AppState;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server.
    pub bind_addr: SocketAddr,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Enable graceful shutdown on SIGTERM/SIGINT.
    pub graceful_shutdown: bool,
    /// Largest request or downstream response body buffered for the guest.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            request_timeout_secs: 30,
            graceful_shutdown: true,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Build from the `[server]` table of a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if `bind_addr` is not a socket address.
    pub fn from_file(file: &ServerConfigFile) -> Result<Self, RuntimeError> {
        let bind_addr = file.bind_addr.parse().map_err(|e| {
            RuntimeError::invalid_config(format!("Invalid bind address '{}': {e}", file.bind_addr))
        })?;
        Ok(Self {
            bind_addr,
            request_timeout_secs: file.request_timeout_secs,
            graceful_shutdown: file.graceful_shutdown,
            max_body_bytes: file.max_body_bytes,
        })
    }

    /// Create a new server config with custom bind address.
    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Create a new server config with custom timeout.
    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Get the request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Serves a guest in front of a downstream router.
///
/// # Example
///
/// ```ignore
/// let runtime = Runtime::builder(AxumHost::new()).build(&wasm).await?;
/// let downstream = UpstreamProxy::new("http://127.0.0.1:9000", 1 << 20)?.into_router();
///
/// HttpWasmServer::new(runtime, downstream)
///     .with_config(ServerConfig::default())
///     .run()
///     .await?;
/// ```
pub struct HttpWasmServer {
    runtime: Runtime<AxumHost>,
    downstream: Router,
    policy: ErrorPolicy,
    config: ServerConfig,
}

impl HttpWasmServer {
    /// Create a server for `runtime`. Requests the guest passes on with
    /// `next` go to `downstream`.
    pub fn new(runtime: Runtime<AxumHost>, downstream: Router) -> Self {
        Self {
            runtime,
            downstream,
            policy: ErrorPolicy::default(),
            config: ServerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn into_parts(self) -> (AppState, Router, ServerConfig) {
        let state = AppState::new(self.runtime, self.policy, self.config.max_body_bytes);
        let app = build_router(
            state.clone(),
            self.downstream,
            self.config.request_timeout(),
        );
        (state, app, self.config)
    }

    /// Run the server until shutdown.
    ///
    /// This will block until the server is shut down via signal
    /// (SIGTERM/SIGINT) if graceful shutdown is enabled. The guest pool is
    /// closed on the way out.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to the address.
    pub async fn run(self) -> Result<(), RuntimeError> {
        let (state, app, config) = self.into_parts();

        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to bind: {e}")))?;

        info!(addr = %config.bind_addr, "Starting HTTP server");

        let served = if config.graceful_shutdown {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
        } else {
            axum::serve(listener, app).await
        };
        state.runtime().close();
        served?;

        info!("Server shutdown complete");
        Ok(())
    }

    /// Start the server and return a handle for testing.
    ///
    /// The server binds to an ephemeral port (127.0.0.1:0) and
    /// returns a handle that can be used to get the actual address
    /// and shut down the server.
    pub async fn start_test(self) -> Result<TestHandle, RuntimeError> {
        let (state, app, _) = self.into_parts();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to bind: {e}")))?;

        let addr = listener
            .local_addr()
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to get addr: {e}")))?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        Ok(TestHandle {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }
}

/// Handle for a test server instance.
///
/// Use this to interact with and shut down a test server.
pub struct TestHandle {
    /// The address the server is bound to.
    addr: SocketAddr,
    /// Application state (for inspecting the runtime).
    state: AppState,
    /// Shutdown signal sender.
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    /// Server task handle.
    handle: tokio::task::JoinHandle<Result<(), std::io::Error>>,
}

impl TestHandle {
    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the server URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Shutdown the server gracefully and close the guest pool.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.handle).await;
        self.state.runtime().close();
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.graceful_shutdown);
    }

    #[test]
    fn test_server_config_builder() {
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        let config = ServerConfig::default()
            .with_bind_addr(addr)
            .with_timeout(60);

        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.request_timeout_secs, 60);
    }

    #[test]
    fn test_server_config_from_file() {
        let file = ServerConfigFile {
            bind_addr: "127.0.0.1:9000".into(),
            request_timeout_secs: 5,
            graceful_shutdown: false,
            max_body_bytes: 1024,
        };
        let config = ServerConfig::from_file(&file).unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_body_bytes, 1024);

        let bad = ServerConfigFile {
            bind_addr: "localhost".into(),
            ..file
        };
        assert!(matches!(
            ServerConfig::from_file(&bad),
            Err(RuntimeError::InvalidConfig { .. })
        ));
    }
}
