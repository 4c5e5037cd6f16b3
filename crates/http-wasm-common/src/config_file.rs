//! Configuration file structures for http-wasm.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ServerConfigFile`]: HTTP server settings
//! - [`GuestConfigFile`]: Which guest to load and what to pass it
//! - [`UpstreamConfig`]: Where `next` forwards requests
//! - [`ErrorPolicyConfig`]: How failed exchanges are answered

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::RuntimeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.engine]
/// pooling_allocator = true
/// max_instances = 64
///
/// [runtime.execution]
/// max_fuel = 10_000_000
///
/// [runtime.pool]
/// size = 16
/// acquire_timeout_ms = 5000
///
/// [server]
/// bind_addr = "0.0.0.0:8080"
/// request_timeout_secs = 30
///
/// [guest]
/// path = "./guests/redact.wasm"
/// config = "open sesame"
///
/// [upstream]
/// url = "http://127.0.0.1:9000"
///
/// [errors]
/// status = 500
/// expose_details = false
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine, execution and pool settings).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfigFile,

    /// Guest module to load.
    #[serde(default)]
    pub guest: GuestConfigFile,

    /// Downstream target for delegated requests.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Error response policy.
    #[serde(default)]
    pub errors: ErrorPolicyConfig,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// HTTP server configuration from config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfigFile {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,

    /// Request timeout in seconds.
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Enable graceful shutdown.
    #[serde(default = "defaults::graceful_shutdown")]
    pub graceful_shutdown: bool,

    /// Largest request or downstream response body buffered for the guest.
    #[serde(default = "defaults::max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfigFile {
    fn default() -> Self {
        Self {
            bind_addr: defaults::bind_addr(),
            request_timeout_secs: defaults::request_timeout_secs(),
            graceful_shutdown: defaults::graceful_shutdown(),
            max_body_bytes: defaults::max_body_bytes(),
        }
    }
}

/// Guest module configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GuestConfigFile {
    /// Path to the WebAssembly guest (binary or text format).
    pub path: Option<String>,

    /// Inline guest configuration passed verbatim to the guest.
    pub config: Option<String>,

    /// File whose bytes are passed verbatim to the guest.
    ///
    /// Takes precedence over `config`.
    pub config_path: Option<String>,
}

impl GuestConfigFile {
    /// Resolve the opaque configuration blob for the guest.
    pub fn load_config(&self) -> Result<Vec<u8>, ConfigFileError> {
        if let Some(path) = &self.config_path {
            return std::fs::read(path).map_err(|e| ConfigFileError::Io {
                path: path.clone(),
                source: e,
            });
        }
        Ok(self
            .config
            .as_deref()
            .map(|c| c.as_bytes().to_vec())
            .unwrap_or_default())
    }
}

/// Downstream target configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Base URL requests are forwarded to when the guest calls `next`.
    pub url: Option<String>,
}

/// How failed exchanges are answered.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorPolicyConfig {
    /// Status code returned when a guest traps or breaks the protocol.
    #[serde(default = "defaults::error_status")]
    pub status: u16,

    /// Include the error message in the response body.
    #[serde(default)]
    pub expose_details: bool,
}

impl Default for ErrorPolicyConfig {
    fn default() -> Self {
        Self {
            status: defaults::error_status(),
            expose_details: false,
        }
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub fn bind_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    pub const fn request_timeout_secs() -> u64 {
        30
    }

    pub const fn graceful_shutdown() -> bool {
        true
    }

    pub const fn max_body_bytes() -> usize {
        4 * 1024 * 1024
    }

    pub const fn error_status() -> u16 {
        500
    }
}
