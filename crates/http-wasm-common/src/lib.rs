//! Common types, errors, and configuration for http-wasm.
//!
//! This crate provides shared functionality used across the http-wasm workspace:
//! - Error types using `thiserror`, one enum per failure class
//! - Configuration structures for the engine, execution limits and the guest pool
//! - The TOML configuration file loaded by the binary

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{EngineConfig, ExecutionConfig, PoolConfig, RuntimeConfig};
pub use config_file::{ConfigFile, ConfigFileError};
pub use error::{AbiError, HostError, ProtocolError, RuntimeError};
