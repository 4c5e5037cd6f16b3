//! Configuration structures for http-wasm.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling allocator, WASI)
//! - [`ExecutionConfig`]: Per-invocation limits (fuel, memory)
//! - [`PoolConfig`]: Guest instance pool sizing and backpressure

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::RuntimeError;

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for one guest runtime.
/// It can be loaded from files (TOML, JSON) or built in code.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-invocation execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Guest instance pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,
}

impl RuntimeConfig {
    /// Check the configuration for values that can never work.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.pool.size == 0 {
            return Err(RuntimeError::invalid_config("pool.size must be at least 1"));
        }
        if self.engine.pooling_allocator && self.engine.max_instances < self.pool.size {
            return Err(RuntimeError::invalid_config(format!(
                "engine.max_instances ({}) is smaller than pool.size ({})",
                self.engine.max_instances, self.pool.size
            )));
        }
        if self.execution.max_memory_mb > self.engine.instance_memory_mb
            && self.engine.pooling_allocator
        {
            return Err(RuntimeError::invalid_config(format!(
                "execution.max_memory_mb ({}) exceeds engine.instance_memory_mb ({})",
                self.execution.max_memory_mb, self.engine.instance_memory_mb
            )));
        }
        Ok(())
    }
}

/// Wasmtime engine configuration.
///
/// These settings affect the global Wasmtime engine behavior,
/// including the memory allocation strategy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable the pooling allocator for fast instance creation.
    ///
    /// When enabled, memory slots are reserved up front for
    /// `max_instances` guest instances.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the allocator pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Link WASI preview1 imports so guests built by standard
    /// toolchains (which import `wasi_snapshot_preview1`) can instantiate.
    #[serde(default = "defaults::wasi")]
    pub wasi: bool,

    /// Optimize generated code for speed rather than compile time.
    #[serde(default = "defaults::optimize")]
    pub optimize: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            wasi: defaults::wasi(),
            optimize: defaults::optimize(),
        }
    }
}

/// Per-invocation execution configuration.
///
/// These settings bound the work a single guest invocation can do.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Fuel (roughly, wasm instructions) granted to each invocation.
    ///
    /// The store is refilled to this amount before every call into the guest.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Enable fuel metering.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,

    /// Maximum linear memory per guest instance in megabytes.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            fuel_metering: defaults::fuel_metering(),
            max_memory_mb: defaults::max_memory_mb(),
        }
    }
}

impl ExecutionConfig {
    /// Get the memory limit in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// Guest instance pool configuration.
///
/// Pool size is the only parallelism control for guest execution: at most
/// `size` invocations run at once, each on its own instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Maximum number of guest instances.
    #[serde(default = "defaults::pool_size")]
    pub size: u32,

    /// Create every instance at startup instead of on first demand.
    #[serde(default)]
    pub prewarm: bool,

    /// How long a request waits for a free instance.
    ///
    /// `None` waits until an instance is released or the runtime closes,
    /// `Some(0)` rejects immediately when the pool is exhausted.
    #[serde(default = "defaults::acquire_timeout_ms")]
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: defaults::pool_size(),
            prewarm: false,
            acquire_timeout_ms: defaults::acquire_timeout_ms(),
        }
    }
}

impl PoolConfig {
    /// Get the acquire timeout as a `Duration`.
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        true
    }

    pub const fn max_instances() -> u32 {
        128
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn wasi() -> bool {
        true
    }

    pub const fn optimize() -> bool {
        true
    }

    pub const fn max_fuel() -> u64 {
        10_000_000
    }

    pub const fn fuel_metering() -> bool {
        true
    }

    pub const fn max_memory_mb() -> u32 {
        64
    }

    pub const fn pool_size() -> u32 {
        16
    }

    #[allow(clippy::unnecessary_wraps)]
    pub const fn acquire_timeout_ms() -> Option<u64> {
        Some(5_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert!(config.engine.pooling_allocator);
        assert_eq!(config.engine.max_instances, 128);
        assert_eq!(config.engine.instance_memory_mb, 64);
        assert!(config.engine.wasi);

        assert_eq!(config.execution.max_fuel, 10_000_000);
        assert!(config.execution.fuel_metering);
        assert_eq!(config.execution.max_memory_mb, 64);

        assert_eq!(config.pool.size, 16);
        assert!(!config.pool.prewarm);
        assert_eq!(config.pool.acquire_timeout_ms, Some(5_000));

        assert_ok!(config.validate());
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            config.engine.max_instances,
            deserialized.engine.max_instances
        );
        assert_eq!(config.execution.max_fuel, deserialized.execution.max_fuel);
        assert_eq!(config.pool.size, deserialized.pool.size);
    }

    #[test]
    fn test_acquire_timeout() {
        let pool = PoolConfig {
            acquire_timeout_ms: Some(250),
            ..Default::default()
        };
        assert_eq!(pool.acquire_timeout(), Some(Duration::from_millis(250)));

        let pool = PoolConfig {
            acquire_timeout_ms: None,
            ..Default::default()
        };
        assert_eq!(pool.acquire_timeout(), None);
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"pool": {"size": 4, "prewarm": true}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        // Explicitly set values
        assert_eq!(config.pool.size, 4);
        assert!(config.pool.prewarm);
        // Default values for unspecified fields
        assert_eq!(config.pool.acquire_timeout_ms, Some(5_000));
        assert!(config.engine.pooling_allocator);
        assert_eq!(config.execution.max_fuel, 10_000_000);
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let mut config = RuntimeConfig::default();
        config.pool.size = 0;
        assert_err!(config.validate());
    }

    #[test]
    fn test_validate_rejects_pool_larger_than_allocator() {
        let mut config = RuntimeConfig::default();
        config.engine.max_instances = 2;
        config.pool.size = 8;
        assert_err!(config.validate());

        config.engine.pooling_allocator = false;
        assert_ok!(config.validate());
    }

    #[test]
    fn test_max_memory_bytes() {
        let exec = ExecutionConfig {
            max_memory_mb: 2,
            ..Default::default()
        };
        assert_eq!(exec.max_memory_bytes(), 2 * 1024 * 1024);
    }
}
