//! Per-instance store context.
//!
//! This module provides:
//! - [`GuestContext`]: Store data reachable from every host function
//! - [`ExecutionMetrics`]: Counters for one guest instance
//! - [`create_store`] and [`refuel`]: Store setup and per-invocation fuel
//!
//! Unlike a per-request store, a guest instance's store lives as long as the
//! instance and is reused by every exchange the instance serves. Only the
//! bound exchange and the invocation state change between calls.

use std::sync::Arc;
use std::time::Duration;

use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use http_wasm_common::{AbiError, ExecutionConfig, RuntimeError};

use crate::WasmEngine;
use crate::host::Host;
use crate::state::InvocationState;

/// Store data for one guest instance.
///
/// Host functions reach this through [`wasmtime::Caller`].
pub struct GuestContext<H: Host> {
    host: Arc<H>,
    guest_config: Arc<[u8]>,
    exchange: Option<H::Exchange>,

    /// State of the invocation in progress.
    pub state: InvocationState,

    wasi: WasiP1Ctx,
    limits: StoreLimits,
    guest_id: u64,

    /// Counters for this instance.
    pub metrics: ExecutionMetrics,
}

/// Counters for one guest instance.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Exchanges handled, successful or not.
    pub invocations: u64,

    /// Fuel consumed by the last invocation.
    pub last_fuel_consumed: u64,

    /// Wall time of the last invocation.
    pub last_duration: Option<Duration>,
}

impl<H: Host> GuestContext<H> {
    /// Create the context for a new guest instance.
    pub fn new(
        host: Arc<H>,
        guest_config: Arc<[u8]>,
        guest_id: u64,
        config: &ExecutionConfig,
    ) -> Self {
        let wasi = WasiCtxBuilder::new()
            .inherit_stdout()
            .inherit_stderr()
            .build_p1();

        let limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory_bytes())
            .build();

        Self {
            host,
            guest_config,
            exchange: None,
            state: InvocationState::default(),
            wasi,
            limits,
            guest_id,
            metrics: ExecutionMetrics::default(),
        }
    }

    /// The capability implementation serving this instance.
    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// The opaque configuration blob passed to the guest.
    pub fn guest_config(&self) -> &[u8] {
        &self.guest_config
    }

    /// Unique id of this guest instance.
    pub fn guest_id(&self) -> u64 {
        self.guest_id
    }

    /// The bound exchange, if any.
    pub fn exchange(&self) -> Option<&H::Exchange> {
        self.exchange.as_ref()
    }

    /// The bound exchange, or [`AbiError::NoExchange`] outside `handle`.
    pub fn exchange_mut(&mut self) -> Result<&mut H::Exchange, AbiError> {
        self.exchange.as_mut().ok_or(AbiError::NoExchange)
    }

    /// Borrow the host and the bound exchange together.
    pub fn with_exchange<R>(
        &mut self,
        f: impl FnOnce(&H, &mut H::Exchange) -> R,
    ) -> Result<R, AbiError> {
        let exchange = self.exchange.as_mut().ok_or(AbiError::NoExchange)?;
        Ok(f(&self.host, exchange))
    }

    /// Bind an exchange and reset the invocation state.
    pub fn bind(&mut self, exchange: H::Exchange) {
        self.exchange = Some(exchange);
        self.state = InvocationState::default();
    }

    /// Release the bound exchange.
    pub fn unbind(&mut self) -> Option<H::Exchange> {
        self.exchange.take()
    }

    /// WASI preview1 state, for linking.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }
}

/// Create the store for a new guest instance.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store<H: Host>(
    engine: &WasmEngine,
    config: &ExecutionConfig,
    context: GuestContext<H>,
) -> Result<Store<GuestContext<H>>, RuntimeError> {
    let mut store = Store::new(engine.inner(), context);
    store.limiter(|ctx| &mut ctx.limits);
    refuel(&mut store, config)?;
    Ok(store)
}

/// Reset the store's fuel before a call into the guest.
///
/// The engine always meters fuel, so a store without a limit gets the
/// maximum instead.
pub fn refuel<T>(store: &mut Store<T>, config: &ExecutionConfig) -> Result<u64, RuntimeError> {
    let fuel = if config.fuel_metering {
        config.max_fuel
    } else {
        u64::MAX
    };
    store
        .set_fuel(fuel)
        .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;
    Ok(fuel)
}

/// Fuel used since the store was refueled with `initial`.
pub fn fuel_consumed<T>(store: &Store<T>, initial: u64) -> u64 {
    let remaining = store.get_fuel().unwrap_or(0);
    initial.saturating_sub(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::BodyChunk;
    use async_trait::async_trait;
    use http_wasm_common::{EngineConfig, HostError};

    struct NullHost;

    #[async_trait]
    impl Host for NullHost {
        type Exchange = String;

        fn get_method(&self, _: &String) -> String {
            "GET".into()
        }
        fn get_path(&self, exchange: &String) -> String {
            exchange.clone()
        }
        fn set_path(&self, exchange: &mut String, path: &str) -> Result<(), HostError> {
            *exchange = path.into();
            Ok(())
        }
        fn get_protocol_version(&self, _: &String) -> String {
            "HTTP/1.1".into()
        }
        fn get_request_header(&self, _: &String, _: &str) -> Option<Vec<u8>> {
            None
        }
        fn read_request_body(&self, _: &mut String, _: usize) -> Result<BodyChunk, HostError> {
            Ok(BodyChunk::new(Vec::new(), true))
        }
        fn write_request_body(&self, _: &mut String, _: &[u8]) -> Result<(), HostError> {
            Ok(())
        }
        fn set_response_header(&self, _: &mut String, _: &str, _: &str) -> Result<(), HostError> {
            Ok(())
        }
        fn send_response(&self, _: &mut String, _: u32, _: &[u8]) -> Result<(), HostError> {
            Ok(())
        }
        async fn next(&self, _: &mut String) -> Result<(), HostError> {
            Ok(())
        }
        fn read_response_body(&self, _: &mut String, _: usize) -> Result<BodyChunk, HostError> {
            Ok(BodyChunk::new(Vec::new(), true))
        }
        fn write_response_body(&self, _: &mut String, _: &[u8]) -> Result<(), HostError> {
            Ok(())
        }
    }

    fn engine() -> WasmEngine {
        WasmEngine::new(&EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        })
        .unwrap()
    }

    fn context(config: &ExecutionConfig) -> GuestContext<NullHost> {
        GuestContext::new(Arc::new(NullHost), Arc::from(&b"cfg"[..]), 7, config)
    }

    #[test]
    fn test_context_bind_unbind() {
        let mut ctx = context(&ExecutionConfig::default());

        assert_eq!(ctx.guest_id(), 7);
        assert_eq!(ctx.guest_config(), b"cfg");
        assert!(ctx.exchange().is_none());
        assert_eq!(ctx.exchange_mut().unwrap_err(), AbiError::NoExchange);

        ctx.state = InvocationState::Trapped;
        ctx.bind("/a".to_string());
        assert_eq!(ctx.state, InvocationState::Unhandled);

        let path = ctx.with_exchange(|host, ex| host.get_path(ex)).unwrap();
        assert_eq!(path, "/a");

        assert_eq!(ctx.unbind().as_deref(), Some("/a"));
        assert!(ctx.exchange().is_none());
    }

    #[test]
    fn test_store_fuel() {
        let engine = engine();
        let config = ExecutionConfig {
            max_fuel: 1000,
            fuel_metering: true,
            ..Default::default()
        };

        let store = create_store(&engine, &config, context(&config)).unwrap();
        assert_eq!(store.get_fuel().unwrap(), 1000);
        assert_eq!(fuel_consumed(&store, 1000), 0);
    }

    #[test]
    fn test_store_unmetered() {
        let engine = engine();
        let config = ExecutionConfig {
            fuel_metering: false,
            ..Default::default()
        };

        let store = create_store(&engine, &config, context(&config)).unwrap();
        assert_eq!(store.get_fuel().unwrap(), u64::MAX);
    }
}
