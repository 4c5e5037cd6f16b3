//! Guest instance lifecycle.
//!
//! This module provides [`GuestFactory`], which turns a linked guest module
//! into ready-to-use [`Guest`] instances, and [`Guest`], which runs one
//! exchange at a time:
//!
//! 1. Instantiate the module into a fresh store
//! 2. Run `_start` once, if the guest exports it
//! 3. For each exchange: bind it, refuel, call `handle`, check the state
//!    machine, unbind it

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};
use wasmtime::{InstancePre, Store, Trap, TypedFunc};
use wasmtime_wasi::I32Exit;

use http_wasm_common::{AbiError, ExecutionConfig, HostError, ProtocolError, RuntimeError};

use crate::abi;
use crate::host::Host;
use crate::state::Outcome;
use crate::store::{GuestContext, create_store, fuel_consumed, refuel};
use crate::{CompiledModule, WasmEngine};

/// Result of handing one exchange to a guest.
#[derive(Debug)]
pub struct Invocation<E> {
    /// Id of the instance that ran the exchange.
    pub guest_id: u64,

    /// The exchange, handed back after the call.
    ///
    /// Always `Some` unless the exchange was never bound.
    pub exchange: Option<E>,

    /// How the guest terminated the exchange, or why it failed.
    pub result: Result<Outcome, RuntimeError>,
}

/// Creates guest instances from a linked module.
///
/// # Thread Safety
///
/// `GuestFactory` is shared by every task that may need a new instance.
/// Linking was done once up front; creating an instance only allocates a
/// store and runs the guest's initializer.
pub struct GuestFactory<H: Host> {
    engine: WasmEngine,
    pre: InstancePre<GuestContext<H>>,
    host: Arc<H>,
    guest_config: Arc<[u8]>,
    execution: ExecutionConfig,
    has_start: bool,
    next_id: AtomicU64,
}

impl<H: Host> GuestFactory<H> {
    /// Create a factory for a module already linked into `pre`.
    pub fn new(
        engine: WasmEngine,
        module: &CompiledModule,
        pre: InstancePre<GuestContext<H>>,
        host: Arc<H>,
        guest_config: impl Into<Arc<[u8]>>,
        execution: ExecutionConfig,
    ) -> Self {
        Self {
            engine,
            pre,
            host,
            guest_config: guest_config.into(),
            execution,
            has_start: module.has_start(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Instantiate a new guest and run its initializer.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Instantiation`] if the module cannot be
    /// instantiated or `_start` fails. A WASI `proc_exit(0)` from `_start`
    /// counts as success.
    #[instrument(skip(self), fields(guest_id))]
    pub async fn create(&self) -> Result<Guest<H>, RuntimeError> {
        let start = Instant::now();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::Span::current().record("guest_id", id);

        let context = GuestContext::new(
            Arc::clone(&self.host),
            Arc::clone(&self.guest_config),
            id,
            &self.execution,
        );
        let mut store = create_store(&self.engine, &self.execution, context)?;

        let instance = self
            .pre
            .instantiate_async(&mut store)
            .await
            .map_err(|e| RuntimeError::instantiation(format!("Guest instantiation failed: {e}")))?;

        if self.has_start {
            debug!("Running guest initializer");
            let init = instance
                .get_typed_func::<(), ()>(&mut store, abi::FUNC_START)
                .map_err(|e| {
                    RuntimeError::instantiation(format!("Export '_start' is not () -> (): {e}"))
                })?;

            if let Err(e) = init.call_async(&mut store, ()).await {
                if exit_code(&e) != Some(0) {
                    return Err(RuntimeError::instantiation(format!(
                        "Guest initializer failed: {}",
                        classify_error(e)
                    )));
                }
            }
        }

        let handle = instance
            .get_typed_func::<(), ()>(&mut store, abi::FUNC_HANDLE)
            .map_err(|_| RuntimeError::missing_export(abi::FUNC_HANDLE))?;

        info!(
            duration_ms = start.elapsed().as_millis(),
            "Guest instance created"
        );

        Ok(Guest {
            id,
            store,
            handle,
            execution: self.execution.clone(),
            faulted: false,
            in_flight: false,
        })
    }

    /// The capability implementation shared by all instances.
    pub fn host(&self) -> &Arc<H> {
        &self.host
    }
}

impl<H: Host> std::fmt::Debug for GuestFactory<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestFactory")
            .field("has_start", &self.has_start)
            .field("guest_config_len", &self.guest_config.len())
            .finish_non_exhaustive()
    }
}

/// One guest instance: a store plus the guest's `handle` export.
///
/// A `Guest` is never shared; whoever holds it has exclusive use of the
/// instance's memory and globals.
pub struct Guest<H: Host> {
    id: u64,
    store: Store<GuestContext<H>>,
    handle: TypedFunc<(), ()>,
    execution: ExecutionConfig,
    faulted: bool,
    // Set while an exchange is bound; still set if the call was cancelled
    in_flight: bool,
}

impl<H: Host> Guest<H> {
    /// Unique id of this instance.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns `true` once the instance trapped on a guest fault and must
    /// not be reused.
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Returns `true` if a [`Guest::handle`] call was dropped before it
    /// finished.
    ///
    /// The instance was suspended mid-execution and still holds the
    /// exchange, so it must not be reused.
    pub fn is_interrupted(&self) -> bool {
        self.in_flight
    }

    /// Number of exchanges this instance has handled.
    pub fn invocations(&self) -> u64 {
        self.store.data().metrics.invocations
    }

    /// Run the guest's `handle` export for one exchange.
    ///
    /// The exchange is bound for the duration of the call and always handed
    /// back in the returned [`Invocation`]. A guest fault marks the instance
    /// as faulted; a failing host capability does not. If the returned
    /// future is dropped before completion, the instance is left
    /// [interrupted](Guest::is_interrupted).
    #[instrument(skip_all, fields(guest_id = self.id))]
    pub async fn handle(&mut self, exchange: H::Exchange) -> Invocation<H::Exchange> {
        let start = Instant::now();
        self.in_flight = true;
        self.store.data_mut().bind(exchange);

        let call = self.call_handle().await;

        let ctx = self.store.data_mut();
        let result = match call {
            Ok(()) => ctx.state.complete().map_err(RuntimeError::from),
            Err(e) => {
                ctx.state.trap();
                Err(e)
            }
        };

        ctx.metrics.invocations += 1;
        ctx.metrics.last_duration = Some(start.elapsed());
        let fuel = ctx.metrics.last_fuel_consumed;
        let exchange = ctx.unbind();
        self.in_flight = false;

        match &result {
            Ok(outcome) => debug!(
                ?outcome,
                duration_ms = start.elapsed().as_millis(),
                fuel_consumed = fuel,
                "Exchange handled"
            ),
            Err(RuntimeError::FuelExhausted) => warn!(
                duration_ms = start.elapsed().as_millis(),
                fuel_consumed = fuel,
                "Guest terminated: fuel exhausted"
            ),
            Err(e) if e.is_guest_fault() => error!(
                error = %e,
                duration_ms = start.elapsed().as_millis(),
                "Guest trapped"
            ),
            Err(e) => warn!(error = %e, "Host capability failed"),
        }

        if result.as_ref().is_err_and(RuntimeError::is_guest_fault) {
            self.faulted = true;
        }

        Invocation {
            guest_id: self.id,
            exchange,
            result,
        }
    }

    async fn call_handle(&mut self) -> Result<(), RuntimeError> {
        let initial = refuel(&mut self.store, &self.execution)?;
        let result = self.handle.call_async(&mut self.store, ()).await;
        self.store.data_mut().metrics.last_fuel_consumed = fuel_consumed(&self.store, initial);
        result.map_err(classify_error)
    }
}

impl<H: Host> std::fmt::Debug for Guest<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guest")
            .field("id", &self.id)
            .field("faulted", &self.faulted)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

/// Turn an error raised while running guest code into a [`RuntimeError`].
///
/// Host functions raise [`AbiError`], [`ProtocolError`] and [`HostError`]
/// as traps; they are recovered here so every failure classifies the same
/// way no matter which host function raised it.
pub fn classify_error(error: wasmtime::Error) -> RuntimeError {
    if error.downcast_ref::<Trap>() == Some(&Trap::OutOfFuel) {
        return RuntimeError::FuelExhausted;
    }

    let error = match error.downcast::<AbiError>() {
        Ok(e) => return e.into(),
        Err(e) => e,
    };
    let error = match error.downcast::<ProtocolError>() {
        Ok(e) => return e.into(),
        Err(e) => e,
    };
    let error = match error.downcast::<HostError>() {
        Ok(e) => return e.into(),
        Err(e) => e,
    };

    if let Some(code) = exit_code(&error) {
        return RuntimeError::trap(
            format!("guest exited with code {code}"),
            Some("exit".into()),
        );
    }

    let code = error.downcast_ref::<Trap>().map(|trap| format!("{trap:?}"));
    RuntimeError::trap(error.to_string(), code)
}

/// Exit code if the guest called WASI `proc_exit`.
fn exit_code(error: &wasmtime::Error) -> Option<i32> {
    error.downcast_ref::<I32Exit>().map(|exit| exit.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_marshaling_errors() {
        let err = classify_error(wasmtime::Error::new(AbiError::MissingMemory));
        assert!(matches!(err, RuntimeError::Abi(AbiError::MissingMemory)));

        let err = classify_error(wasmtime::Error::new(ProtocolError::DuplicateNext));
        assert!(matches!(
            err,
            RuntimeError::Protocol(ProtocolError::DuplicateNext)
        ));
    }

    #[test]
    fn test_classify_host_error_is_not_guest_fault() {
        let err = classify_error(wasmtime::Error::new(HostError::Downstream {
            reason: "refused".into(),
        }));
        assert!(matches!(err, RuntimeError::Host(_)));
        assert!(!err.is_guest_fault());
    }

    #[test]
    fn test_classify_through_context() {
        let err = wasmtime::Error::new(AbiError::NoExchange).context("while calling get_path");
        assert!(matches!(
            classify_error(err),
            RuntimeError::Abi(AbiError::NoExchange)
        ));
    }

    #[test]
    fn test_classify_traps() {
        assert!(matches!(
            classify_error(wasmtime::Error::new(Trap::OutOfFuel)),
            RuntimeError::FuelExhausted
        ));

        let err = classify_error(wasmtime::Error::new(Trap::UnreachableCodeReached));
        assert!(matches!(
            err,
            RuntimeError::Trap { code: Some(ref c), .. } if c == "UnreachableCodeReached"
        ));

        let err = classify_error(wasmtime::Error::new(I32Exit(3)));
        assert!(matches!(err, RuntimeError::Trap { ref message, .. } if message.contains('3')));
    }
}
