//! The guest runtime.
//!
//! A [`Runtime`] is built once per guest configuration. It compiles the
//! guest, links the `http-handler` imports against a [`Host`]
//! implementation, and owns the pool of guest instances exchanges run on.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument};
use wasmtime::Linker;

use http_wasm_common::{RuntimeConfig, RuntimeError};
use http_wasm_core::{
    CompiledModule, GuestFactory, GuestPool, Host, Invocation, PoolStats, PooledGuest, WasmEngine,
};

use crate::linker;

/// Builder for [`Runtime`].
///
/// # Example
///
/// ```ignore
/// let runtime = Runtime::builder(MyHost::new())
///     .config(RuntimeConfig::default())
///     .guest_config(b"open sesame".to_vec())
///     .build(&wasm_bytes)
///     .await?;
/// ```
pub struct RuntimeBuilder<H: Host> {
    host: Arc<H>,
    config: RuntimeConfig,
    guest_config: Vec<u8>,
}

impl<H: Host> RuntimeBuilder<H> {
    /// Set the runtime configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the opaque configuration blob the guest reads with `get_config`.
    pub fn guest_config(mut self, guest_config: impl Into<Vec<u8>>) -> Self {
        self.guest_config = guest_config.into();
        self
    }

    /// Compile and link the guest, then create its first instance.
    ///
    /// `source` is either a Wasm binary or WAT text. At least one instance
    /// is created eagerly (every instance with `pool.prewarm`), so an
    /// unlinkable guest or a failing `_start` surfaces here rather than on
    /// the first request.
    ///
    /// # Errors
    ///
    /// Returns a setup error (see [`RuntimeError::is_setup`]) if the
    /// configuration is invalid, the guest does not compile, lacks a
    /// required export, imports something the host does not provide, or
    /// fails to initialize.
    #[instrument(skip_all, fields(source_len = source.len()))]
    pub async fn build(self, source: &[u8]) -> Result<Runtime<H>, RuntimeError> {
        let start = Instant::now();
        self.config.validate()?;

        let engine = WasmEngine::new(&self.config.engine)?;
        let module = CompiledModule::from_source(engine.inner(), source)?;

        let mut linker = Linker::new(engine.inner());
        linker::register_all(&mut linker, self.config.engine.wasi)?;
        let pre = linker.instantiate_pre(module.inner()).map_err(|e| {
            RuntimeError::instantiation(format!("Failed to link guest imports: {e}"))
        })?;

        let factory = GuestFactory::new(
            engine.clone(),
            &module,
            pre,
            self.host,
            self.guest_config,
            self.config.execution.clone(),
        );
        let pool = Arc::new(GuestPool::new(factory, self.config.pool.clone()));

        let warm = if self.config.pool.prewarm {
            pool.size()
        } else {
            1
        };
        pool.warm(warm).await?;

        info!(
            content_hash = %module.content_hash(),
            pool_size = pool.size(),
            duration_ms = start.elapsed().as_millis(),
            "Runtime ready"
        );

        Ok(Runtime {
            engine,
            module,
            pool,
            config: self.config,
        })
    }
}

/// A compiled, linked guest and its instance pool.
///
/// # Thread Safety
///
/// `Runtime` is `Send + Sync`; share it behind an [`Arc`]. Each exchange
/// checks out its own instance, so concurrent exchanges never share guest
/// memory.
pub struct Runtime<H: Host> {
    engine: WasmEngine,
    module: CompiledModule,
    pool: Arc<GuestPool<H>>,
    config: RuntimeConfig,
}

impl<H: Host> Runtime<H> {
    /// Start building a runtime served by `host`.
    pub fn builder(host: H) -> RuntimeBuilder<H> {
        RuntimeBuilder {
            host: Arc::new(host),
            config: RuntimeConfig::default(),
            guest_config: Vec::new(),
        }
    }

    /// Check out an instance for exclusive use.
    ///
    /// # Errors
    ///
    /// See [`GuestPool::acquire`].
    pub async fn acquire(&self) -> Result<PooledGuest<H>, RuntimeError> {
        self.pool.acquire().await
    }

    /// Run one exchange on a pooled instance.
    ///
    /// The instance goes back to the pool when this returns, whatever the
    /// outcome. The invocation's own failure is reported inside the
    /// returned [`Invocation`].
    ///
    /// # Errors
    ///
    /// Returns an error only if no instance could be acquired.
    pub async fn handle(
        &self,
        exchange: H::Exchange,
    ) -> Result<Invocation<H::Exchange>, RuntimeError> {
        let mut guest = self.acquire().await?;
        Ok(guest.handle(exchange).await)
    }

    /// Close the runtime: wake waiters with [`RuntimeError::Closed`], drop
    /// idle instances, and refuse further acquisition.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Returns `true` once [`Runtime::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Current pool occupancy.
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// The capability implementation serving every instance.
    pub fn host(&self) -> &Arc<H> {
        self.pool.factory().host()
    }

    /// The compiled guest.
    pub fn module(&self) -> &CompiledModule {
        &self.module
    }

    /// The engine the guest was compiled with.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// The configuration this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl<H: Host> Drop for Runtime<H> {
    fn drop(&mut self) {
        self.pool.close();
    }
}

impl<H: Host> std::fmt::Debug for Runtime<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("module", &self.module)
            .field("pool", &self.pool.stats())
            .finish_non_exhaustive()
    }
}
