//! Guest module compilation and export validation.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's [`Module`]
//! that compiles a guest once and checks it exports what the ABI requires.
//! The compiled module is immutable and shared read-only by every guest
//! instance of a runtime.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use tracing::{info, instrument};
use wasmtime::{Engine, ExternType, Module};

use http_wasm_common::RuntimeError;

use crate::abi;

/// A compiled guest module.
///
/// # Thread Safety
///
/// `CompiledModule` is cheap to clone and can be shared across threads.
/// The underlying Wasmtime module is also thread-safe.
#[derive(Clone)]
pub struct CompiledModule {
    /// The compiled Wasmtime module.
    inner: Module,

    /// Hash of the original guest bytes.
    content_hash: String,
}

impl CompiledModule {
    /// Compile a guest from either the binary or the text format.
    ///
    /// Binary input is recognised by the `\0asm` magic number; anything
    /// else is treated as WAT source.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails or required exports are missing.
    pub fn from_source(engine: &Engine, source: &[u8]) -> Result<Self, RuntimeError> {
        if source.starts_with(b"\0asm") {
            return Self::from_bytes(engine, source);
        }
        let wat = std::str::from_utf8(source).map_err(|_| {
            RuntimeError::compilation_failed("Guest is neither Wasm binary nor UTF-8 text")
        })?;
        Self::from_wat(engine, wat)
    }

    /// Compile a guest from WebAssembly bytes.
    ///
    /// # Arguments
    ///
    /// * `engine` - The Wasmtime engine to use for compilation
    /// * `bytes` - The raw WebAssembly bytes
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails (e.g., invalid Wasm) or the
    /// guest lacks a required export.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;

        let module = Module::new(engine, bytes).map_err(|e| {
            RuntimeError::compilation_failed(format!("Guest compilation failed: {e}"))
        })?;
        Self::validate_exports(&module)?;

        let content_hash = compute_hash(bytes);

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Guest module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
        })
    }

    /// Compile a guest from WAT (WebAssembly Text Format).
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails or required exports are missing.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        let module = Module::new(engine, wat).map_err(|e| {
            RuntimeError::compilation_failed(format!("WAT compilation failed: {e}"))
        })?;
        Self::validate_exports(&module)?;

        let content_hash = compute_hash(wat.as_bytes());

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "WAT guest module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
        })
    }

    /// Check the guest exports `handle: () -> ()` and its linear memory.
    fn validate_exports(module: &Module) -> Result<(), RuntimeError> {
        match module.get_export(abi::FUNC_HANDLE) {
            Some(ExternType::Func(ty)) if ty.params().len() == 0 && ty.results().len() == 0 => {}
            Some(_) => {
                return Err(RuntimeError::compilation_failed(format!(
                    "Export '{}' must be a function with no parameters and no results",
                    abi::FUNC_HANDLE
                )));
            }
            None => return Err(RuntimeError::missing_export(abi::FUNC_HANDLE)),
        }

        match module.get_export(abi::MEMORY) {
            Some(ExternType::Memory(_)) => Ok(()),
            Some(_) => Err(RuntimeError::compilation_failed(format!(
                "Export '{}' must be a memory",
                abi::MEMORY
            ))),
            None => Err(RuntimeError::missing_export(abi::MEMORY)),
        }
    }

    /// Returns `true` if the guest exports a `_start` initializer.
    pub fn has_start(&self) -> bool {
        matches!(
            self.inner.get_export(abi::FUNC_START),
            Some(ExternType::Func(_))
        )
    }

    /// Get the content hash of the original guest bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get the inner Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.inner
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), RuntimeError> {
        if bytes.len() < 8 {
            return Err(RuntimeError::compilation_failed(
                "Invalid Wasm: file too small",
            ));
        }

        // Check magic number: \0asm
        if &bytes[0..4] != b"\0asm" {
            return Err(RuntimeError::compilation_failed(
                "Invalid Wasm: bad magic number",
            ));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .field("has_start", &self.has_start())
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
