//! Core Wasmtime runtime for http-wasm.
//!
//! This crate provides the host side of the http-wasm ABI, independent of
//! any HTTP server:
//! - [`WasmEngine`]: Configured Wasmtime engine with pooling allocator
//! - [`CompiledModule`]: Compiled guest module, validated against the ABI
//! - [`abi`] and [`memory`]: Import names, packed encodings and the
//!   bounds-checked accessor every host function goes through
//! - [`Host`]: The capability interface a server adapter implements
//! - [`InvocationState`]: The next/send_response state machine
//! - [`Guest`] and [`GuestPool`]: Exclusive, pooled guest instances
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Shared by every instance, thread-safe)                │
//! │  - Pooling Allocator                                    │
//! │  - Fuel metering, async host calls                      │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │           CompiledModule + InstancePre                  │
//! │  (Compiled and linked once, shared read-only)           │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │          GuestPool  ──►  Guest (Store<GuestContext>)    │
//! │  (Bounded, one exchange per instance at a time)         │
//! │  - Linear memory and globals                            │
//! │  - Bound exchange + invocation state                    │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod abi;
pub mod engine;
pub mod guest;
pub mod host;
pub mod memory;
pub mod module;
pub mod pool;
pub mod state;
pub mod store;

pub use abi::BodyChunk;
pub use engine::WasmEngine;
pub use guest::{Guest, GuestFactory, Invocation, classify_error};
pub use host::Host;
pub use module::CompiledModule;
pub use pool::{GuestPool, PoolStats, PooledGuest};
pub use state::{InvocationState, Outcome};
pub use store::{ExecutionMetrics, GuestContext};
