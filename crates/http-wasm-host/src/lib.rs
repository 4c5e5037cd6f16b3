//! Host function dispatch and guest runtime for http-wasm.
//!
//! This crate wires the `http-handler` imports a guest may call to a
//! [`Host`](http_wasm_core::Host) implementation and manages the guest's
//! lifecycle.
//!
//! # Components
//!
//! - [`linker`]: The dispatch table. Each import marshals guest memory and
//!   calls exactly one capability method.
//! - [`runtime`]: [`Runtime`] compiles a guest once, links it, and hands out
//!   pooled instances.
//!
//! # Failure Containment
//!
//! Everything a guest can get wrong traps only the invocation it happened
//! in:
//!
//! 1. **Marshaling**: every offset and length is checked against the live
//!    memory size before use.
//! 2. **Protocol**: `next` and `send_response` are checked against the
//!    invocation state machine.
//! 3. **Resources**: fuel and memory limits bound each invocation.

pub mod linker;
pub mod runtime;

pub use runtime::{Runtime, RuntimeBuilder};
