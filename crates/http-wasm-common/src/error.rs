//! Error types for http-wasm.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RuntimeError`]: Top-level errors for setup and for a single exchange
//! - [`AbiError`]: Marshaling violations on guest memory
//! - [`ProtocolError`]: Violations of the next/send_response contract
//! - [`HostError`]: Failures inside a host capability implementation

use std::io;

use thiserror::Error;

/// Top-level runtime errors.
///
/// Setup errors surface from `Runtime` construction. Every other variant is
/// contained to the single invocation that produced it.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// WebAssembly compilation failed.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// The guest does not export something the ABI requires.
    #[error("Guest is missing required export '{name}'")]
    MissingExport {
        /// Name of the missing export.
        name: String,
    },

    /// Linking or instantiating the guest failed.
    #[error("Instantiation failed: {reason}")]
    Instantiation {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The guest passed an offset or length the host refused.
    #[error("ABI violation: {0}")]
    Abi(#[from] AbiError),

    /// The guest broke the next/send_response contract.
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// A host capability failed while serving the guest.
    #[error("Host function error: {0}")]
    Host(#[from] HostError),

    /// A WebAssembly trap occurred during execution.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
        /// Trap code if available.
        code: Option<String>,
    },

    /// Execution exhausted the configured fuel limit.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// No guest instance became available in time.
    #[error("Guest pool exhausted after {waited_ms}ms")]
    PoolExhausted {
        /// How long the caller waited before giving up.
        waited_ms: u64,
    },

    /// The runtime was closed; no instance can be created or acquired.
    #[error("Runtime is closed")]
    Closed,
}

/// Marshaling violations.
///
/// Any of these raised by a host function traps the guest immediately.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbiError {
    /// `offset + len` lies outside the current linear memory.
    #[error("memory access out of bounds: offset={offset} len={len} memory_size={memory_size}")]
    OutOfBounds {
        /// Offset supplied by the guest.
        offset: u32,
        /// Length supplied by the guest.
        len: u32,
        /// Linear memory size at the time of the access.
        memory_size: usize,
    },

    /// A span that must be UTF-8 was not.
    #[error("invalid UTF-8 at offset={offset} len={len}")]
    InvalidUtf8 {
        /// Offset of the span.
        offset: u32,
        /// Length of the span.
        len: u32,
    },

    /// The guest does not export its linear memory.
    #[error("guest memory export not found")]
    MissingMemory,

    /// An exchange-bound function was called with no exchange bound.
    #[error("no request exchange is bound to this guest")]
    NoExchange,

    /// A host value does not fit the 32-bit length field of the ABI.
    #[error("value of {len} bytes does not fit a 32-bit length")]
    LengthOverflow {
        /// Actual length of the value.
        len: usize,
    },
}

/// Violations of the invocation state machine.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// `next` was called twice.
    #[error("next called more than once")]
    DuplicateNext,

    /// `send_response` was called twice.
    #[error("send_response called more than once")]
    DuplicateResponse,

    /// `next` was called after `send_response`.
    #[error("next called after send_response")]
    NextAfterResponse,

    /// `send_response` was called after `next`.
    #[error("send_response called after next")]
    ResponseAfterNext,

    /// The guest returned without calling `next` or `send_response`.
    #[error("guest returned without calling next or send_response")]
    Unhandled,

    /// The request was mutated after it was already dispatched or answered.
    #[error("request already dispatched")]
    RequestAlreadyDispatched,

    /// The response body was accessed before `next` produced one.
    #[error("response body is only available after next")]
    ResponseNotReady,
}

/// Errors from host capability implementations.
#[derive(Error, Debug)]
pub enum HostError {
    /// The downstream handler failed.
    #[error("Downstream handler failed: {reason}")]
    Downstream {
        /// Description of the downstream failure.
        reason: String,
    },

    /// The log sink could not record a guest message.
    #[error("Failed to log guest message: {reason}")]
    LogFailed {
        /// Description of the sink failure.
        reason: String,
    },

    /// The guest supplied a path the server cannot represent.
    #[error("Invalid request path: {path}")]
    InvalidPath {
        /// The rejected path.
        path: String,
    },

    /// The guest supplied a header name or value the server cannot represent.
    #[error("Invalid header: {name}")]
    InvalidHeader {
        /// The rejected header name.
        name: String,
    },

    /// The guest supplied a status code outside 100..=999.
    #[error("Invalid status code: {code}")]
    InvalidStatus {
        /// The rejected status code.
        code: u32,
    },

    /// A buffered body exceeded the configured limit.
    #[error("Body exceeds {limit} bytes")]
    BodyTooLarge {
        /// The configured limit in bytes.
        limit: usize,
    },
}

impl RuntimeError {
    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `MissingExport` error.
    pub fn missing_export(name: impl Into<String>) -> Self {
        Self::MissingExport { name: name.into() }
    }

    /// Create a new `Instantiation` error.
    pub fn instantiation(reason: impl Into<String>) -> Self {
        Self::Instantiation {
            reason: reason.into(),
        }
    }

    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Trap {
            message: message.into(),
            code,
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors that make request processing impossible.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Self::CompilationFailed { .. }
                | Self::MissingExport { .. }
                | Self::Instantiation { .. }
                | Self::InvalidConfig { .. }
                | Self::Io(_)
        )
    }

    /// Returns `true` if the guest instance that produced this error must not
    /// be reused.
    ///
    /// Host capability failures leave the instance intact.
    pub fn is_guest_fault(&self) -> bool {
        matches!(
            self,
            Self::Abi(_) | Self::Protocol(_) | Self::Trap { .. } | Self::FuelExhausted
        )
    }

    /// Returns `true` if this error indicates a resource limit was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::FuelExhausted | Self::PoolExhausted { .. })
    }
}
