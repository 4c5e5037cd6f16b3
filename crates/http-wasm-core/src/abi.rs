//! The host/guest ABI: import names and packed result encodings.
//!
//! Every value crossing the boundary is a 32-bit or 64-bit integer. Guests
//! import host functions from [`HOST_MODULE`] and export [`FUNC_HANDLE`] plus
//! their linear memory. Names, parameter order and bit layouts here are a
//! compatibility surface with existing guest binaries.
//!
//! # Buffer-limit idiom
//!
//! Functions returning variable-length values take `(buf, buf_limit)`. The
//! value is written only when it fits in `buf_limit` bytes, but its true
//! length is always returned. A guest can query the length with
//! `buf_limit = 0`, then retry with a right-sized buffer.

/// Module name of every function the host exports.
pub const HOST_MODULE: &str = "http-handler";

/// Guest export invoked once per exchange: `() -> ()`.
pub const FUNC_HANDLE: &str = "handle";

/// Optional guest export invoked once per instance after instantiation.
pub const FUNC_START: &str = "_start";

/// Guest linear memory export.
pub const MEMORY: &str = "memory";

/// `log(message, message_len)`
pub const FUNC_LOG: &str = "log";

/// `get_config(buf, buf_limit) -> config_len`
pub const FUNC_GET_CONFIG: &str = "get_config";

/// `get_method(buf, buf_limit) -> method_len`
pub const FUNC_GET_METHOD: &str = "get_method";

/// `get_path(buf, buf_limit) -> path_len`
pub const FUNC_GET_PATH: &str = "get_path";

/// `set_path(path, path_len)`
pub const FUNC_SET_PATH: &str = "set_path";

/// `get_protocol_version(buf, buf_limit) -> version_len`
pub const FUNC_GET_PROTOCOL_VERSION: &str = "get_protocol_version";

/// `get_request_header(name, name_len, buf, buf_limit) -> 0 | 1<<32 | value_len`
pub const FUNC_GET_REQUEST_HEADER: &str = "get_request_header";

/// `read_request_body(buf, buf_limit) -> eof<<32 | bytes_read`
pub const FUNC_READ_REQUEST_BODY: &str = "read_request_body";

/// `write_request_body(body, body_len)`
pub const FUNC_WRITE_REQUEST_BODY: &str = "write_request_body";

/// `set_response_header(name, name_len, value, value_len)`
pub const FUNC_SET_RESPONSE_HEADER: &str = "set_response_header";

/// `send_response(status_code, body, body_len)`
pub const FUNC_SEND_RESPONSE: &str = "send_response";

/// `next()`
pub const FUNC_NEXT: &str = "next";

/// `read_response_body(buf, buf_limit) -> eof<<32 | bytes_read`
pub const FUNC_READ_RESPONSE_BODY: &str = "read_response_body";

/// `write_response_body(body, body_len)`
pub const FUNC_WRITE_RESPONSE_BODY: &str = "write_response_body";

/// Packed result of `get_request_header` for a missing header.
pub const HEADER_ABSENT: u64 = 0;

/// Pack the result of `get_request_header` for a present header.
pub const fn pack_header(value_len: u32) -> u64 {
    (1 << 32) | value_len as u64
}

/// Pack the result of a body read.
pub const fn pack_body_read(eof: bool, bytes_read: u32) -> u64 {
    ((eof as u64) << 32) | bytes_read as u64
}

/// Split a packed `(flag<<32) | len` result into its flag and length.
pub const fn unpack(result: u64) -> (bool, u32) {
    // Truncation keeps the low 32 bits, as `i32.wrap_i64` does on the guest
    #[allow(clippy::cast_possible_truncation)]
    let len = result as u32;
    (result >> 32 != 0, len)
}

/// A chunk returned by a body read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyChunk {
    /// Bytes read, at most the requested limit.
    pub bytes: Vec<u8>,
    /// The body has no more bytes after this chunk.
    pub eof: bool,
}

impl BodyChunk {
    /// Create a chunk.
    pub fn new(bytes: Vec<u8>, eof: bool) -> Self {
        Self { bytes, eof }
    }
}
