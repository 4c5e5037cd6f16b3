//! Host function registration for Wasmtime linkers.
//!
//! This is the dispatch table for the `http-handler` imports. Every function
//! follows the same shape: re-read the guest's memory export, validate each
//! `(offset, len)` through [`http_wasm_core::memory`], check the invocation
//! state where the call has one, then call exactly one [`Host`] method.
//!
//! Any error returned here traps the guest. The error value survives the
//! trap and is classified by [`http_wasm_core::classify_error`].

use std::sync::Arc;

use tracing::trace;
use wasmtime::{Caller, Extern, Linker, Memory};

use http_wasm_common::{AbiError, ProtocolError, RuntimeError};
use http_wasm_core::abi::{self, HOST_MODULE};
use http_wasm_core::memory::{checked_range, len_u32, read, read_str, write, write_if_fits};
use http_wasm_core::{GuestContext, Host};

type Ctx<'a, H> = Caller<'a, GuestContext<H>>;

/// Register every `http-handler` import, plus WASI preview1 when `wasi` is
/// set.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_all<H: Host>(
    linker: &mut Linker<GuestContext<H>>,
    wasi: bool,
) -> Result<(), RuntimeError> {
    register_logging(linker)?;
    register_request(linker)?;
    register_response(linker)?;
    if wasi {
        register_wasi(linker)?;
    }
    Ok(())
}

/// Register `log` and `get_config`, the two functions usable from `_start`.
pub fn register_logging<H: Host>(linker: &mut Linker<GuestContext<H>>) -> Result<(), RuntimeError> {
    linker
        .func_wrap(HOST_MODULE, abi::FUNC_LOG, log::<H>)
        .map_err(registration_failed(abi::FUNC_LOG))?;
    linker
        .func_wrap(HOST_MODULE, abi::FUNC_GET_CONFIG, get_config::<H>)
        .map_err(registration_failed(abi::FUNC_GET_CONFIG))?;
    Ok(())
}

/// Register the request-side functions.
pub fn register_request<H: Host>(linker: &mut Linker<GuestContext<H>>) -> Result<(), RuntimeError> {
    linker
        .func_wrap(HOST_MODULE, abi::FUNC_GET_METHOD, get_method::<H>)
        .map_err(registration_failed(abi::FUNC_GET_METHOD))?;
    linker
        .func_wrap(HOST_MODULE, abi::FUNC_GET_PATH, get_path::<H>)
        .map_err(registration_failed(abi::FUNC_GET_PATH))?;
    linker
        .func_wrap(HOST_MODULE, abi::FUNC_SET_PATH, set_path::<H>)
        .map_err(registration_failed(abi::FUNC_SET_PATH))?;
    linker
        .func_wrap(
            HOST_MODULE,
            abi::FUNC_GET_PROTOCOL_VERSION,
            get_protocol_version::<H>,
        )
        .map_err(registration_failed(abi::FUNC_GET_PROTOCOL_VERSION))?;
    linker
        .func_wrap(
            HOST_MODULE,
            abi::FUNC_GET_REQUEST_HEADER,
            get_request_header::<H>,
        )
        .map_err(registration_failed(abi::FUNC_GET_REQUEST_HEADER))?;
    linker
        .func_wrap(HOST_MODULE, abi::FUNC_READ_REQUEST_BODY, read_request_body::<H>)
        .map_err(registration_failed(abi::FUNC_READ_REQUEST_BODY))?;
    linker
        .func_wrap(
            HOST_MODULE,
            abi::FUNC_WRITE_REQUEST_BODY,
            write_request_body::<H>,
        )
        .map_err(registration_failed(abi::FUNC_WRITE_REQUEST_BODY))?;
    Ok(())
}

/// Register the response-side functions, including `next`.
pub fn register_response<H: Host>(
    linker: &mut Linker<GuestContext<H>>,
) -> Result<(), RuntimeError> {
    linker
        .func_wrap(
            HOST_MODULE,
            abi::FUNC_SET_RESPONSE_HEADER,
            set_response_header::<H>,
        )
        .map_err(registration_failed(abi::FUNC_SET_RESPONSE_HEADER))?;
    linker
        .func_wrap(HOST_MODULE, abi::FUNC_SEND_RESPONSE, send_response::<H>)
        .map_err(registration_failed(abi::FUNC_SEND_RESPONSE))?;
    linker
        .func_wrap_async(HOST_MODULE, abi::FUNC_NEXT, |caller: Ctx<'_, H>, (): ()| {
            Box::new(next(caller))
        })
        .map_err(registration_failed(abi::FUNC_NEXT))?;
    linker
        .func_wrap(
            HOST_MODULE,
            abi::FUNC_READ_RESPONSE_BODY,
            read_response_body::<H>,
        )
        .map_err(registration_failed(abi::FUNC_READ_RESPONSE_BODY))?;
    linker
        .func_wrap(
            HOST_MODULE,
            abi::FUNC_WRITE_RESPONSE_BODY,
            write_response_body::<H>,
        )
        .map_err(registration_failed(abi::FUNC_WRITE_RESPONSE_BODY))?;
    Ok(())
}

/// Register WASI preview1 so guests built by standard toolchains link.
pub fn register_wasi<H: Host>(linker: &mut Linker<GuestContext<H>>) -> Result<(), RuntimeError> {
    wasmtime_wasi::preview1::add_to_linker_async(linker, GuestContext::<H>::wasi_mut).map_err(|e| {
        RuntimeError::invalid_config(format!("Failed to register WASI preview1: {e}"))
    })
}

fn registration_failed(name: &'static str) -> impl Fn(wasmtime::Error) -> RuntimeError {
    move |e| RuntimeError::invalid_config(format!("Failed to register {name}: {e}"))
}

/// The guest's memory, looked up on every call since it may have grown.
fn guest_memory<T>(caller: &mut Caller<'_, T>) -> Result<Memory, AbiError> {
    caller
        .get_export(abi::MEMORY)
        .and_then(Extern::into_memory)
        .ok_or(AbiError::MissingMemory)
}

fn require_exchange<H: Host>(ctx: &GuestContext<H>) -> Result<(), AbiError> {
    ctx.exchange().map(|_| ()).ok_or(AbiError::NoExchange)
}

/// `log(message, message_len)`
fn log<H: Host>(mut caller: Ctx<'_, H>, message: u32, message_len: u32) -> wasmtime::Result<()> {
    let memory = guest_memory(&mut caller)?;
    let (data, ctx) = memory.data_and_store_mut(&mut caller);
    let message = read_str(data, message, message_len)?;
    ctx.host().log(ctx.exchange(), message)?;
    Ok(())
}

/// `get_config(buf, buf_limit) -> config_len`
fn get_config<H: Host>(mut caller: Ctx<'_, H>, buf: u32, buf_limit: u32) -> wasmtime::Result<u32> {
    let memory = guest_memory(&mut caller)?;
    let (data, ctx) = memory.data_and_store_mut(&mut caller);
    Ok(write_if_fits(data, buf, buf_limit, ctx.guest_config())?)
}

/// `get_method(buf, buf_limit) -> method_len`
fn get_method<H: Host>(mut caller: Ctx<'_, H>, buf: u32, buf_limit: u32) -> wasmtime::Result<u32> {
    let memory = guest_memory(&mut caller)?;
    let (data, ctx) = memory.data_and_store_mut(&mut caller);
    let method = ctx.with_exchange(|host, ex| host.get_method(ex))?;
    Ok(write_if_fits(data, buf, buf_limit, method.as_bytes())?)
}

/// `get_path(buf, buf_limit) -> path_len`
fn get_path<H: Host>(mut caller: Ctx<'_, H>, buf: u32, buf_limit: u32) -> wasmtime::Result<u32> {
    let memory = guest_memory(&mut caller)?;
    let (data, ctx) = memory.data_and_store_mut(&mut caller);
    let path = ctx.with_exchange(|host, ex| host.get_path(ex))?;
    Ok(write_if_fits(data, buf, buf_limit, path.as_bytes())?)
}

/// `set_path(path, path_len)`
fn set_path<H: Host>(mut caller: Ctx<'_, H>, path: u32, path_len: u32) -> wasmtime::Result<()> {
    let memory = guest_memory(&mut caller)?;
    let (data, ctx) = memory.data_and_store_mut(&mut caller);
    let path = read_str(data, path, path_len)?;
    require_exchange(ctx)?;
    if !ctx.state.request_mutable() {
        return Err(ProtocolError::RequestAlreadyDispatched.into());
    }
    trace!(path, "set_path");
    ctx.with_exchange(|host, ex| host.set_path(ex, path))??;
    Ok(())
}

/// `get_protocol_version(buf, buf_limit) -> version_len`
fn get_protocol_version<H: Host>(
    mut caller: Ctx<'_, H>,
    buf: u32,
    buf_limit: u32,
) -> wasmtime::Result<u32> {
    let memory = guest_memory(&mut caller)?;
    let (data, ctx) = memory.data_and_store_mut(&mut caller);
    let version = ctx.with_exchange(|host, ex| host.get_protocol_version(ex))?;
    Ok(write_if_fits(data, buf, buf_limit, version.as_bytes())?)
}

/// `get_request_header(name, name_len, buf, buf_limit) -> 0 | 1<<32 | value_len`
fn get_request_header<H: Host>(
    mut caller: Ctx<'_, H>,
    name: u32,
    name_len: u32,
    buf: u32,
    buf_limit: u32,
) -> wasmtime::Result<u64> {
    let memory = guest_memory(&mut caller)?;
    let (data, ctx) = memory.data_and_store_mut(&mut caller);
    checked_range(data.len(), buf, buf_limit)?;
    let name = read_str(data, name, name_len)?;

    let Some(value) = ctx.with_exchange(|host, ex| host.get_request_header(ex, name))? else {
        return Ok(abi::HEADER_ABSENT);
    };
    let value_len = write_if_fits(data, buf, buf_limit, &value)?;
    Ok(abi::pack_header(value_len))
}

/// `read_request_body(buf, buf_limit) -> eof<<32 | bytes_read`
fn read_request_body<H: Host>(
    mut caller: Ctx<'_, H>,
    buf: u32,
    buf_limit: u32,
) -> wasmtime::Result<u64> {
    let memory = guest_memory(&mut caller)?;
    let (data, ctx) = memory.data_and_store_mut(&mut caller);
    checked_range(data.len(), buf, buf_limit)?;

    let chunk = ctx.with_exchange(|host, ex| host.read_request_body(ex, buf_limit as usize))??;
    let read_len = len_u32(chunk.bytes.len())?;
    write(data, buf, &chunk.bytes)?;
    Ok(abi::pack_body_read(chunk.eof, read_len))
}

/// `write_request_body(body, body_len)`
fn write_request_body<H: Host>(
    mut caller: Ctx<'_, H>,
    body: u32,
    body_len: u32,
) -> wasmtime::Result<()> {
    let memory = guest_memory(&mut caller)?;
    let (data, ctx) = memory.data_and_store_mut(&mut caller);
    let body = read(data, body, body_len)?;
    require_exchange(ctx)?;
    if !ctx.state.request_mutable() {
        return Err(ProtocolError::RequestAlreadyDispatched.into());
    }
    ctx.with_exchange(|host, ex| host.write_request_body(ex, body))??;
    Ok(())
}

/// `set_response_header(name, name_len, value, value_len)`
fn set_response_header<H: Host>(
    mut caller: Ctx<'_, H>,
    name: u32,
    name_len: u32,
    value: u32,
    value_len: u32,
) -> wasmtime::Result<()> {
    let memory = guest_memory(&mut caller)?;
    let (data, ctx) = memory.data_and_store_mut(&mut caller);
    let name = read_str(data, name, name_len)?;
    let value = read_str(data, value, value_len)?;
    ctx.with_exchange(|host, ex| host.set_response_header(ex, name, value))??;
    Ok(())
}

/// `send_response(status_code, body, body_len)`
fn send_response<H: Host>(
    mut caller: Ctx<'_, H>,
    status_code: u32,
    body: u32,
    body_len: u32,
) -> wasmtime::Result<()> {
    let memory = guest_memory(&mut caller)?;
    let (data, ctx) = memory.data_and_store_mut(&mut caller);
    let body = read(data, body, body_len)?;
    require_exchange(ctx)?;
    ctx.state.on_send_response()?;
    trace!(status_code, body_len, "send_response");
    ctx.with_exchange(|host, ex| host.send_response(ex, status_code, body))??;
    Ok(())
}

/// `next()`
///
/// The only import that awaits: the downstream handler runs while the guest
/// is suspended inside this call.
async fn next<H: Host>(mut caller: Ctx<'_, H>) -> wasmtime::Result<()> {
    let ctx = caller.data_mut();
    require_exchange(ctx)?;
    ctx.state.on_next()?;
    trace!("next");

    let host = Arc::clone(ctx.host());
    let exchange = ctx.exchange_mut()?;
    host.next(exchange).await?;
    Ok(())
}

/// `read_response_body(buf, buf_limit) -> eof<<32 | bytes_read`
fn read_response_body<H: Host>(
    mut caller: Ctx<'_, H>,
    buf: u32,
    buf_limit: u32,
) -> wasmtime::Result<u64> {
    let memory = guest_memory(&mut caller)?;
    let (data, ctx) = memory.data_and_store_mut(&mut caller);
    checked_range(data.len(), buf, buf_limit)?;
    require_exchange(ctx)?;
    if !ctx.state.response_available() {
        return Err(ProtocolError::ResponseNotReady.into());
    }

    let chunk = ctx.with_exchange(|host, ex| host.read_response_body(ex, buf_limit as usize))??;
    let read_len = len_u32(chunk.bytes.len())?;
    write(data, buf, &chunk.bytes)?;
    Ok(abi::pack_body_read(chunk.eof, read_len))
}

/// `write_response_body(body, body_len)`
fn write_response_body<H: Host>(
    mut caller: Ctx<'_, H>,
    body: u32,
    body_len: u32,
) -> wasmtime::Result<()> {
    let memory = guest_memory(&mut caller)?;
    let (data, ctx) = memory.data_and_store_mut(&mut caller);
    let body = read(data, body, body_len)?;
    require_exchange(ctx)?;
    if !ctx.state.response_available() {
        return Err(ProtocolError::ResponseNotReady.into());
    }
    ctx.with_exchange(|host, ex| host.write_response_body(ex, body))??;
    Ok(())
}
