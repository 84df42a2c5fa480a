//! Typed ABI Call Layer
//!
//! One function per host capability. Each checks its inputs, calls the host,
//! maps the returned status and decodes the payload:
//!
//! - `Status::Ok` is success.
//! - `NotFound` / `Empty` become "no value" where the call is nullable by
//!   design (buffers, map values, properties, shared data, queues).
//! - Any other status is a [`HostCallError`] naming the function.
//! - A payload that fails to decode after `Ok` is a [`HostResponseError`].

use std::fmt::Debug;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::anyhow;

use crate::abi;
use crate::codec;
use crate::constants::*;
use crate::dispatcher;
use crate::error::{HostCallError, HostResponseError, Result};
use crate::types::*;

fn fail<T>(function: &'static str, status: Status) -> Result<T> {
    Err(HostCallError::new(function, status).into())
}

fn is_absent(status: Status) -> bool {
    matches!(status, Status::NotFound | Status::Empty)
}

fn to_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

/// Warn when a buffer/map is addressed outside the callback kind it belongs to
///
/// The call is still forwarded; its outcome is up to the host.
fn check_scope(function: &'static str, target: impl Debug, scope: Option<ContextKind>) {
    let (Some(required), Some(active)) = (scope, dispatcher::active_kind()) else {
        return;
    };
    if required != active {
        log::warn!(
            "[wasm:hostcall] {} on {:?} from a {:?} callback (expects {:?})",
            function,
            target,
            active,
            required
        );
    }
}

// ============================================================
// Logging / time
// ============================================================

pub fn log(level: LogLevel, message: &str) -> Result<()> {
    match abi::log(level, message) {
        Ok(()) => Ok(()),
        Err(status) => fail(PROXY_LOG, status),
    }
}

pub fn get_log_level() -> Result<LogLevel> {
    match abi::get_log_level() {
        Ok(level) => Ok(level),
        Err(status) => fail(PROXY_GET_LOG_LEVEL, status),
    }
}

pub fn get_current_time() -> Result<SystemTime> {
    match abi::get_current_time_nanoseconds() {
        Ok(nanos) => Ok(UNIX_EPOCH + Duration::from_nanos(nanos)),
        Err(status) => fail(PROXY_GET_CURRENT_TIME_NANOSECONDS, status),
    }
}

/// Opt in to periodic `on_tick`; a zero period stops ticking
pub fn set_tick_period(period: Duration) -> Result<()> {
    match abi::set_tick_period_milliseconds(to_millis(period)) {
        Ok(()) => Ok(()),
        Err(status) => fail(PROXY_SET_TICK_PERIOD_MILLISECONDS, status),
    }
}

// ============================================================
// Buffers
// ============================================================

/// Read `max_size` bytes from `start`; the host clamps the range
pub fn get_buffer(buffer_type: BufferType, start: usize, max_size: usize) -> Result<Option<Bytes>> {
    check_scope(PROXY_GET_BUFFER_BYTES, buffer_type, buffer_type.scope());
    match abi::get_buffer_bytes(buffer_type, start, max_size) {
        Ok(bytes) => Ok(bytes),
        Err(status) if is_absent(status) => Ok(None),
        Err(status) => fail(PROXY_GET_BUFFER_BYTES, status),
    }
}

/// Replace `size` bytes at `start` with `value`
pub fn set_buffer(buffer_type: BufferType, start: usize, size: usize, value: &[u8]) -> Result<()> {
    check_scope(PROXY_SET_BUFFER_BYTES, buffer_type, buffer_type.scope());
    match abi::set_buffer_bytes(buffer_type, start, size, value) {
        Ok(()) => Ok(()),
        Err(status) => fail(PROXY_SET_BUFFER_BYTES, status),
    }
}

/// Plugin configuration delivered with `on_configure`
pub fn get_configuration() -> Result<Option<Bytes>> {
    get_buffer(BufferType::PluginConfiguration, 0, usize::MAX)
}

/// VM configuration delivered with `on_vm_start`
pub fn get_vm_configuration() -> Result<Option<Bytes>> {
    get_buffer(BufferType::VmConfiguration, 0, usize::MAX)
}

// ============================================================
// Header / trailer maps
// ============================================================

/// Whole-collection read, in host order with duplicates kept
pub fn get_map(map_type: MapType) -> Result<Vec<(String, String)>> {
    check_scope(PROXY_GET_HEADER_MAP_PAIRS, map_type, map_type.scope());
    match abi::get_header_map_pairs(map_type) {
        Ok(Some(serialized)) => codec::deserialize_map(&serialized)
            .map_err(|err| HostResponseError::new(PROXY_GET_HEADER_MAP_PAIRS, err).into()),
        Ok(None) => Ok(Vec::new()),
        Err(status) => fail(PROXY_GET_HEADER_MAP_PAIRS, status),
    }
}

/// Whole-collection replace
pub fn set_map(map_type: MapType, map: &[(&str, &str)]) -> Result<()> {
    check_scope(PROXY_SET_HEADER_MAP_PAIRS, map_type, map_type.scope());
    let serialized = codec::serialize_map(map);
    match abi::set_header_map_pairs(map_type, &serialized) {
        Ok(()) => Ok(()),
        Err(status) => fail(PROXY_SET_HEADER_MAP_PAIRS, status),
    }
}

pub fn get_map_value(map_type: MapType, key: &str) -> Result<Option<String>> {
    check_scope(PROXY_GET_HEADER_MAP_VALUE, map_type, map_type.scope());
    match abi::get_header_map_value(map_type, key) {
        Ok(Some(value)) => String::from_utf8(value).map(Some).map_err(|err| {
            HostResponseError::new(
                PROXY_GET_HEADER_MAP_VALUE,
                anyhow!(err).context(format!("value of {:?}", key)),
            )
            .into()
        }),
        Ok(None) => Ok(None),
        Err(status) if is_absent(status) => Ok(None),
        Err(status) => fail(PROXY_GET_HEADER_MAP_VALUE, status),
    }
}

/// Replace every value of `key`; `None` removes the key
pub fn set_map_value(map_type: MapType, key: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(value) => {
            check_scope(PROXY_REPLACE_HEADER_MAP_VALUE, map_type, map_type.scope());
            match abi::replace_header_map_value(map_type, key, value) {
                Ok(()) => Ok(()),
                Err(status) => fail(PROXY_REPLACE_HEADER_MAP_VALUE, status),
            }
        }
        None => {
            check_scope(PROXY_REMOVE_HEADER_MAP_VALUE, map_type, map_type.scope());
            match abi::remove_header_map_value(map_type, key) {
                Ok(()) => Ok(()),
                Err(status) => fail(PROXY_REMOVE_HEADER_MAP_VALUE, status),
            }
        }
    }
}

/// Append a value, keeping existing values of `key`
pub fn add_map_value(map_type: MapType, key: &str, value: &str) -> Result<()> {
    check_scope(PROXY_ADD_HEADER_MAP_VALUE, map_type, map_type.scope());
    match abi::add_header_map_value(map_type, key, value) {
        Ok(()) => Ok(()),
        Err(status) => fail(PROXY_ADD_HEADER_MAP_VALUE, status),
    }
}

// ============================================================
// Properties
// ============================================================

pub fn get_property(path: &[&str]) -> Result<Option<Bytes>> {
    let serialized = codec::serialize_property_path(path);
    match abi::get_property(&serialized) {
        Ok(value) => Ok(value),
        Err(status) if is_absent(status) => Ok(None),
        Err(status) => fail(PROXY_GET_PROPERTY, status),
    }
}

/// `None` clears the property
pub fn set_property(path: &[&str], value: Option<&[u8]>) -> Result<()> {
    let serialized = codec::serialize_property_path(path);
    match abi::set_property(&serialized, value) {
        Ok(()) => Ok(()),
        Err(status) => fail(PROXY_SET_PROPERTY, status),
    }
}

// ============================================================
// Shared data (cross-VM, versioned)
// ============================================================

/// Value and CAS version of `key`; `(None, None)` when absent
pub fn get_shared_data(key: &str) -> Result<(Option<Bytes>, Option<u32>)> {
    match abi::get_shared_data(key) {
        Ok((value, cas)) => Ok((value, (cas != 0).then_some(cas))),
        Err(status) if is_absent(status) => Ok((None, None)),
        Err(status) => fail(PROXY_GET_SHARED_DATA, status),
    }
}

/// Write `key`; with `cas = Some(version)` the write only happens if the
/// stored version still equals `version`, otherwise `CasMismatch`
pub fn set_shared_data(key: &str, value: Option<&[u8]>, cas: Option<u32>) -> Result<()> {
    match abi::set_shared_data(key, value, cas.unwrap_or(0)) {
        Ok(()) => Ok(()),
        Err(status) => fail(PROXY_SET_SHARED_DATA, status),
    }
}

// ============================================================
// Shared queues (cross-VM, FIFO)
// ============================================================

/// Register (or reopen) a queue owned by this VM; readiness is delivered to
/// the registering root context
pub fn register_shared_queue(name: &str) -> Result<u32> {
    match abi::register_shared_queue(name) {
        Ok(queue_id) => Ok(queue_id),
        Err(status) => fail(PROXY_REGISTER_SHARED_QUEUE, status),
    }
}

pub fn resolve_shared_queue(vm_id: &str, name: &str) -> Result<Option<u32>> {
    match abi::resolve_shared_queue(vm_id, name) {
        Ok(queue_id) => Ok(Some(queue_id)),
        Err(status) if is_absent(status) => Ok(None),
        Err(status) => fail(PROXY_RESOLVE_SHARED_QUEUE, status),
    }
}

/// Pop the oldest item; `None` on an empty queue rather than blocking
pub fn dequeue_shared_queue(queue_id: u32) -> Result<Option<Bytes>> {
    match abi::dequeue_shared_queue(queue_id) {
        Ok(value) => Ok(value),
        Err(status) if is_absent(status) => Ok(None),
        Err(status) => fail(PROXY_DEQUEUE_SHARED_QUEUE, status),
    }
}

pub fn enqueue_shared_queue(queue_id: u32, value: Option<&[u8]>) -> Result<()> {
    match abi::enqueue_shared_queue(queue_id, value) {
        Ok(()) => Ok(()),
        Err(status) => fail(PROXY_ENQUEUE_SHARED_QUEUE, status),
    }
}

// ============================================================
// Flow control
// ============================================================

fn continue_stream(stream_type: StreamType) -> Result<()> {
    match abi::continue_stream(stream_type) {
        Ok(()) => Ok(()),
        Err(status) => fail(PROXY_CONTINUE_STREAM, status),
    }
}

fn close_stream(stream_type: StreamType) -> Result<()> {
    match abi::close_stream(stream_type) {
        Ok(()) => Ok(()),
        Err(status) => fail(PROXY_CLOSE_STREAM, status),
    }
}

pub fn resume_http_request() -> Result<()> {
    continue_stream(StreamType::HttpRequest)
}

pub fn resume_http_response() -> Result<()> {
    continue_stream(StreamType::HttpResponse)
}

pub fn resume_downstream() -> Result<()> {
    continue_stream(StreamType::Downstream)
}

pub fn resume_upstream() -> Result<()> {
    continue_stream(StreamType::Upstream)
}

pub fn close_downstream() -> Result<()> {
    close_stream(StreamType::Downstream)
}

pub fn close_upstream() -> Result<()> {
    close_stream(StreamType::Upstream)
}

/// Short-circuit the exchange with a locally generated response
pub fn send_http_response(
    status_code: u32,
    headers: &[(&str, &str)],
    body: Option<&[u8]>,
) -> Result<()> {
    send_http_response_with_details(status_code, None, headers, body)
}

/// [`send_http_response`] with a status detail string for the access log
pub fn send_http_response_with_details(
    status_code: u32,
    details: Option<&str>,
    headers: &[(&str, &str)],
    body: Option<&[u8]>,
) -> Result<()> {
    let serialized = codec::serialize_map(headers);
    match abi::send_local_response(status_code, details, body, &serialized, NO_GRPC_STATUS) {
        Ok(()) => Ok(()),
        Err(status) => fail(PROXY_SEND_LOCAL_RESPONSE, status),
    }
}

pub fn clear_http_route_cache() -> Result<()> {
    match abi::clear_route_cache() {
        Ok(()) => Ok(()),
        Err(status) => fail(PROXY_CLEAR_ROUTE_CACHE, status),
    }
}

// ============================================================
// Outbound HTTP calls
// ============================================================

/// Dispatch an HTTP call to `upstream`
///
/// Returns the call token at once. The response is delivered later through
/// `on_http_call_response` of the context active when this was called, or
/// dropped if that context is torn down first.
pub fn dispatch_http_call(
    upstream: &str,
    headers: &[(&str, &str)],
    body: Option<&[u8]>,
    trailers: &[(&str, &str)],
    timeout: Duration,
) -> Result<u32> {
    let serialized_headers = codec::serialize_map(headers);
    let serialized_trailers = codec::serialize_map(trailers);
    match abi::http_call(
        upstream,
        &serialized_headers,
        body,
        &serialized_trailers,
        to_millis(timeout),
    ) {
        Ok(token) => {
            if dispatcher::register_callout(token) {
                Ok(token)
            } else {
                Err(HostResponseError::new(
                    PROXY_HTTP_CALL,
                    anyhow!("token {} is already outstanding", token),
                )
                .into())
            }
        }
        Err(status) => fail(PROXY_HTTP_CALL, status),
    }
}

// ============================================================
// Context lifecycle
// ============================================================

/// Make `context_id` the host's current context for subsequent calls
pub fn set_effective_context(context_id: u32) -> Result<()> {
    match abi::set_effective_context(context_id) {
        Ok(()) => {
            dispatcher::set_effective_context(context_id);
            Ok(())
        }
        Err(status) => fail(PROXY_SET_EFFECTIVE_CONTEXT, status),
    }
}

/// Tell the host the current context finished its deferred work
pub fn done() -> Result<()> {
    match abi::done() {
        Ok(()) => Ok(()),
        Err(status) => fail(PROXY_DONE, status),
    }
}
