//! Native Host Binding
//!
//! Routes host calls to a [`Host`] implementation installed per thread.
//! A VM is single-threaded, so one thread stands for one VM instance.

use std::cell::RefCell;

use crate::types::{BufferType, Bytes, LogLevel, MapType, Status, StreamType};

/// Host side of the Proxy-Wasm ABI, as seen from a native guest
///
/// Header maps and property paths arrive in their serialized wire form
/// (see [`crate::codec`]). Implementations report failures with a non-Ok
/// [`Status`]; returning `Err(Status::Ok)` is a contract violation.
#[cfg_attr(test, mockall::automock)]
pub trait Host {
    fn log(&mut self, level: LogLevel, message: &str) -> Result<(), Status>;

    fn get_log_level(&mut self) -> Result<LogLevel, Status>;

    fn get_current_time_nanoseconds(&mut self) -> Result<u64, Status>;

    fn set_tick_period_milliseconds(&mut self, period: u32) -> Result<(), Status>;

    fn get_buffer_bytes(
        &mut self,
        buffer_type: BufferType,
        start: usize,
        max_size: usize,
    ) -> Result<Option<Bytes>, Status>;

    fn set_buffer_bytes(
        &mut self,
        buffer_type: BufferType,
        start: usize,
        size: usize,
        value: &[u8],
    ) -> Result<(), Status>;

    fn get_header_map_pairs(&mut self, map_type: MapType) -> Result<Option<Bytes>, Status>;

    fn set_header_map_pairs(&mut self, map_type: MapType, map: &[u8]) -> Result<(), Status>;

    fn get_header_map_value(&mut self, map_type: MapType, key: &str)
        -> Result<Option<Bytes>, Status>;

    fn replace_header_map_value(
        &mut self,
        map_type: MapType,
        key: &str,
        value: &str,
    ) -> Result<(), Status>;

    fn remove_header_map_value(&mut self, map_type: MapType, key: &str) -> Result<(), Status>;

    fn add_header_map_value(&mut self, map_type: MapType, key: &str, value: &str)
        -> Result<(), Status>;

    fn get_property(&mut self, path: &[u8]) -> Result<Option<Bytes>, Status>;

    fn set_property(&mut self, path: &[u8], value: Option<Bytes>) -> Result<(), Status>;

    /// Returns the value and its CAS version (0 when unversioned)
    fn get_shared_data(&mut self, key: &str) -> Result<(Option<Bytes>, u32), Status>;

    /// `cas == 0` writes unconditionally
    fn set_shared_data(&mut self, key: &str, value: Option<Bytes>, cas: u32) -> Result<(), Status>;

    fn register_shared_queue(&mut self, name: &str) -> Result<u32, Status>;

    fn resolve_shared_queue(&mut self, vm_id: &str, name: &str) -> Result<u32, Status>;

    fn dequeue_shared_queue(&mut self, queue_id: u32) -> Result<Option<Bytes>, Status>;

    fn enqueue_shared_queue(&mut self, queue_id: u32, value: Option<Bytes>) -> Result<(), Status>;

    fn continue_stream(&mut self, stream_type: StreamType) -> Result<(), Status>;

    fn close_stream(&mut self, stream_type: StreamType) -> Result<(), Status>;

    fn send_local_response(
        &mut self,
        status_code: u32,
        details: Option<String>,
        body: Option<Bytes>,
        headers: &[u8],
        grpc_status: i32,
    ) -> Result<(), Status>;

    fn clear_route_cache(&mut self) -> Result<(), Status>;

    fn http_call(
        &mut self,
        upstream: &str,
        headers: &[u8],
        body: Option<Bytes>,
        trailers: &[u8],
        timeout_ms: u32,
    ) -> Result<u32, Status>;

    fn set_effective_context(&mut self, context_id: u32) -> Result<(), Status>;

    fn done(&mut self) -> Result<(), Status>;
}

thread_local! {
    static HOST: RefCell<Option<Box<dyn Host>>> = RefCell::new(None);
}

/// Install the host for the current thread, returning the previous one
pub fn install_host(host: Box<dyn Host>) -> Option<Box<dyn Host>> {
    HOST.with(|slot| slot.borrow_mut().replace(host))
}

/// Remove the host for the current thread
pub fn uninstall_host() -> Option<Box<dyn Host>> {
    HOST.with(|slot| slot.borrow_mut().take())
}

/// Whether a host is installed for the current thread
pub fn has_host() -> bool {
    HOST.with(|slot| slot.borrow().is_some())
}

/// Run `f` against the installed host
///
/// `Unimplemented` when no host is installed; `InternalFailure` when the host
/// re-enters the boundary from inside one of its own functions.
fn with_host<T>(f: impl FnOnce(&mut dyn Host) -> Result<T, Status>) -> Result<T, Status> {
    HOST.with(|slot| {
        let mut slot = slot.try_borrow_mut().map_err(|_| Status::InternalFailure)?;
        match slot.as_mut() {
            Some(host) => f(&mut **host),
            None => Err(Status::Unimplemented),
        }
    })
}

pub(crate) fn log(level: LogLevel, message: &str) -> Result<(), Status> {
    with_host(|host| host.log(level, message))
}

pub(crate) fn get_log_level() -> Result<LogLevel, Status> {
    with_host(|host| host.get_log_level())
}

pub(crate) fn get_current_time_nanoseconds() -> Result<u64, Status> {
    with_host(|host| host.get_current_time_nanoseconds())
}

pub(crate) fn set_tick_period_milliseconds(period: u32) -> Result<(), Status> {
    with_host(|host| host.set_tick_period_milliseconds(period))
}

pub(crate) fn get_buffer_bytes(
    buffer_type: BufferType,
    start: usize,
    max_size: usize,
) -> Result<Option<Bytes>, Status> {
    with_host(|host| host.get_buffer_bytes(buffer_type, start, max_size))
}

pub(crate) fn set_buffer_bytes(
    buffer_type: BufferType,
    start: usize,
    size: usize,
    value: &[u8],
) -> Result<(), Status> {
    with_host(|host| host.set_buffer_bytes(buffer_type, start, size, value))
}

pub(crate) fn get_header_map_pairs(map_type: MapType) -> Result<Option<Bytes>, Status> {
    with_host(|host| host.get_header_map_pairs(map_type))
}

pub(crate) fn set_header_map_pairs(map_type: MapType, map: &[u8]) -> Result<(), Status> {
    with_host(|host| host.set_header_map_pairs(map_type, map))
}

pub(crate) fn get_header_map_value(map_type: MapType, key: &str) -> Result<Option<Bytes>, Status> {
    with_host(|host| host.get_header_map_value(map_type, key))
}

pub(crate) fn replace_header_map_value(
    map_type: MapType,
    key: &str,
    value: &str,
) -> Result<(), Status> {
    with_host(|host| host.replace_header_map_value(map_type, key, value))
}

pub(crate) fn remove_header_map_value(map_type: MapType, key: &str) -> Result<(), Status> {
    with_host(|host| host.remove_header_map_value(map_type, key))
}

pub(crate) fn add_header_map_value(map_type: MapType, key: &str, value: &str) -> Result<(), Status> {
    with_host(|host| host.add_header_map_value(map_type, key, value))
}

pub(crate) fn get_property(path: &[u8]) -> Result<Option<Bytes>, Status> {
    with_host(|host| host.get_property(path))
}

pub(crate) fn set_property(path: &[u8], value: Option<&[u8]>) -> Result<(), Status> {
    with_host(|host| host.set_property(path, value.map(<[u8]>::to_vec)))
}

pub(crate) fn get_shared_data(key: &str) -> Result<(Option<Bytes>, u32), Status> {
    with_host(|host| host.get_shared_data(key))
}

pub(crate) fn set_shared_data(key: &str, value: Option<&[u8]>, cas: u32) -> Result<(), Status> {
    with_host(|host| host.set_shared_data(key, value.map(<[u8]>::to_vec), cas))
}

pub(crate) fn register_shared_queue(name: &str) -> Result<u32, Status> {
    with_host(|host| host.register_shared_queue(name))
}

pub(crate) fn resolve_shared_queue(vm_id: &str, name: &str) -> Result<u32, Status> {
    with_host(|host| host.resolve_shared_queue(vm_id, name))
}

pub(crate) fn dequeue_shared_queue(queue_id: u32) -> Result<Option<Bytes>, Status> {
    with_host(|host| host.dequeue_shared_queue(queue_id))
}

pub(crate) fn enqueue_shared_queue(queue_id: u32, value: Option<&[u8]>) -> Result<(), Status> {
    with_host(|host| host.enqueue_shared_queue(queue_id, value.map(<[u8]>::to_vec)))
}

pub(crate) fn continue_stream(stream_type: StreamType) -> Result<(), Status> {
    with_host(|host| host.continue_stream(stream_type))
}

pub(crate) fn close_stream(stream_type: StreamType) -> Result<(), Status> {
    with_host(|host| host.close_stream(stream_type))
}

pub(crate) fn send_local_response(
    status_code: u32,
    details: Option<&str>,
    body: Option<&[u8]>,
    headers: &[u8],
    grpc_status: i32,
) -> Result<(), Status> {
    with_host(|host| {
        host.send_local_response(
            status_code,
            details.map(str::to_string),
            body.map(<[u8]>::to_vec),
            headers,
            grpc_status,
        )
    })
}

pub(crate) fn clear_route_cache() -> Result<(), Status> {
    with_host(|host| host.clear_route_cache())
}

pub(crate) fn http_call(
    upstream: &str,
    headers: &[u8],
    body: Option<&[u8]>,
    trailers: &[u8],
    timeout_ms: u32,
) -> Result<u32, Status> {
    with_host(|host| host.http_call(upstream, headers, body.map(<[u8]>::to_vec), trailers, timeout_ms))
}

pub(crate) fn set_effective_context(context_id: u32) -> Result<(), Status> {
    with_host(|host| host.set_effective_context(context_id))
}

pub(crate) fn done() -> Result<(), Status> {
    with_host(|host| host.done())
}
