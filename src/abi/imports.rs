//! Proxy-Wasm Host Imports
//!
//! `extern "C"` declarations of the v0.2.1 host functions and the safe
//! wrappers around them. Buffers returned by the host are allocated through
//! [`crate::allocator::proxy_on_memory_allocate`] and owned by the guest
//! once the call returns.

use std::ptr::{null, null_mut};

use crate::types::{BufferType, Bytes, LogLevel, MapType, Status, StreamType};

#[link(wasm_import_module = "env")]
extern "C" {
    fn proxy_log(level: u32, message_data: *const u8, message_size: usize) -> u32;
    fn proxy_get_log_level(return_level: *mut u32) -> u32;
    fn proxy_get_current_time_nanoseconds(return_time: *mut u64) -> u32;
    fn proxy_set_tick_period_milliseconds(period: u32) -> u32;
    fn proxy_get_buffer_bytes(
        buffer_type: u32,
        start: usize,
        max_size: usize,
        return_buffer_data: *mut *mut u8,
        return_buffer_size: *mut usize,
    ) -> u32;
    fn proxy_set_buffer_bytes(
        buffer_type: u32,
        start: usize,
        size: usize,
        buffer_data: *const u8,
        buffer_size: usize,
    ) -> u32;
    fn proxy_get_header_map_pairs(
        map_type: u32,
        return_map_data: *mut *mut u8,
        return_map_size: *mut usize,
    ) -> u32;
    fn proxy_set_header_map_pairs(map_type: u32, map_data: *const u8, map_size: usize) -> u32;
    fn proxy_get_header_map_value(
        map_type: u32,
        key_data: *const u8,
        key_size: usize,
        return_value_data: *mut *mut u8,
        return_value_size: *mut usize,
    ) -> u32;
    fn proxy_replace_header_map_value(
        map_type: u32,
        key_data: *const u8,
        key_size: usize,
        value_data: *const u8,
        value_size: usize,
    ) -> u32;
    fn proxy_remove_header_map_value(map_type: u32, key_data: *const u8, key_size: usize) -> u32;
    fn proxy_add_header_map_value(
        map_type: u32,
        key_data: *const u8,
        key_size: usize,
        value_data: *const u8,
        value_size: usize,
    ) -> u32;
    fn proxy_get_property(
        path_data: *const u8,
        path_size: usize,
        return_value_data: *mut *mut u8,
        return_value_size: *mut usize,
    ) -> u32;
    fn proxy_set_property(
        path_data: *const u8,
        path_size: usize,
        value_data: *const u8,
        value_size: usize,
    ) -> u32;
    fn proxy_get_shared_data(
        key_data: *const u8,
        key_size: usize,
        return_value_data: *mut *mut u8,
        return_value_size: *mut usize,
        return_cas: *mut u32,
    ) -> u32;
    fn proxy_set_shared_data(
        key_data: *const u8,
        key_size: usize,
        value_data: *const u8,
        value_size: usize,
        cas: u32,
    ) -> u32;
    fn proxy_register_shared_queue(name_data: *const u8, name_size: usize, return_id: *mut u32)
        -> u32;
    fn proxy_resolve_shared_queue(
        vm_id_data: *const u8,
        vm_id_size: usize,
        name_data: *const u8,
        name_size: usize,
        return_id: *mut u32,
    ) -> u32;
    fn proxy_dequeue_shared_queue(
        queue_id: u32,
        return_value_data: *mut *mut u8,
        return_value_size: *mut usize,
    ) -> u32;
    fn proxy_enqueue_shared_queue(queue_id: u32, value_data: *const u8, value_size: usize) -> u32;
    fn proxy_continue_stream(stream_type: u32) -> u32;
    fn proxy_close_stream(stream_type: u32) -> u32;
    fn proxy_send_local_response(
        status_code: u32,
        status_code_details_data: *const u8,
        status_code_details_size: usize,
        body_data: *const u8,
        body_size: usize,
        headers_data: *const u8,
        headers_size: usize,
        grpc_status: i32,
    ) -> u32;
    fn proxy_clear_route_cache() -> u32;
    fn proxy_http_call(
        upstream_data: *const u8,
        upstream_size: usize,
        headers_data: *const u8,
        headers_size: usize,
        body_data: *const u8,
        body_size: usize,
        trailers_data: *const u8,
        trailers_size: usize,
        timeout: u32,
        return_token: *mut u32,
    ) -> u32;
    fn proxy_set_effective_context(context_id: u32) -> u32;
    fn proxy_done() -> u32;
}

/// Map a raw status; codes this crate does not know are reported as
/// `InternalFailure`
fn check(raw: u32) -> Result<(), Status> {
    match Status::from_raw(raw) {
        Some(Status::Ok) => Ok(()),
        Some(status) => Err(status),
        None => Err(Status::InternalFailure),
    }
}

/// Take ownership of a host-allocated buffer
///
/// # Safety
///
/// `data` must be null or a `size`-byte allocation made by
/// `proxy_on_memory_allocate` that nothing else owns.
unsafe fn take_buffer(data: *mut u8, size: usize) -> Option<Bytes> {
    if data.is_null() {
        None
    } else {
        Some(Vec::from_raw_parts(data, size, size))
    }
}

fn optional_parts(value: Option<&[u8]>) -> (*const u8, usize) {
    value.map_or((null(), 0), |value| (value.as_ptr(), value.len()))
}

pub(crate) fn log(level: LogLevel, message: &str) -> Result<(), Status> {
    unsafe { check(proxy_log(level as u32, message.as_ptr(), message.len())) }
}

pub(crate) fn get_log_level() -> Result<LogLevel, Status> {
    let mut return_level: u32 = 0;
    unsafe { check(proxy_get_log_level(&mut return_level))? };
    LogLevel::from_raw(return_level).ok_or(Status::InternalFailure)
}

pub(crate) fn get_current_time_nanoseconds() -> Result<u64, Status> {
    let mut return_time: u64 = 0;
    unsafe { check(proxy_get_current_time_nanoseconds(&mut return_time))? };
    Ok(return_time)
}

pub(crate) fn set_tick_period_milliseconds(period: u32) -> Result<(), Status> {
    unsafe { check(proxy_set_tick_period_milliseconds(period)) }
}

pub(crate) fn get_buffer_bytes(
    buffer_type: BufferType,
    start: usize,
    max_size: usize,
) -> Result<Option<Bytes>, Status> {
    let mut return_data: *mut u8 = null_mut();
    let mut return_size: usize = 0;
    unsafe {
        check(proxy_get_buffer_bytes(
            buffer_type as u32,
            start,
            max_size,
            &mut return_data,
            &mut return_size,
        ))?;
        Ok(take_buffer(return_data, return_size))
    }
}

pub(crate) fn set_buffer_bytes(
    buffer_type: BufferType,
    start: usize,
    size: usize,
    value: &[u8],
) -> Result<(), Status> {
    unsafe {
        check(proxy_set_buffer_bytes(
            buffer_type as u32,
            start,
            size,
            value.as_ptr(),
            value.len(),
        ))
    }
}

pub(crate) fn get_header_map_pairs(map_type: MapType) -> Result<Option<Bytes>, Status> {
    let mut return_data: *mut u8 = null_mut();
    let mut return_size: usize = 0;
    unsafe {
        check(proxy_get_header_map_pairs(
            map_type as u32,
            &mut return_data,
            &mut return_size,
        ))?;
        Ok(take_buffer(return_data, return_size))
    }
}

pub(crate) fn set_header_map_pairs(map_type: MapType, map: &[u8]) -> Result<(), Status> {
    unsafe { check(proxy_set_header_map_pairs(map_type as u32, map.as_ptr(), map.len())) }
}

pub(crate) fn get_header_map_value(map_type: MapType, key: &str) -> Result<Option<Bytes>, Status> {
    let mut return_data: *mut u8 = null_mut();
    let mut return_size: usize = 0;
    unsafe {
        check(proxy_get_header_map_value(
            map_type as u32,
            key.as_ptr(),
            key.len(),
            &mut return_data,
            &mut return_size,
        ))?;
        Ok(take_buffer(return_data, return_size))
    }
}

pub(crate) fn replace_header_map_value(
    map_type: MapType,
    key: &str,
    value: &str,
) -> Result<(), Status> {
    unsafe {
        check(proxy_replace_header_map_value(
            map_type as u32,
            key.as_ptr(),
            key.len(),
            value.as_ptr(),
            value.len(),
        ))
    }
}

pub(crate) fn remove_header_map_value(map_type: MapType, key: &str) -> Result<(), Status> {
    unsafe { check(proxy_remove_header_map_value(map_type as u32, key.as_ptr(), key.len())) }
}

pub(crate) fn add_header_map_value(map_type: MapType, key: &str, value: &str) -> Result<(), Status> {
    unsafe {
        check(proxy_add_header_map_value(
            map_type as u32,
            key.as_ptr(),
            key.len(),
            value.as_ptr(),
            value.len(),
        ))
    }
}

pub(crate) fn get_property(path: &[u8]) -> Result<Option<Bytes>, Status> {
    let mut return_data: *mut u8 = null_mut();
    let mut return_size: usize = 0;
    unsafe {
        check(proxy_get_property(
            path.as_ptr(),
            path.len(),
            &mut return_data,
            &mut return_size,
        ))?;
        Ok(take_buffer(return_data, return_size))
    }
}

pub(crate) fn set_property(path: &[u8], value: Option<&[u8]>) -> Result<(), Status> {
    let (value_data, value_size) = optional_parts(value);
    unsafe { check(proxy_set_property(path.as_ptr(), path.len(), value_data, value_size)) }
}

pub(crate) fn get_shared_data(key: &str) -> Result<(Option<Bytes>, u32), Status> {
    let mut return_data: *mut u8 = null_mut();
    let mut return_size: usize = 0;
    let mut return_cas: u32 = 0;
    unsafe {
        check(proxy_get_shared_data(
            key.as_ptr(),
            key.len(),
            &mut return_data,
            &mut return_size,
            &mut return_cas,
        ))?;
        Ok((take_buffer(return_data, return_size), return_cas))
    }
}

pub(crate) fn set_shared_data(key: &str, value: Option<&[u8]>, cas: u32) -> Result<(), Status> {
    let (value_data, value_size) = optional_parts(value);
    unsafe {
        check(proxy_set_shared_data(
            key.as_ptr(),
            key.len(),
            value_data,
            value_size,
            cas,
        ))
    }
}

pub(crate) fn register_shared_queue(name: &str) -> Result<u32, Status> {
    let mut return_id: u32 = 0;
    unsafe { check(proxy_register_shared_queue(name.as_ptr(), name.len(), &mut return_id))? };
    Ok(return_id)
}

pub(crate) fn resolve_shared_queue(vm_id: &str, name: &str) -> Result<u32, Status> {
    let mut return_id: u32 = 0;
    unsafe {
        check(proxy_resolve_shared_queue(
            vm_id.as_ptr(),
            vm_id.len(),
            name.as_ptr(),
            name.len(),
            &mut return_id,
        ))?
    };
    Ok(return_id)
}

pub(crate) fn dequeue_shared_queue(queue_id: u32) -> Result<Option<Bytes>, Status> {
    let mut return_data: *mut u8 = null_mut();
    let mut return_size: usize = 0;
    unsafe {
        check(proxy_dequeue_shared_queue(queue_id, &mut return_data, &mut return_size))?;
        Ok(take_buffer(return_data, return_size))
    }
}

pub(crate) fn enqueue_shared_queue(queue_id: u32, value: Option<&[u8]>) -> Result<(), Status> {
    let (value_data, value_size) = optional_parts(value);
    unsafe { check(proxy_enqueue_shared_queue(queue_id, value_data, value_size)) }
}

pub(crate) fn continue_stream(stream_type: StreamType) -> Result<(), Status> {
    unsafe { check(proxy_continue_stream(stream_type as u32)) }
}

pub(crate) fn close_stream(stream_type: StreamType) -> Result<(), Status> {
    unsafe { check(proxy_close_stream(stream_type as u32)) }
}

pub(crate) fn send_local_response(
    status_code: u32,
    details: Option<&str>,
    body: Option<&[u8]>,
    headers: &[u8],
    grpc_status: i32,
) -> Result<(), Status> {
    let (details_data, details_size) = optional_parts(details.map(str::as_bytes));
    let (body_data, body_size) = optional_parts(body);
    unsafe {
        check(proxy_send_local_response(
            status_code,
            details_data,
            details_size,
            body_data,
            body_size,
            headers.as_ptr(),
            headers.len(),
            grpc_status,
        ))
    }
}

pub(crate) fn clear_route_cache() -> Result<(), Status> {
    unsafe { check(proxy_clear_route_cache()) }
}

pub(crate) fn http_call(
    upstream: &str,
    headers: &[u8],
    body: Option<&[u8]>,
    trailers: &[u8],
    timeout_ms: u32,
) -> Result<u32, Status> {
    let (body_data, body_size) = optional_parts(body);
    let mut return_token: u32 = 0;
    unsafe {
        check(proxy_http_call(
            upstream.as_ptr(),
            upstream.len(),
            headers.as_ptr(),
            headers.len(),
            body_data,
            body_size,
            trailers.as_ptr(),
            trailers.len(),
            timeout_ms,
            &mut return_token,
        ))?
    };
    Ok(return_token)
}

pub(crate) fn set_effective_context(context_id: u32) -> Result<(), Status> {
    unsafe { check(proxy_set_effective_context(context_id)) }
}

pub(crate) fn done() -> Result<(), Status> {
    unsafe { check(proxy_done()) }
}
