//! Guest Memory Allocation Export
//!
//! The host calls `proxy_on_memory_allocate` to obtain guest memory for
//! buffers it returns from host functions. Ownership passes back to the
//! guest when the host function returns (see `abi::imports::take_buffer`).

/// Allocate `size` bytes the host may fill
#[no_mangle]
pub extern "C" fn proxy_on_memory_allocate(size: usize) -> *mut u8 {
    let buffer = vec![0u8; size].into_boxed_slice();
    Box::into_raw(buffer) as *mut u8
}
