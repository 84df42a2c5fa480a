//! Proxy-Wasm ABI Constants
//!
//! Import module and host function names defined by Proxy-Wasm ABI v0.2.1.
//! These identify the failing function in [`crate::error::HostCallError`].

/// ABI version this crate is built against
pub const ABI_VERSION: &str = "0.2.1";

/// Import module all host functions live in
pub const ABI_MODULE: &str = "env";

// ============================================================
// Logging / time
// ============================================================

pub const PROXY_LOG: &str = "proxy_log";
pub const PROXY_GET_LOG_LEVEL: &str = "proxy_get_log_level";
pub const PROXY_GET_CURRENT_TIME_NANOSECONDS: &str = "proxy_get_current_time_nanoseconds";
pub const PROXY_SET_TICK_PERIOD_MILLISECONDS: &str = "proxy_set_tick_period_milliseconds";

// ============================================================
// Buffers / header maps
// ============================================================

pub const PROXY_GET_BUFFER_BYTES: &str = "proxy_get_buffer_bytes";
pub const PROXY_SET_BUFFER_BYTES: &str = "proxy_set_buffer_bytes";
pub const PROXY_GET_HEADER_MAP_PAIRS: &str = "proxy_get_header_map_pairs";
pub const PROXY_SET_HEADER_MAP_PAIRS: &str = "proxy_set_header_map_pairs";
pub const PROXY_GET_HEADER_MAP_VALUE: &str = "proxy_get_header_map_value";
pub const PROXY_REPLACE_HEADER_MAP_VALUE: &str = "proxy_replace_header_map_value";
pub const PROXY_REMOVE_HEADER_MAP_VALUE: &str = "proxy_remove_header_map_value";
pub const PROXY_ADD_HEADER_MAP_VALUE: &str = "proxy_add_header_map_value";

// ============================================================
// Properties / shared data / shared queues
// ============================================================

pub const PROXY_GET_PROPERTY: &str = "proxy_get_property";
pub const PROXY_SET_PROPERTY: &str = "proxy_set_property";
pub const PROXY_GET_SHARED_DATA: &str = "proxy_get_shared_data";
pub const PROXY_SET_SHARED_DATA: &str = "proxy_set_shared_data";
pub const PROXY_REGISTER_SHARED_QUEUE: &str = "proxy_register_shared_queue";
pub const PROXY_RESOLVE_SHARED_QUEUE: &str = "proxy_resolve_shared_queue";
pub const PROXY_DEQUEUE_SHARED_QUEUE: &str = "proxy_dequeue_shared_queue";
pub const PROXY_ENQUEUE_SHARED_QUEUE: &str = "proxy_enqueue_shared_queue";

// ============================================================
// Flow control / HTTP
// ============================================================

pub const PROXY_CONTINUE_STREAM: &str = "proxy_continue_stream";
pub const PROXY_CLOSE_STREAM: &str = "proxy_close_stream";
pub const PROXY_SEND_LOCAL_RESPONSE: &str = "proxy_send_local_response";
pub const PROXY_CLEAR_ROUTE_CACHE: &str = "proxy_clear_route_cache";
pub const PROXY_HTTP_CALL: &str = "proxy_http_call";

// ============================================================
// Context lifecycle
// ============================================================

pub const PROXY_SET_EFFECTIVE_CONTEXT: &str = "proxy_set_effective_context";
pub const PROXY_DONE: &str = "proxy_done";

/// `grpc_status` passed with a plain HTTP local response
pub const NO_GRPC_STATUS: i32 = -1;
