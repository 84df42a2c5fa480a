//! Context Hierarchy
//!
//! Traits an extension implements to receive host callbacks:
//!
//! - [`Context`]: capabilities available from any running context
//! - [`RootContext`]: one per VM, owns configuration, ticks and queues
//! - [`StreamContext`]: one per L4 connection
//! - [`HttpContext`]: one per HTTP request/response exchange
//!
//! Every callback has a default so an extension implements only what it uses.

use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;

use crate::config;
use crate::error::Result;
use crate::hostcalls;
use crate::types::*;

/// Child a root context spawns for a new stream or exchange
pub enum ChildContext {
    StreamContext(Box<dyn StreamContext>),
    HttpContext(Box<dyn HttpContext>),
}

impl ChildContext {
    pub fn kind(&self) -> ContextKind {
        match self {
            Self::StreamContext(_) => ContextKind::Stream,
            Self::HttpContext(_) => ContextKind::Http,
        }
    }
}

/// Capability set shared by every context
pub trait Context {
    fn get_current_time(&self) -> Result<SystemTime> {
        hostcalls::get_current_time()
    }

    fn get_property(&self, path: &[&str]) -> Result<Option<Bytes>> {
        hostcalls::get_property(path)
    }

    fn set_property(&self, path: &[&str], value: Option<&[u8]>) -> Result<()> {
        hostcalls::set_property(path, value)
    }

    fn get_shared_data(&self, key: &str) -> Result<(Option<Bytes>, Option<u32>)> {
        hostcalls::get_shared_data(key)
    }

    fn set_shared_data(&self, key: &str, value: Option<&[u8]>, cas: Option<u32>) -> Result<()> {
        hostcalls::set_shared_data(key, value, cas)
    }

    fn register_shared_queue(&self, name: &str) -> Result<u32> {
        hostcalls::register_shared_queue(name)
    }

    fn resolve_shared_queue(&self, vm_id: &str, name: &str) -> Result<Option<u32>> {
        hostcalls::resolve_shared_queue(vm_id, name)
    }

    fn dequeue_shared_queue(&self, queue_id: u32) -> Result<Option<Bytes>> {
        hostcalls::dequeue_shared_queue(queue_id)
    }

    fn enqueue_shared_queue(&self, queue_id: u32, value: Option<&[u8]>) -> Result<()> {
        hostcalls::enqueue_shared_queue(queue_id, value)
    }

    /// Returns the call token; the response arrives in [`Context::on_http_call_response`]
    fn dispatch_http_call(
        &self,
        upstream: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
        trailers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<u32> {
        hostcalls::dispatch_http_call(upstream, headers, body, trailers, timeout)
    }

    /// Invoked once per dispatched call, unless this context was torn down first
    fn on_http_call_response(
        &mut self,
        _token_id: u32,
        _num_headers: usize,
        _body_size: usize,
        _num_trailers: usize,
    ) {
    }

    fn get_http_call_response_headers(&self) -> Result<Vec<(String, String)>> {
        hostcalls::get_map(MapType::HttpCallResponseHeaders)
    }

    fn get_http_call_response_header(&self, name: &str) -> Result<Option<String>> {
        hostcalls::get_map_value(MapType::HttpCallResponseHeaders, name)
    }

    fn get_http_call_response_body(&self, start: usize, max_size: usize) -> Result<Option<Bytes>> {
        hostcalls::get_buffer(BufferType::HttpCallResponseBody, start, max_size)
    }

    fn get_http_call_response_trailers(&self) -> Result<Vec<(String, String)>> {
        hostcalls::get_map(MapType::HttpCallResponseTrailers)
    }

    /// Called before teardown; return `false` to finish later with [`Context::done`]
    fn on_done(&mut self) -> bool {
        true
    }

    fn done(&self) -> Result<()> {
        hostcalls::done()
    }
}

/// VM-wide context
pub trait RootContext: Context {
    /// Called once, before any child context is created
    fn on_vm_start(&mut self, _vm_configuration_size: usize) -> bool {
        true
    }

    fn get_vm_configuration(&self) -> Result<Option<Bytes>> {
        hostcalls::get_vm_configuration()
    }

    fn on_configure(&mut self, _plugin_configuration_size: usize) -> bool {
        true
    }

    /// Plugin configuration bytes, uninterpreted
    fn get_configuration(&self) -> Result<Option<Bytes>> {
        hostcalls::get_configuration()
    }

    /// Plugin configuration decoded with [`config::decode`]; `Ok(None)` when empty
    fn get_configuration_as<T: DeserializeOwned>(&self) -> anyhow::Result<Option<T>>
    where
        Self: Sized,
    {
        match self.get_configuration()? {
            Some(bytes) if !bytes.is_empty() => config::decode(&bytes).map(Some),
            _ => Ok(None),
        }
    }

    fn set_tick_period(&self, period: Duration) -> Result<()> {
        hostcalls::set_tick_period(period)
    }

    fn on_tick(&mut self) {}

    fn on_queue_ready(&mut self, _queue_id: u32) {}

    fn on_log(&mut self) {}

    /// Choose the child for a new stream or exchange
    ///
    /// `None` falls back to the registered factories and, without any, makes
    /// this root context field the child's callbacks itself.
    fn on_create_child_context(&mut self, _context_id: u32) -> Option<ChildContext> {
        None
    }

    /// Stream callbacks handled by the root in single-context mode
    fn as_stream_context(&mut self) -> Option<&mut dyn StreamContext> {
        None
    }

    /// HTTP callbacks handled by the root in single-context mode
    fn as_http_context(&mut self) -> Option<&mut dyn HttpContext> {
        None
    }
}

/// L4 connection context
///
/// `on_new_connection`, then data callbacks per direction, then close
/// callbacks and `on_log`. Data accessors are valid only inside the data
/// callback of the same direction.
pub trait StreamContext: Context {
    fn on_new_connection(&mut self) -> Action {
        Action::Continue
    }

    fn on_downstream_data(&mut self, _data_size: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn get_downstream_data(&self, start: usize, max_size: usize) -> Result<Option<Bytes>> {
        hostcalls::get_buffer(BufferType::DownstreamData, start, max_size)
    }

    fn set_downstream_data(&self, start: usize, size: usize, value: &[u8]) -> Result<()> {
        hostcalls::set_buffer(BufferType::DownstreamData, start, size, value)
    }

    fn resume_downstream(&self) -> Result<()> {
        hostcalls::resume_downstream()
    }

    fn close_downstream(&self) -> Result<()> {
        hostcalls::close_downstream()
    }

    fn on_downstream_close(&mut self, _peer_type: PeerType) {}

    fn on_upstream_data(&mut self, _data_size: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn get_upstream_data(&self, start: usize, max_size: usize) -> Result<Option<Bytes>> {
        hostcalls::get_buffer(BufferType::UpstreamData, start, max_size)
    }

    fn set_upstream_data(&self, start: usize, size: usize, value: &[u8]) -> Result<()> {
        hostcalls::set_buffer(BufferType::UpstreamData, start, size, value)
    }

    fn resume_upstream(&self) -> Result<()> {
        hostcalls::resume_upstream()
    }

    fn close_upstream(&self) -> Result<()> {
        hostcalls::close_upstream()
    }

    fn on_upstream_close(&mut self, _peer_type: PeerType) {}

    fn on_log(&mut self) {}
}

/// HTTP request/response exchange context
///
/// Request and response each run headers, zero or more body chunks and
/// optional trailers. Returning [`Action::Pause`] holds that phase until
/// [`HttpContext::resume_http_request`] / [`HttpContext::resume_http_response`]
/// or a later `Continue`. Maps should only be mutated during their own phase.
pub trait HttpContext: Context {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn get_http_request_headers(&self) -> Result<Vec<(String, String)>> {
        hostcalls::get_map(MapType::HttpRequestHeaders)
    }

    fn set_http_request_headers(&self, headers: &[(&str, &str)]) -> Result<()> {
        hostcalls::set_map(MapType::HttpRequestHeaders, headers)
    }

    fn get_http_request_header(&self, name: &str) -> Result<Option<String>> {
        hostcalls::get_map_value(MapType::HttpRequestHeaders, name)
    }

    fn set_http_request_header(&self, name: &str, value: Option<&str>) -> Result<()> {
        hostcalls::set_map_value(MapType::HttpRequestHeaders, name, value)
    }

    fn add_http_request_header(&self, name: &str, value: &str) -> Result<()> {
        hostcalls::add_map_value(MapType::HttpRequestHeaders, name, value)
    }

    fn on_http_request_body(&mut self, _body_size: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn get_http_request_body(&self, start: usize, max_size: usize) -> Result<Option<Bytes>> {
        hostcalls::get_buffer(BufferType::HttpRequestBody, start, max_size)
    }

    fn set_http_request_body(&self, start: usize, size: usize, value: &[u8]) -> Result<()> {
        hostcalls::set_buffer(BufferType::HttpRequestBody, start, size, value)
    }

    fn on_http_request_trailers(&mut self, _num_trailers: usize) -> Action {
        Action::Continue
    }

    fn get_http_request_trailers(&self) -> Result<Vec<(String, String)>> {
        hostcalls::get_map(MapType::HttpRequestTrailers)
    }

    fn set_http_request_trailers(&self, trailers: &[(&str, &str)]) -> Result<()> {
        hostcalls::set_map(MapType::HttpRequestTrailers, trailers)
    }

    fn get_http_request_trailer(&self, name: &str) -> Result<Option<String>> {
        hostcalls::get_map_value(MapType::HttpRequestTrailers, name)
    }

    fn set_http_request_trailer(&self, name: &str, value: Option<&str>) -> Result<()> {
        hostcalls::set_map_value(MapType::HttpRequestTrailers, name, value)
    }

    fn add_http_request_trailer(&self, name: &str, value: &str) -> Result<()> {
        hostcalls::add_map_value(MapType::HttpRequestTrailers, name, value)
    }

    fn resume_http_request(&self) -> Result<()> {
        hostcalls::resume_http_request()
    }

    fn on_http_response_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn get_http_response_headers(&self) -> Result<Vec<(String, String)>> {
        hostcalls::get_map(MapType::HttpResponseHeaders)
    }

    fn set_http_response_headers(&self, headers: &[(&str, &str)]) -> Result<()> {
        hostcalls::set_map(MapType::HttpResponseHeaders, headers)
    }

    fn get_http_response_header(&self, name: &str) -> Result<Option<String>> {
        hostcalls::get_map_value(MapType::HttpResponseHeaders, name)
    }

    fn set_http_response_header(&self, name: &str, value: Option<&str>) -> Result<()> {
        hostcalls::set_map_value(MapType::HttpResponseHeaders, name, value)
    }

    fn add_http_response_header(&self, name: &str, value: &str) -> Result<()> {
        hostcalls::add_map_value(MapType::HttpResponseHeaders, name, value)
    }

    fn on_http_response_body(&mut self, _body_size: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn get_http_response_body(&self, start: usize, max_size: usize) -> Result<Option<Bytes>> {
        hostcalls::get_buffer(BufferType::HttpResponseBody, start, max_size)
    }

    fn set_http_response_body(&self, start: usize, size: usize, value: &[u8]) -> Result<()> {
        hostcalls::set_buffer(BufferType::HttpResponseBody, start, size, value)
    }

    fn on_http_response_trailers(&mut self, _num_trailers: usize) -> Action {
        Action::Continue
    }

    fn get_http_response_trailers(&self) -> Result<Vec<(String, String)>> {
        hostcalls::get_map(MapType::HttpResponseTrailers)
    }

    fn set_http_response_trailers(&self, trailers: &[(&str, &str)]) -> Result<()> {
        hostcalls::set_map(MapType::HttpResponseTrailers, trailers)
    }

    fn get_http_response_trailer(&self, name: &str) -> Result<Option<String>> {
        hostcalls::get_map_value(MapType::HttpResponseTrailers, name)
    }

    fn set_http_response_trailer(&self, name: &str, value: Option<&str>) -> Result<()> {
        hostcalls::set_map_value(MapType::HttpResponseTrailers, name, value)
    }

    fn add_http_response_trailer(&self, name: &str, value: &str) -> Result<()> {
        hostcalls::add_map_value(MapType::HttpResponseTrailers, name, value)
    }

    fn resume_http_response(&self) -> Result<()> {
        hostcalls::resume_http_response()
    }

    fn send_http_response(
        &self,
        status_code: u32,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<()> {
        hostcalls::send_http_response(status_code, headers, body)
    }

    fn clear_http_route_cache(&self) -> Result<()> {
        hostcalls::clear_http_route_cache()
    }

    fn on_log(&mut self) {}
}
