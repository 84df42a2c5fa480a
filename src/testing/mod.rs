//! In-Memory Host Double
//!
//! [`FakeHost`] implements [`Host`] over plain collections so an extension
//! can be driven natively, without a proxy:
//!
//! ```ignore
//! let host = FakeHost::new();
//! host.install();
//! veil_wasm_sdk::set_root_context(|_| Box::new(MyRoot));
//! host.start_vm(1, b"");
//! host.create_context(2, 1);
//! assert_eq!(host.request_headers(2, &[(":path", "/")], false), Action::Continue);
//! ```
//!
//! The state is reference counted: clones share it, so a test keeps one
//! handle for inspection after installing another.
//!
//! Besides storage the host models flow control. Data delivered to the
//! guest accumulates in the stream's buffer. A callback returning
//! `Continue` forwards the buffer; `Pause` holds it, and later callbacks
//! see the growing buffer until one returns `Continue` or the guest
//! resumes the stream (`proxy_continue_stream`). Resuming a stream that is
//! not held does nothing.

mod capabilities;
mod shared;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

pub use capabilities::HostCapabilities;
pub use shared::{MAX_MESSAGE_SIZE, MAX_QUEUE_SIZE};

use shared::{SharedDataStore, SharedQueueRegistry};

use crate::abi::{self, Host};
use crate::codec;
use crate::constants::*;
use crate::dispatcher;
use crate::types::*;

/// Default clock: 2023-11-14T22:13:20Z
const DEFAULT_TIME_NANOS: u64 = 1_700_000_000_000_000_000;

/// HTTP call recorded by `proxy_http_call`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingHttpCall {
    pub token: u32,
    /// Context current when the call was dispatched
    pub context_id: u32,
    pub upstream: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub trailers: Vec<(String, String)>,
    pub timeout_ms: u32,
}

/// Response sent by `proxy_send_local_response`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalResponse {
    pub context_id: u32,
    pub status_code: u32,
    pub details: Option<String>,
    pub body: Option<Bytes>,
    pub headers: Vec<(String, String)>,
    pub grpc_status: i32,
}

#[derive(Debug)]
struct HostState {
    vm_id: String,
    capabilities: HostCapabilities,
    /// Context the host is currently calling into
    current_context: u32,
    log_level: LogLevel,
    logs: Vec<(LogLevel, String)>,
    now_nanos: u64,
    tick_period_ms: u32,
    maps: HashMap<(u32, MapType), Vec<(String, String)>>,
    buffers: HashMap<(u32, BufferType), Bytes>,
    /// Bytes released downstream of the guest
    forwarded: HashMap<(u32, BufferType), Bytes>,
    properties: HashMap<Bytes, Bytes>,
    shared_data: SharedDataStore,
    queues: SharedQueueRegistry,
    /// (owner root, queue id) awaiting `proxy_on_queue_ready`
    queue_notifications: Vec<(u32, u32)>,
    http_calls: HashMap<u32, PendingHttpCall>,
    next_http_call_token: u32,
    local_responses: Vec<LocalResponse>,
    route_cache_clears: usize,
    paused: HashSet<(u32, StreamType)>,
    resumed: Vec<(u32, StreamType)>,
    closed: Vec<(u32, StreamType)>,
    done_calls: Vec<u32>,
    /// Scripted failures, consumed by the next call of that function
    failures: HashMap<&'static str, Status>,
}

impl HostState {
    fn new() -> Self {
        Self {
            vm_id: String::new(),
            capabilities: HostCapabilities::permissive(),
            current_context: 0,
            log_level: LogLevel::Info,
            logs: Vec::new(),
            now_nanos: DEFAULT_TIME_NANOS,
            tick_period_ms: 0,
            maps: HashMap::new(),
            buffers: HashMap::new(),
            forwarded: HashMap::new(),
            properties: HashMap::new(),
            shared_data: SharedDataStore::new(),
            queues: SharedQueueRegistry::new(),
            queue_notifications: Vec::new(),
            http_calls: HashMap::new(),
            next_http_call_token: 1,
            local_responses: Vec::new(),
            route_cache_clears: 0,
            paused: HashSet::new(),
            resumed: Vec::new(),
            closed: Vec::new(),
            done_calls: Vec::new(),
            failures: HashMap::new(),
        }
    }

    fn check(&mut self, function: &'static str) -> Result<(), Status> {
        match self.failures.remove(function) {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn map_mut(&mut self, map_type: MapType) -> &mut Vec<(String, String)> {
        self.maps
            .entry((self.current_context, map_type))
            .or_default()
    }

    /// Release a stream's buffered bytes downstream of the guest
    fn forward(&mut self, context_id: u32, buffer_type: BufferType) {
        let data = self
            .buffers
            .remove(&(context_id, buffer_type))
            .unwrap_or_default();
        self.forwarded
            .entry((context_id, buffer_type))
            .or_default()
            .extend_from_slice(&data);
    }

    fn allocate_http_call_token(&mut self) -> u32 {
        let token = self.next_http_call_token;
        self.next_http_call_token = self.next_http_call_token.wrapping_add(1).max(1);
        token
    }
}

fn is_mutable(buffer_type: BufferType) -> bool {
    matches!(
        buffer_type,
        BufferType::HttpRequestBody
            | BufferType::HttpResponseBody
            | BufferType::DownstreamData
            | BufferType::UpstreamData
    )
}

fn stream_buffer(stream_type: StreamType) -> BufferType {
    match stream_type {
        StreamType::HttpRequest => BufferType::HttpRequestBody,
        StreamType::HttpResponse => BufferType::HttpResponseBody,
        StreamType::Downstream => BufferType::DownstreamData,
        StreamType::Upstream => BufferType::UpstreamData,
    }
}

fn to_owned_map(map: &[(&str, &str)]) -> Vec<(String, String)> {
    map.iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

fn decode_map(bytes: &[u8]) -> Result<Vec<(String, String)>, Status> {
    codec::deserialize_map(bytes).map_err(|_| Status::BadArgument)
}

/// In-memory [`Host`] with a driver for the exported entry points
#[derive(Debug, Clone)]
pub struct FakeHost {
    state: Rc<RefCell<HostState>>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(HostState::new())),
        }
    }

    /// Host granting only `capabilities`
    pub fn with_capabilities(capabilities: HostCapabilities) -> Self {
        let host = Self::new();
        host.state.borrow_mut().capabilities = capabilities;
        host
    }

    /// Install a handle to this host for the current thread
    pub fn install(&self) {
        abi::install_host(Box::new(self.clone()));
    }

    /// Make `context_id` the context host calls act on
    pub fn enter(&self, context_id: u32) {
        self.state.borrow_mut().current_context = context_id;
    }

    pub fn current_context(&self) -> u32 {
        self.state.borrow().current_context
    }

    /// Fail the next call of `function` (a `PROXY_*` name) with `status`
    pub fn fail_next(&self, function: &'static str, status: Status) {
        self.state.borrow_mut().failures.insert(function, status);
    }

    // ============================================================
    // Configuration
    // ============================================================

    pub fn set_vm_id(&self, vm_id: &str) {
        self.state.borrow_mut().vm_id = vm_id.to_string();
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.state.borrow_mut().log_level = level;
    }

    pub fn set_time_nanos(&self, nanos: u64) {
        self.state.borrow_mut().now_nanos = nanos;
    }

    pub fn set_map(&self, context_id: u32, map_type: MapType, map: &[(&str, &str)]) {
        self.state
            .borrow_mut()
            .maps
            .insert((context_id, map_type), to_owned_map(map));
    }

    pub fn set_buffer(&self, context_id: u32, buffer_type: BufferType, data: &[u8]) {
        self.state
            .borrow_mut()
            .buffers
            .insert((context_id, buffer_type), data.to_vec());
    }

    pub fn set_property(&self, path: &[&str], value: &[u8]) {
        self.state
            .borrow_mut()
            .properties
            .insert(codec::serialize_property_path(path), value.to_vec());
    }

    // ============================================================
    // Inspection
    // ============================================================

    pub fn logs(&self) -> Vec<(LogLevel, String)> {
        self.state.borrow().logs.clone()
    }

    pub fn tick_period_ms(&self) -> u32 {
        self.state.borrow().tick_period_ms
    }

    pub fn map(&self, context_id: u32, map_type: MapType) -> Vec<(String, String)> {
        self.state
            .borrow()
            .maps
            .get(&(context_id, map_type))
            .cloned()
            .unwrap_or_default()
    }

    /// Bytes held for the guest in `buffer_type`
    pub fn buffer(&self, context_id: u32, buffer_type: BufferType) -> Bytes {
        self.state
            .borrow()
            .buffers
            .get(&(context_id, buffer_type))
            .cloned()
            .unwrap_or_default()
    }

    /// Bytes the host has passed on after the guest released them
    pub fn forwarded(&self, context_id: u32, buffer_type: BufferType) -> Bytes {
        self.state
            .borrow()
            .forwarded
            .get(&(context_id, buffer_type))
            .cloned()
            .unwrap_or_default()
    }

    pub fn property(&self, path: &[&str]) -> Option<Bytes> {
        self.state
            .borrow()
            .properties
            .get(&codec::serialize_property_path(path))
            .cloned()
    }

    /// Value and CAS version of a shared data key
    pub fn shared_data(&self, key: &str) -> Option<(Bytes, u32)> {
        self.state.borrow().shared_data.get(key)
    }

    pub fn queue_len(&self, queue_id: u32) -> usize {
        self.state.borrow().queues.len(queue_id)
    }

    /// Outstanding HTTP calls, ordered by token
    pub fn http_calls(&self) -> Vec<PendingHttpCall> {
        let mut calls: Vec<PendingHttpCall> =
            self.state.borrow().http_calls.values().cloned().collect();
        calls.sort_by_key(|call| call.token);
        calls
    }

    pub fn local_responses(&self) -> Vec<LocalResponse> {
        self.state.borrow().local_responses.clone()
    }

    pub fn route_cache_clears(&self) -> usize {
        self.state.borrow().route_cache_clears
    }

    pub fn is_paused(&self, context_id: u32, stream_type: StreamType) -> bool {
        self.state
            .borrow()
            .paused
            .contains(&(context_id, stream_type))
    }

    /// Streams released by `proxy_continue_stream`, in order
    pub fn resumed(&self) -> Vec<(u32, StreamType)> {
        self.state.borrow().resumed.clone()
    }

    pub fn closed(&self) -> Vec<(u32, StreamType)> {
        self.state.borrow().closed.clone()
    }

    /// Contexts that reported `proxy_done`
    pub fn done_calls(&self) -> Vec<u32> {
        self.state.borrow().done_calls.clone()
    }

    // ============================================================
    // Driving the guest
    // ============================================================

    /// Create the root context and deliver `on_vm_start`
    pub fn start_vm(&self, root_context_id: u32, vm_configuration: &[u8]) -> bool {
        self.create_context(root_context_id, 0);
        self.set_buffer(
            root_context_id,
            BufferType::VmConfiguration,
            vm_configuration,
        );
        self.enter(root_context_id);
        dispatcher::proxy_on_vm_start(root_context_id, vm_configuration.len())
    }

    pub fn configure(&self, root_context_id: u32, plugin_configuration: &[u8]) -> bool {
        self.set_buffer(
            root_context_id,
            BufferType::PluginConfiguration,
            plugin_configuration,
        );
        self.enter(root_context_id);
        dispatcher::proxy_on_configure(root_context_id, plugin_configuration.len())
    }

    pub fn create_context(&self, context_id: u32, root_context_id: u32) {
        self.enter(context_id);
        dispatcher::proxy_on_context_create(context_id, root_context_id);
    }

    pub fn tick(&self, root_context_id: u32) {
        self.enter(root_context_id);
        dispatcher::proxy_on_tick(root_context_id);
    }

    /// Deliver `on_queue_ready` for every enqueue since the last call
    pub fn deliver_queue_ready(&self) -> usize {
        let notifications = std::mem::take(&mut self.state.borrow_mut().queue_notifications);
        for &(root_context_id, queue_id) in &notifications {
            self.enter(root_context_id);
            dispatcher::proxy_on_queue_ready(root_context_id, queue_id);
        }
        notifications.len()
    }

    pub fn new_connection(&self, context_id: u32) -> Action {
        self.enter(context_id);
        dispatcher::proxy_on_new_connection(context_id)
    }

    pub fn downstream_data(&self, context_id: u32, data: &[u8], end_of_stream: bool) -> Action {
        self.deliver_data(context_id, StreamType::Downstream, data, |size| {
            dispatcher::proxy_on_downstream_data(context_id, size, end_of_stream as u32)
        })
    }

    pub fn upstream_data(&self, context_id: u32, data: &[u8], end_of_stream: bool) -> Action {
        self.deliver_data(context_id, StreamType::Upstream, data, |size| {
            dispatcher::proxy_on_upstream_data(context_id, size, end_of_stream as u32)
        })
    }

    pub fn downstream_close(&self, context_id: u32, peer_type: PeerType) {
        self.enter(context_id);
        dispatcher::proxy_on_downstream_connection_close(context_id, peer_type as u32);
    }

    pub fn upstream_close(&self, context_id: u32, peer_type: PeerType) {
        self.enter(context_id);
        dispatcher::proxy_on_upstream_connection_close(context_id, peer_type as u32);
    }

    pub fn request_headers(
        &self,
        context_id: u32,
        headers: &[(&str, &str)],
        end_of_stream: bool,
    ) -> Action {
        self.deliver_map(
            context_id,
            StreamType::HttpRequest,
            MapType::HttpRequestHeaders,
            headers,
            |len| dispatcher::proxy_on_request_headers(context_id, len, end_of_stream as u32),
        )
    }

    pub fn request_body(&self, context_id: u32, body: &[u8], end_of_stream: bool) -> Action {
        self.deliver_data(context_id, StreamType::HttpRequest, body, |size| {
            dispatcher::proxy_on_request_body(context_id, size, end_of_stream as u32)
        })
    }

    pub fn request_trailers(&self, context_id: u32, trailers: &[(&str, &str)]) -> Action {
        self.deliver_map(
            context_id,
            StreamType::HttpRequest,
            MapType::HttpRequestTrailers,
            trailers,
            |len| dispatcher::proxy_on_request_trailers(context_id, len),
        )
    }

    pub fn response_headers(
        &self,
        context_id: u32,
        headers: &[(&str, &str)],
        end_of_stream: bool,
    ) -> Action {
        self.deliver_map(
            context_id,
            StreamType::HttpResponse,
            MapType::HttpResponseHeaders,
            headers,
            |len| dispatcher::proxy_on_response_headers(context_id, len, end_of_stream as u32),
        )
    }

    pub fn response_body(&self, context_id: u32, body: &[u8], end_of_stream: bool) -> Action {
        self.deliver_data(context_id, StreamType::HttpResponse, body, |size| {
            dispatcher::proxy_on_response_body(context_id, size, end_of_stream as u32)
        })
    }

    pub fn response_trailers(&self, context_id: u32, trailers: &[(&str, &str)]) -> Action {
        self.deliver_map(
            context_id,
            StreamType::HttpResponse,
            MapType::HttpResponseTrailers,
            trailers,
            |len| dispatcher::proxy_on_response_trailers(context_id, len),
        )
    }

    /// Complete a dispatched call; returns `false` for an unknown token
    pub fn http_call_response(
        &self,
        token: u32,
        headers: &[(&str, &str)],
        body: &[u8],
        trailers: &[(&str, &str)],
    ) -> bool {
        let call = self.state.borrow_mut().http_calls.remove(&token);
        let Some(call) = call else {
            return false;
        };
        self.deliver_http_call_response(call.context_id, token, headers, body, trailers);
        true
    }

    /// Deliver a call response to `context_id` without consulting the
    /// recorded calls
    pub fn deliver_http_call_response(
        &self,
        context_id: u32,
        token: u32,
        headers: &[(&str, &str)],
        body: &[u8],
        trailers: &[(&str, &str)],
    ) {
        self.set_map(context_id, MapType::HttpCallResponseHeaders, headers);
        self.set_map(context_id, MapType::HttpCallResponseTrailers, trailers);
        self.set_buffer(context_id, BufferType::HttpCallResponseBody, body);
        self.enter(context_id);
        dispatcher::proxy_on_http_call_response(
            context_id,
            token,
            headers.len(),
            body.len(),
            trailers.len(),
        );
    }

    pub fn log(&self, context_id: u32) {
        self.enter(context_id);
        dispatcher::proxy_on_log(context_id);
    }

    pub fn done(&self, context_id: u32) -> bool {
        self.enter(context_id);
        dispatcher::proxy_on_done(context_id)
    }

    pub fn delete(&self, context_id: u32) {
        self.enter(context_id);
        dispatcher::proxy_on_delete(context_id);
        let mut state = self.state.borrow_mut();
        state.paused.retain(|(id, _)| *id != context_id);
        state.maps.retain(|(id, _), _| *id != context_id);
        state.buffers.retain(|(id, _), _| *id != context_id);
        state.http_calls.retain(|_, call| call.context_id != context_id);
    }

    fn deliver_data(
        &self,
        context_id: u32,
        stream_type: StreamType,
        data: &[u8],
        callback: impl FnOnce(usize) -> Action,
    ) -> Action {
        let buffer_type = stream_buffer(stream_type);
        let size = {
            let mut state = self.state.borrow_mut();
            state.current_context = context_id;
            let buffer = state.buffers.entry((context_id, buffer_type)).or_default();
            buffer.extend_from_slice(data);
            buffer.len()
        };

        let action = callback(size);
        self.settle(context_id, stream_type, action);
        action
    }

    fn deliver_map(
        &self,
        context_id: u32,
        stream_type: StreamType,
        map_type: MapType,
        map: &[(&str, &str)],
        callback: impl FnOnce(usize) -> Action,
    ) -> Action {
        {
            let mut state = self.state.borrow_mut();
            state.current_context = context_id;
            state
                .maps
                .insert((context_id, map_type), to_owned_map(map));
        }

        let action = callback(map.len());
        self.settle(context_id, stream_type, action);
        action
    }

    fn settle(&self, context_id: u32, stream_type: StreamType, action: Action) {
        let mut state = self.state.borrow_mut();
        match action {
            Action::Continue => {
                state.paused.remove(&(context_id, stream_type));
                state.forward(context_id, stream_buffer(stream_type));
            }
            Action::Pause => {
                state.paused.insert((context_id, stream_type));
            }
        }
    }
}

impl Host for FakeHost {
    fn log(&mut self, level: LogLevel, message: &str) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_LOG)?;
        state.logs.push((level, message.to_string()));
        Ok(())
    }

    fn get_log_level(&mut self) -> Result<LogLevel, Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_GET_LOG_LEVEL)?;
        Ok(state.log_level)
    }

    fn get_current_time_nanoseconds(&mut self) -> Result<u64, Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_GET_CURRENT_TIME_NANOSECONDS)?;
        Ok(state.now_nanos)
    }

    fn set_tick_period_milliseconds(&mut self, period: u32) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_SET_TICK_PERIOD_MILLISECONDS)?;
        state.tick_period_ms = period;
        Ok(())
    }

    fn get_buffer_bytes(
        &mut self,
        buffer_type: BufferType,
        start: usize,
        max_size: usize,
    ) -> Result<Option<Bytes>, Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_GET_BUFFER_BYTES)?;
        let key = (state.current_context, buffer_type);
        let buffer = state.buffers.get(&key).ok_or(Status::NotFound)?;
        if start > buffer.len() {
            return Err(Status::BadArgument);
        }
        let end = start.saturating_add(max_size).min(buffer.len());
        if start == end {
            return Err(Status::Empty);
        }
        Ok(Some(buffer[start..end].to_vec()))
    }

    fn set_buffer_bytes(
        &mut self,
        buffer_type: BufferType,
        start: usize,
        size: usize,
        value: &[u8],
    ) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_SET_BUFFER_BYTES)?;
        if !is_mutable(buffer_type) {
            return Err(Status::BadArgument);
        }
        let key = (state.current_context, buffer_type);
        let buffer = state.buffers.entry(key).or_default();
        if start > buffer.len() {
            return Err(Status::BadArgument);
        }
        let end = start.saturating_add(size).min(buffer.len());
        buffer.splice(start..end, value.iter().copied());
        Ok(())
    }

    fn get_header_map_pairs(&mut self, map_type: MapType) -> Result<Option<Bytes>, Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_GET_HEADER_MAP_PAIRS)?;
        let map = state
            .maps
            .get(&(state.current_context, map_type))
            .cloned()
            .unwrap_or_default();
        let pairs: Vec<(&str, &str)> = map
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        Ok(Some(codec::serialize_map(&pairs)))
    }

    fn set_header_map_pairs(&mut self, map_type: MapType, map: &[u8]) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_SET_HEADER_MAP_PAIRS)?;
        let map = decode_map(map)?;
        *state.map_mut(map_type) = map;
        Ok(())
    }

    fn get_header_map_value(
        &mut self,
        map_type: MapType,
        key: &str,
    ) -> Result<Option<Bytes>, Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_GET_HEADER_MAP_VALUE)?;
        state
            .maps
            .get(&(state.current_context, map_type))
            .and_then(|map| map.iter().find(|(name, _)| name.eq_ignore_ascii_case(key)))
            .map(|(_, value)| Some(value.clone().into_bytes()))
            .ok_or(Status::NotFound)
    }

    fn replace_header_map_value(
        &mut self,
        map_type: MapType,
        key: &str,
        value: &str,
    ) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_REPLACE_HEADER_MAP_VALUE)?;
        let map = state.map_mut(map_type);
        match map.iter().position(|(name, _)| name.eq_ignore_ascii_case(key)) {
            Some(first) => {
                map[first].1 = value.to_string();
                let mut index = 0;
                map.retain(|(name, _)| {
                    let keep = index <= first || !name.eq_ignore_ascii_case(key);
                    index += 1;
                    keep
                });
            }
            None => map.push((key.to_string(), value.to_string())),
        }
        Ok(())
    }

    fn remove_header_map_value(&mut self, map_type: MapType, key: &str) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_REMOVE_HEADER_MAP_VALUE)?;
        state
            .map_mut(map_type)
            .retain(|(name, _)| !name.eq_ignore_ascii_case(key));
        Ok(())
    }

    fn add_header_map_value(
        &mut self,
        map_type: MapType,
        key: &str,
        value: &str,
    ) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_ADD_HEADER_MAP_VALUE)?;
        state
            .map_mut(map_type)
            .push((key.to_string(), value.to_string()));
        Ok(())
    }

    fn get_property(&mut self, path: &[u8]) -> Result<Option<Bytes>, Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_GET_PROPERTY)?;
        state
            .properties
            .get(path)
            .map(|value| Some(value.clone()))
            .ok_or(Status::NotFound)
    }

    fn set_property(&mut self, path: &[u8], value: Option<Bytes>) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_SET_PROPERTY)?;
        match value {
            Some(value) => {
                state.properties.insert(path.to_vec(), value);
            }
            None => {
                state.properties.remove(path);
            }
        }
        Ok(())
    }

    fn get_shared_data(&mut self, key: &str) -> Result<(Option<Bytes>, u32), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_GET_SHARED_DATA)?;
        if !state.capabilities.allow_shared_data {
            return Err(Status::NotAllowed);
        }
        let (value, cas) = state.shared_data.get(key).ok_or(Status::NotFound)?;
        Ok((Some(value), cas))
    }

    fn set_shared_data(&mut self, key: &str, value: Option<Bytes>, cas: u32) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_SET_SHARED_DATA)?;
        if !state.capabilities.allow_shared_data {
            return Err(Status::NotAllowed);
        }
        state.shared_data.set(key, value, cas)
    }

    fn register_shared_queue(&mut self, name: &str) -> Result<u32, Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_REGISTER_SHARED_QUEUE)?;
        let vm_id = state.vm_id.clone();
        let owner = state.current_context;
        Ok(state.queues.register(&vm_id, name, owner))
    }

    fn resolve_shared_queue(&mut self, vm_id: &str, name: &str) -> Result<u32, Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_RESOLVE_SHARED_QUEUE)?;
        state.queues.resolve(vm_id, name).ok_or(Status::NotFound)
    }

    fn dequeue_shared_queue(&mut self, queue_id: u32) -> Result<Option<Bytes>, Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_DEQUEUE_SHARED_QUEUE)?;
        state.queues.dequeue(queue_id).map(Some)
    }

    fn enqueue_shared_queue(&mut self, queue_id: u32, value: Option<Bytes>) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_ENQUEUE_SHARED_QUEUE)?;
        let owner = state
            .queues
            .enqueue(queue_id, value.unwrap_or_default())?;
        state.queue_notifications.push((owner, queue_id));
        Ok(())
    }

    fn continue_stream(&mut self, stream_type: StreamType) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_CONTINUE_STREAM)?;
        let key = (state.current_context, stream_type);
        if state.paused.remove(&key) {
            state.resumed.push(key);
            state.forward(key.0, stream_buffer(stream_type));
        }
        Ok(())
    }

    fn close_stream(&mut self, stream_type: StreamType) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_CLOSE_STREAM)?;
        let key = (state.current_context, stream_type);
        state.paused.remove(&key);
        state.closed.push(key);
        Ok(())
    }

    fn send_local_response(
        &mut self,
        status_code: u32,
        details: Option<String>,
        body: Option<Bytes>,
        headers: &[u8],
        grpc_status: i32,
    ) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_SEND_LOCAL_RESPONSE)?;
        if !state.capabilities.allow_send_local_response {
            return Err(Status::NotAllowed);
        }
        let headers = decode_map(headers)?;
        let context_id = state.current_context;
        state.local_responses.push(LocalResponse {
            context_id,
            status_code,
            details,
            body,
            headers,
            grpc_status,
        });
        // The local response replaces the exchange's pipeline outcome
        state.paused.remove(&(context_id, StreamType::HttpRequest));
        state.paused.remove(&(context_id, StreamType::HttpResponse));
        Ok(())
    }

    fn clear_route_cache(&mut self) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_CLEAR_ROUTE_CACHE)?;
        state.route_cache_clears += 1;
        Ok(())
    }

    fn http_call(
        &mut self,
        upstream: &str,
        headers: &[u8],
        body: Option<Bytes>,
        trailers: &[u8],
        timeout_ms: u32,
    ) -> Result<u32, Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_HTTP_CALL)?;

        if !state.capabilities.allow_http_calls {
            return Err(Status::NotAllowed);
        }

        let headers = decode_map(headers)?;
        let trailers = decode_map(trailers)?;
        let token = state.allocate_http_call_token();
        let context_id = state.current_context;
        state.http_calls.insert(
            token,
            PendingHttpCall {
                token,
                context_id,
                upstream: upstream.to_string(),
                headers,
                body,
                trailers,
                timeout_ms,
            },
        );
        Ok(token)
    }

    fn set_effective_context(&mut self, context_id: u32) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_SET_EFFECTIVE_CONTEXT)?;
        state.current_context = context_id;
        Ok(())
    }

    fn done(&mut self) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.check(PROXY_DONE)?;
        let context_id = state.current_context;
        state.done_calls.push(context_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hostcalls;

    #[test]
    fn test_buffer_slicing() {
        let host = FakeHost::new();
        host.install();
        host.enter(5);
        host.set_buffer(5, BufferType::HttpRequestBody, b"hello world");

        let mut handle = host.clone();
        assert_eq!(
            handle.get_buffer_bytes(BufferType::HttpRequestBody, 6, 100),
            Ok(Some(b"world".to_vec()))
        );
        assert_eq!(
            handle.get_buffer_bytes(BufferType::HttpRequestBody, 11, 4),
            Err(Status::Empty)
        );
        assert_eq!(
            handle.get_buffer_bytes(BufferType::HttpResponseBody, 0, 4),
            Err(Status::NotFound)
        );
    }

    #[test]
    fn test_set_buffer_splices() {
        let host = FakeHost::new();
        host.install();
        host.enter(5);
        host.set_buffer(5, BufferType::DownstreamData, b"hello world");

        hostcalls::set_buffer(BufferType::DownstreamData, 0, 5, b"HOWDY!").unwrap();
        assert_eq!(host.buffer(5, BufferType::DownstreamData), b"HOWDY! world");

        let err = hostcalls::set_buffer(BufferType::VmConfiguration, 0, 0, b"x").unwrap_err();
        assert_eq!(err.status(), Some(Status::BadArgument));
    }

    #[test]
    fn test_replace_collapses_duplicates() {
        let host = FakeHost::new();
        host.install();
        host.enter(3);
        host.set_map(
            3,
            MapType::HttpRequestHeaders,
            &[("a", "1"), ("x-id", "1"), ("b", "2"), ("X-Id", "2")],
        );

        hostcalls::set_map_value(MapType::HttpRequestHeaders, "x-id", Some("3")).unwrap();
        assert_eq!(
            host.map(3, MapType::HttpRequestHeaders),
            vec![
                ("a".to_string(), "1".to_string()),
                ("x-id".to_string(), "3".to_string()),
                ("b".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_scripted_failure_is_consumed() {
        let host = FakeHost::new();
        host.install();
        host.fail_next(PROXY_CLEAR_ROUTE_CACHE, Status::BrokenConnection);

        let err = hostcalls::clear_http_route_cache().unwrap_err();
        assert_eq!(err.status(), Some(Status::BrokenConnection));
        hostcalls::clear_http_route_cache().unwrap();
        assert_eq!(host.route_cache_clears(), 1);
    }

    #[test]
    fn test_http_call_capabilities() {
        let empty = codec::serialize_map(&[]);
        let mut allowed = FakeHost::new();
        assert_eq!(allowed.http_call("auth", &empty, None, &empty, 100), Ok(1));
        assert_eq!(allowed.http_call("billing", &empty, None, &empty, 100), Ok(2));

        let mut denied = FakeHost::with_capabilities(HostCapabilities::default());
        assert_eq!(
            denied.http_call("auth", &empty, None, &empty, 100),
            Err(Status::NotAllowed)
        );
    }

    #[test]
    fn test_resume_without_pause_is_noop() {
        let host = FakeHost::new();
        let mut handle = host.clone();
        host.enter(4);
        handle.continue_stream(StreamType::HttpRequest).unwrap();
        assert!(host.resumed().is_empty());
    }
}
