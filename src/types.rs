//! Proxy-Wasm ABI Types
//!
//! Closed value sets shared across the guest/host boundary.
//! Discriminants follow Proxy-Wasm ABI v0.2.1.

use crate::traits::{HttpContext, RootContext, StreamContext};

/// Owned byte payload returned by the host
pub type Bytes = Vec<u8>;

/// Factory for the VM-wide root context
pub type NewRootContext = fn(context_id: u32) -> Box<dyn RootContext>;
/// Factory for network-stream contexts
pub type NewStreamContext = fn(context_id: u32, root_context_id: u32) -> Box<dyn StreamContext>;
/// Factory for HTTP-exchange contexts
pub type NewHttpContext = fn(context_id: u32, root_context_id: u32) -> Box<dyn HttpContext>;

/// Log level (proxy_log_level_t)
#[repr(u32)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Critical = 5,
}

impl LogLevel {
    /// Decode a raw log level passed by the host
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Trace),
            1 => Some(Self::Debug),
            2 => Some(Self::Info),
            3 => Some(Self::Warn),
            4 => Some(Self::Error),
            5 => Some(Self::Critical),
            _ => None,
        }
    }

    /// Equivalent `log` crate filter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Self::Trace => log::LevelFilter::Trace,
            Self::Debug => log::LevelFilter::Debug,
            Self::Info => log::LevelFilter::Info,
            Self::Warn => log::LevelFilter::Warn,
            Self::Error | Self::Critical => log::LevelFilter::Error,
        }
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => Self::Trace,
            log::Level::Debug => Self::Debug,
            log::Level::Info => Self::Info,
            log::Level::Warn => Self::Warn,
            log::Level::Error => Self::Error,
        }
    }
}

/// Filter-chain directive returned by pipeline callbacks (proxy_action_t)
#[repr(u32)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Action {
    /// Proceed with the pipeline
    Continue = 0,
    /// Hold processing until resumed
    Pause = 1,
}

/// Host function status (proxy_status_t)
#[repr(u32)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Status {
    Ok = 0,
    NotFound = 1,
    BadArgument = 2,
    SerializationFailure = 3,
    ParseFailure = 4,
    BadExpression = 5,
    InvalidMemoryAccess = 6,
    Empty = 7,
    CasMismatch = 8,
    ResultMismatch = 9,
    InternalFailure = 10,
    BrokenConnection = 11,
    Unimplemented = 12,
    /// Denied by the host's per-module capability settings
    NotAllowed = 13,
}

impl Status {
    /// Decode a raw status returned by the host
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Ok,
            1 => Self::NotFound,
            2 => Self::BadArgument,
            3 => Self::SerializationFailure,
            4 => Self::ParseFailure,
            5 => Self::BadExpression,
            6 => Self::InvalidMemoryAccess,
            7 => Self::Empty,
            8 => Self::CasMismatch,
            9 => Self::ResultMismatch,
            10 => Self::InternalFailure,
            11 => Self::BrokenConnection,
            12 => Self::Unimplemented,
            13 => Self::NotAllowed,
            _ => return None,
        })
    }
}

/// Host-managed byte region selector (proxy_buffer_type_t)
#[repr(u32)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum BufferType {
    HttpRequestBody = 0,
    HttpResponseBody = 1,
    DownstreamData = 2,
    UpstreamData = 3,
    HttpCallResponseBody = 4, // Immutable
    GrpcReceiveBuffer = 5,    // Immutable
    VmConfiguration = 6,      // Immutable
    PluginConfiguration = 7,  // Immutable
    CallData = 8,             // Immutable
}

impl BufferType {
    /// Callback scope in which this buffer is meaningful, if restricted
    pub fn scope(self) -> Option<ContextKind> {
        match self {
            Self::HttpRequestBody | Self::HttpResponseBody => Some(ContextKind::Http),
            Self::DownstreamData | Self::UpstreamData => Some(ContextKind::Stream),
            Self::VmConfiguration | Self::PluginConfiguration => Some(ContextKind::Root),
            Self::HttpCallResponseBody | Self::GrpcReceiveBuffer | Self::CallData => None,
        }
    }
}

/// Host-managed key/value collection selector (proxy_map_type_t)
#[repr(u32)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum MapType {
    HttpRequestHeaders = 0,
    HttpRequestTrailers = 1,
    HttpResponseHeaders = 2,
    HttpResponseTrailers = 3,
    GrpcReceiveInitialMetadata = 4,  // Immutable
    GrpcReceiveTrailingMetadata = 5, // Immutable
    HttpCallResponseHeaders = 6,     // Immutable
    HttpCallResponseTrailers = 7,    // Immutable
}

impl MapType {
    /// Callback scope in which this map is meaningful, if restricted
    pub fn scope(self) -> Option<ContextKind> {
        match self {
            Self::HttpRequestHeaders
            | Self::HttpRequestTrailers
            | Self::HttpResponseHeaders
            | Self::HttpResponseTrailers => Some(ContextKind::Http),
            Self::GrpcReceiveInitialMetadata
            | Self::GrpcReceiveTrailingMetadata
            | Self::HttpCallResponseHeaders
            | Self::HttpCallResponseTrailers => None,
        }
    }
}

/// Connection side that closed (proxy_peer_type_t)
#[repr(u32)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PeerType {
    Unknown = 0,
    Local = 1,
    Remote = 2,
}

impl PeerType {
    /// Decode a raw peer type; unrecognized values are `Unknown`
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Local,
            2 => Self::Remote,
            _ => Self::Unknown,
        }
    }
}

/// Stream selector for flow control (proxy_stream_type_t)
#[repr(u32)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum StreamType {
    HttpRequest = 0,
    HttpResponse = 1,
    Downstream = 2,
    Upstream = 3,
}

/// Kind of callback scope active while a handler runs
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ContextKind {
    Root,
    Stream,
    Http,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_raw() {
        assert_eq!(Status::from_raw(0), Some(Status::Ok));
        assert_eq!(Status::from_raw(7), Some(Status::Empty));
        assert_eq!(Status::from_raw(8), Some(Status::CasMismatch));
        assert_eq!(Status::from_raw(13), Some(Status::NotAllowed));
        assert_eq!(Status::from_raw(99), None);
    }

    #[test]
    fn test_status_discriminants_match_raw() {
        for raw in 0..=13 {
            if let Some(status) = Status::from_raw(raw) {
                assert_eq!(status as u32, raw);
            }
        }
    }

    #[test]
    fn test_log_level_from_raw() {
        assert_eq!(LogLevel::from_raw(2), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_raw(6), None);
        assert_eq!(LogLevel::from(log::Level::Warn), LogLevel::Warn);
        assert_eq!(LogLevel::Critical.to_level_filter(), log::LevelFilter::Error);
    }

    #[test]
    fn test_peer_type_unknown_fallback() {
        assert_eq!(PeerType::from_raw(2), PeerType::Remote);
        assert_eq!(PeerType::from_raw(42), PeerType::Unknown);
    }

    #[test]
    fn test_scopes() {
        assert_eq!(MapType::HttpRequestHeaders.scope(), Some(ContextKind::Http));
        assert_eq!(MapType::HttpCallResponseHeaders.scope(), None);
        assert_eq!(BufferType::DownstreamData.scope(), Some(ContextKind::Stream));
        assert_eq!(BufferType::PluginConfiguration.scope(), Some(ContextKind::Root));
        assert_eq!(BufferType::HttpCallResponseBody.scope(), None);
    }
}
