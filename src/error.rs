//! Host Call Errors
//!
//! Every ABI call either succeeds or reports one of two failures:
//! the host refused the call ([`HostCallError`]), or the host succeeded but
//! the returned payload could not be decoded ([`HostResponseError`]).

use std::fmt;

use crate::constants::ABI_MODULE;
use crate::types::Status;

/// A host function returned a non-Ok status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCallError {
    module: &'static str,
    function: &'static str,
    status: Status,
}

impl HostCallError {
    pub(crate) fn new(function: &'static str, status: Status) -> Self {
        Self {
            module: ABI_MODULE,
            function,
            status,
        }
    }

    /// Import module of the failing function
    pub fn module(&self) -> &'static str {
        self.module
    }

    /// Name of the failing function
    pub fn function(&self) -> &'static str {
        self.function
    }

    /// Status reported by the host
    pub fn status(&self) -> Status {
        self.status
    }
}

impl fmt::Display for HostCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "host call {}.{} failed with status {:?}",
            self.module, self.function, self.status
        )
    }
}

impl std::error::Error for HostCallError {}

/// A host function succeeded but its response could not be decoded
#[derive(Debug)]
pub struct HostResponseError {
    module: &'static str,
    function: &'static str,
    cause: anyhow::Error,
}

impl HostResponseError {
    pub(crate) fn new(function: &'static str, cause: anyhow::Error) -> Self {
        Self {
            module: ABI_MODULE,
            function,
            cause,
        }
    }

    /// Import module of the function whose response was malformed
    pub fn module(&self) -> &'static str {
        self.module
    }

    /// Name of the function whose response was malformed
    pub fn function(&self) -> &'static str {
        self.function
    }

    /// Underlying decode failure
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }
}

impl fmt::Display for HostResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to decode response of host call {}.{}: {:#}",
            self.module, self.function, self.cause
        )
    }
}

impl std::error::Error for HostResponseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// Any failure of the ABI call layer
#[derive(Debug)]
pub enum Error {
    /// The host refused the call
    HostCall(HostCallError),
    /// The host succeeded but the payload was unreadable
    HostResponse(HostResponseError),
}

impl Error {
    /// Host status for refused calls; `None` for decode failures
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::HostCall(err) => Some(err.status()),
            Self::HostResponse(_) => None,
        }
    }

    /// Name of the ABI function that failed
    pub fn function(&self) -> &'static str {
        match self {
            Self::HostCall(err) => err.function(),
            Self::HostResponse(err) => err.function(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HostCall(err) => err.fmt(f),
            Self::HostResponse(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::HostCall(_) => None,
            Self::HostResponse(err) => err.source(),
        }
    }
}

impl From<HostCallError> for Error {
    fn from(err: HostCallError) -> Self {
        Self::HostCall(err)
    }
}

impl From<HostResponseError> for Error {
    fn from(err: HostResponseError) -> Self {
        Self::HostResponse(err)
    }
}

/// Result of an ABI call
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{PROXY_GET_HEADER_MAP_PAIRS, PROXY_SET_SHARED_DATA};
    use std::error::Error as _;

    #[test]
    fn test_host_call_error_identity() {
        let err = HostCallError::new(PROXY_SET_SHARED_DATA, Status::CasMismatch);
        assert_eq!(err.module(), "env");
        assert_eq!(err.function(), "proxy_set_shared_data");
        assert_eq!(err.status(), Status::CasMismatch);
        assert_eq!(
            err.to_string(),
            "host call env.proxy_set_shared_data failed with status CasMismatch"
        );
    }

    #[test]
    fn test_host_response_error_keeps_cause() {
        let err: Error = HostResponseError::new(
            PROXY_GET_HEADER_MAP_PAIRS,
            anyhow::anyhow!("truncated map"),
        )
        .into();
        assert_eq!(err.status(), None);
        assert_eq!(err.function(), "proxy_get_header_map_pairs");
        assert!(err.to_string().contains("truncated map"));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("truncated map"));
    }

    #[test]
    fn test_error_status_passthrough() {
        let err: Error = HostCallError::new(PROXY_SET_SHARED_DATA, Status::BadArgument).into();
        assert_eq!(err.status(), Some(Status::BadArgument));
        assert!(err.source().is_none());
    }
}
