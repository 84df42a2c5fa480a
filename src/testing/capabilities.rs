//! Host Capability Settings
//!
//! Which host functions the fake host grants to the guest. Denied calls
//! return `Status::NotAllowed`, the way the veil host answers a module whose
//! capabilities do not cover the call.

use serde::{Deserialize, Serialize};

/// Capabilities granted to the guest under test
///
/// All capabilities default to false (deny by default); [`FakeHost::new`]
/// starts from [`HostCapabilities::permissive`].
///
/// [`FakeHost::new`]: super::FakeHost::new
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostCapabilities {
    /// Allow proxy_get/set_shared_data
    #[serde(default)]
    pub allow_shared_data: bool,

    /// Allow proxy_send_local_response
    #[serde(default)]
    pub allow_send_local_response: bool,

    /// Allow proxy_http_call
    #[serde(default)]
    pub allow_http_calls: bool,
}

impl HostCapabilities {
    /// Everything allowed
    pub fn permissive() -> Self {
        Self {
            allow_shared_data: true,
            allow_send_local_response: true,
            allow_http_calls: true,
        }
    }
}
