//! Raw Host Function Boundary
//!
//! One safe function per Proxy-Wasm host import. Each returns the decoded
//! out-parameters on `Status::Ok` and the host status otherwise; mapping a
//! status to an [`crate::error::Error`] is left to [`crate::hostcalls`].
//!
//! On `wasm32` the functions call the `env` imports directly. On every other
//! target they forward to a [`Host`] installed for the current thread, which
//! lets extensions run natively against a host double.

#[cfg(target_arch = "wasm32")]
mod imports;
#[cfg(target_arch = "wasm32")]
pub(crate) use imports::*;

#[cfg(not(target_arch = "wasm32"))]
mod native;
#[cfg(not(target_arch = "wasm32"))]
pub(crate) use native::*;
#[cfg(not(target_arch = "wasm32"))]
pub use native::{has_host, install_host, uninstall_host, Host};

#[cfg(all(test, not(target_arch = "wasm32")))]
pub use native::MockHost;
