//! veil-wasm-sdk
//!
//! Guest-side runtime for Proxy-Wasm ABI v0.2.1 extensions: typed host
//! calls, the Root / Stream / HTTP context hierarchy, and the exported
//! entry points that route host callbacks to them.
//!
//! ```ignore
//! use veil_wasm_sdk::traits::*;
//! use veil_wasm_sdk::types::*;
//!
//! veil_wasm_sdk::main! {{
//!     veil_wasm_sdk::set_log_level(LogLevel::Info);
//!     veil_wasm_sdk::set_http_context(|_, _| Box::new(AddHeader));
//! }}
//!
//! struct AddHeader;
//!
//! impl Context for AddHeader {}
//!
//! impl HttpContext for AddHeader {
//!     fn on_http_request_headers(&mut self, _: usize, _: bool) -> Action {
//!         let _ = self.set_http_request_header("x-veil", Some("1"));
//!         Action::Continue
//!     }
//! }
//! ```

pub mod abi;
pub mod allocator;
pub mod callouts;
pub mod codec;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod hostcalls;
pub mod logger;
pub mod traits;
pub mod types;

#[cfg(not(target_arch = "wasm32"))]
pub mod testing;

pub use dispatcher::{set_http_context, set_root_context, set_stream_context};
pub use logger::set_log_level;

/// ABI version marker the host checks before instantiating the module
#[no_mangle]
pub extern "C" fn proxy_abi_version_0_2_1() {}

/// Export `_start`, running the registration block once at instantiation
#[macro_export]
macro_rules! main {
    ($code:block) => {
        #[no_mangle]
        pub extern "C" fn _start() {
            $code;
        }
    };
}
