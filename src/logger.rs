//! Host Logger
//!
//! `log` facade backend that forwards records to the host's `proxy_log`,
//! so extensions log with the usual `log::info!` / `log::warn!` macros.

use std::panic;

use once_cell::sync::OnceCell;

use crate::hostcalls;
use crate::types::LogLevel;

static LOGGER: HostLogger = HostLogger;
static INSTALLED: OnceCell<()> = OnceCell::new();

/// Forwards `log` records to the host
pub struct HostLogger;

impl log::Log for HostLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Nowhere to report a failing proxy_log
        let _ = hostcalls::log(LogLevel::from(record.level()), &record.args().to_string());
    }

    fn flush(&self) {}
}

/// Install the host logger and panic hook once, then set the threshold
pub fn set_log_level(level: LogLevel) {
    INSTALLED.get_or_init(|| {
        if log::set_logger(&LOGGER).is_ok() {
            panic::set_hook(Box::new(|info| {
                let _ = hostcalls::log(LogLevel::Critical, &info.to_string());
            }));
        }
    });
    log::set_max_level(level.to_level_filter());
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    #[test]
    fn test_records_reach_host() {
        let host = FakeHost::new();
        host.install();
        set_log_level(LogLevel::Info);

        log::info!("started {}", 1);
        log::debug!("filtered");

        let logs = host.logs();
        assert!(logs.contains(&(LogLevel::Info, "started 1".to_string())));
        assert!(!logs.iter().any(|(_, message)| message == "filtered"));
    }
}
