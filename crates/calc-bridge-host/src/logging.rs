//! Guest logging.
//!
//! Lines a guest emits through the `log` import are kept in the runtime's
//! [`GuestLogs`](calc_bridge_core::GuestLogs) buffer and forwarded to
//! `tracing` under the instance id.

use calc_bridge_core::{HostContext, LogLevel};
use tracing::{debug, error, info, warn};

/// Host side of the `log` import.
pub struct LoggingHost;

impl LoggingHost {
    /// Log a message at the specified level.
    ///
    /// The entry is stored in the context's log buffer and emitted via
    /// `tracing` with `guest_log = true`.
    pub fn log(ctx: &HostContext, level: LogLevel, message: &str) {
        ctx.log(level, message.to_string());

        let instance_id = ctx.instance_id.as_str();
        match level {
            LogLevel::Debug => debug!(instance_id, guest_log = true, "{}", message),
            LogLevel::Info => info!(instance_id, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(instance_id, guest_log = true, "{}", message),
            LogLevel::Error => error!(instance_id, guest_log = true, "{}", message),
        }
    }
}

/// Convert a numeric log level from the guest to [`LogLevel`].
///
/// 0=debug, 1=info, 2=warn, 3=error. Unknown values map to info.
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use calc_bridge_core::store::ExportSink;
    use calc_bridge_core::{ExportRegistry, GuestLogs};
    use tokio::sync::mpsc;

    fn context(logs: Arc<GuestLogs>) -> HostContext {
        let (tx, _rx) = mpsc::channel(1);
        let sink = ExportSink::new(Arc::new(ExportRegistry::new()), 1, tx);
        HostContext::new("test-123".into(), logs, sink)
    }

    #[test]
    fn test_logging_stores_in_buffer() {
        let logs = Arc::new(GuestLogs::new());
        let ctx = context(Arc::clone(&logs));

        LoggingHost::log(&ctx, LogLevel::Info, "Hello");
        LoggingHost::log(&ctx, LogLevel::Error, "World");

        let entries = logs.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "Hello");
        assert_eq!(entries[0].level, LogLevel::Info);
        assert_eq!(entries[1].message, "World");
        assert_eq!(entries[1].level, LogLevel::Error);
    }

    #[test]
    fn test_level_from_i32() {
        assert_eq!(level_from_i32(0), LogLevel::Debug);
        assert_eq!(level_from_i32(1), LogLevel::Info);
        assert_eq!(level_from_i32(2), LogLevel::Warn);
        assert_eq!(level_from_i32(3), LogLevel::Error);
        assert_eq!(level_from_i32(99), LogLevel::Info);
        assert_eq!(level_from_i32(-1), LogLevel::Info);
    }
}
