//! Structured logging macros over the injected [`crate::hal::Log`] sink.
//!
//! Unlike the host kernel this driver was grounded on, there is no
//! process-wide log singleton here (the design note rules out process-wide
//! state) — every call site names the sink explicitly, as the first
//! argument, along with a module tag used for the `[ module ]` prefix a
//! host console typically renders.
//!
//! ```ignore
//! debug!(self.log, "controller"; "claiming legacy handoff");
//! warn!(self.log, "enumeration"; "port {} failed reset", port_index);
//! ```

#[macro_export]
macro_rules! debug {
    ($log:expr, $module:expr; $($arg:tt)*) => {
        $log.log($crate::hal::LogLevel::Debug, $module, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! info {
    ($log:expr, $module:expr; $($arg:tt)*) => {
        $log.log($crate::hal::LogLevel::Info, $module, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($log:expr, $module:expr; $($arg:tt)*) => {
        $log.log($crate::hal::LogLevel::Warn, $module, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($log:expr, $module:expr; $($arg:tt)*) => {
        $log.log($crate::hal::LogLevel::Error, $module, format_args!($($arg)*))
    };
}

pub use crate::{debug, error, info, warn};
