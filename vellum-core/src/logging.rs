// logging.rs - Embedded-friendly leveled logging
// No logger backend to configure: a process-wide level and stderr output

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

/// Log levels (ordered by severity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Errors - failed commits, unrecoverable conditions
    Error = 0,
    /// Warnings - recovered corruption, dropped messages
    Warn = 1,
    /// Info - lifecycle events (open, hydrate, close)
    Info = 2,
    /// Debug - every storage operation with timing
    Debug = 3,
    /// Trace - cache hits, drain chunks, broadcast traffic
    Trace = 4,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    pub fn parse(s: &str) -> Option<LogLevel> {
        match s.to_uppercase().as_str() {
            "ERROR" => Some(LogLevel::Error),
            "WARN" | "WARNING" => Some(LogLevel::Warn),
            "INFO" => Some(LogLevel::Info),
            "DEBUG" => Some(LogLevel::Debug),
            "TRACE" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(level: u8) -> LogLevel {
        match level {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            4 => LogLevel::Trace,
            _ => LogLevel::Warn,
        }
    }
}

// Global log level (default: WARN)
static GLOBAL_LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);

/// Set the global log level
pub fn set_log_level(level: LogLevel) {
    GLOBAL_LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Get the current global log level
pub fn get_log_level() -> LogLevel {
    LogLevel::from_u8(GLOBAL_LOG_LEVEL.load(Ordering::Relaxed))
}

/// Check if a message at the given level should be logged
#[inline]
pub fn should_log(level: LogLevel) -> bool {
    level <= get_log_level()
}

#[doc(hidden)]
pub fn log_message(level: LogLevel, module: &str, message: &str) {
    if should_log(level) {
        eprintln!("[{}] {}: {}", level.as_str(), module, message);
    }
}

/// Measures one storage operation and reports it at debug level.
///
/// ```ignore
/// let op = OpTimer::start("insertOne", &self.name);
/// // ...
/// op.finish("1 document");
/// ```
pub struct OpTimer<'a> {
    operation: &'static str,
    collection: &'a str,
    started: Instant,
}

impl<'a> OpTimer<'a> {
    pub fn start(operation: &'static str, collection: &'a str) -> Self {
        OpTimer {
            operation,
            collection,
            started: Instant::now(),
        }
    }

    pub fn finish(self, details: impl std::fmt::Display) {
        if should_log(LogLevel::Debug) {
            log_message(
                LogLevel::Debug,
                "vellum_core::storage",
                &format!(
                    "{}({}) {} in {:.3}ms",
                    self.operation,
                    self.collection,
                    details,
                    self.started.elapsed().as_secs_f64() * 1000.0
                ),
            );
        }
    }
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_message(
            $crate::logging::LogLevel::Error,
            module_path!(),
            &format!($($arg)*)
        )
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log_message(
            $crate::logging::LogLevel::Warn,
            module_path!(),
            &format!($($arg)*)
        )
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_message(
            $crate::logging::LogLevel::Info,
            module_path!(),
            &format!($($arg)*)
        )
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if $crate::logging::should_log($crate::logging::LogLevel::Debug) {
            $crate::logging::log_message(
                $crate::logging::LogLevel::Debug,
                module_path!(),
                &format!($($arg)*)
            )
        }
    };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        if $crate::logging::should_log($crate::logging::LogLevel::Trace) {
            $crate::logging::log_message(
                $crate::logging::LogLevel::Trace,
                module_path!(),
                &format!($($arg)*)
            )
        }
    };
}
