// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Logging
//!
//! Kernel-style logging macros. With the `logging` feature (on by default)
//! every macro forwards to the `log` facade, tagged with the calling
//! module's path, so the embedding environment picks the sink and level.
//! Without it the macros compile away but still type-check their format
//! arguments.
//!
//! # Usage
//!
//! ```rust
//! use rustux_channel::{log_debug, log_warn};
//!
//! log_debug!("channel {} created", 7);
//! log_warn!("queue depth {} over threshold", 1750);
//! ```

/// Log levels
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Trace-level logging (very verbose)
    Trace = 0,

    /// Debug-level logging (verbose)
    Debug = 1,

    /// Informational logging
    Info = 2,

    /// Warning-level logging
    Warning = 3,

    /// Error-level logging
    Error = 4,
}

impl LogLevel {
    /// Get the log level name as a string
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    #[cfg(feature = "logging")]
    fn to_log(self) -> log::Level {
        match self {
            LogLevel::Trace => log::Level::Trace,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Check whether a message at `level` would be emitted
#[inline]
pub fn log_enabled(level: LogLevel) -> bool {
    #[cfg(feature = "logging")]
    {
        level.to_log() <= log::max_level()
    }

    #[cfg(not(feature = "logging"))]
    {
        let _ = level;
        false
    }
}

/// Print a formatted message at a specific log level
///
/// # Arguments
///
/// * `level` - Log level for this message
/// * `target` - Module path of the caller
/// * `args` - Format arguments
#[inline]
pub fn log_print(level: LogLevel, target: &str, args: core::fmt::Arguments) {
    #[cfg(feature = "logging")]
    {
        log::log!(target: target, level.to_log(), "{}", args);
    }

    #[cfg(not(feature = "logging"))]
    {
        let _ = (level, target, args);
    }
}

/// Log a trace message
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::kernel::debug::log_print(
            $crate::kernel::debug::LogLevel::Trace,
            module_path!(),
            format_args!($($arg)*),
        )
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::kernel::debug::log_print(
            $crate::kernel::debug::LogLevel::Debug,
            module_path!(),
            format_args!($($arg)*),
        )
    };
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::kernel::debug::log_print(
            $crate::kernel::debug::LogLevel::Info,
            module_path!(),
            format_args!($($arg)*),
        )
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::kernel::debug::log_print(
            $crate::kernel::debug::LogLevel::Warning,
            module_path!(),
            format_args!($($arg)*),
        )
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::kernel::debug::log_print(
            $crate::kernel::debug::LogLevel::Error,
            module_path!(),
            format_args!($($arg)*),
        )
    };
}
