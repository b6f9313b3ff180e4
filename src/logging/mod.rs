// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compile-time configurable logging system.
//!
//! Four severity levels (`debug!`, `info!`, `warn!`, `error!`) plus `fatal!`,
//! which logs at `Error` and then aborts the process. The core never
//! recovers from the fatal conditions enumerated in the crate's error
//! design (nonce reuse, AEAD auth failure, order violation) — it logs the
//! cause and tears the process down rather than continuing in an
//! inconsistent state.
//!
//! When the `logging` feature is disabled, `debug!`/`info!`/`warn!`/`error!`
//! compile to nothing; `fatal!` always aborts regardless of the feature.

#[cfg(feature = "logging")]
pub mod logger;
#[cfg(feature = "logging")]
mod output;

#[cfg(feature = "logging")]
pub use logger::{flush_logger, init_logger};
#[cfg(feature = "logging")]
pub use output::{ConsoleOutput, FileOutput, LogLevel, Output};

#[macro_export]
#[cfg(feature = "logging")]
macro_rules! debug {
    ($($arg:tt)*) => {
        let _ = $crate::logging::logger::log_message(
            $crate::logging::LogLevel::Debug,
            &format!($($arg)*),
        );
    };
}
#[macro_export]
#[cfg(not(feature = "logging"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}

#[macro_export]
#[cfg(feature = "logging")]
macro_rules! info {
    ($($arg:tt)*) => {
        let _ = $crate::logging::logger::log_message(
            $crate::logging::LogLevel::Info,
            &format!($($arg)*),
        );
    };
}
#[macro_export]
#[cfg(not(feature = "logging"))]
macro_rules! info {
    ($($arg:tt)*) => {};
}

#[macro_export]
#[cfg(feature = "logging")]
macro_rules! warn {
    ($($arg:tt)*) => {
        let _ = $crate::logging::logger::log_message(
            $crate::logging::LogLevel::Warning,
            &format!($($arg)*),
        );
    };
}
#[macro_export]
#[cfg(not(feature = "logging"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}

#[macro_export]
#[cfg(feature = "logging")]
macro_rules! error {
    ($($arg:tt)*) => {
        let _ = $crate::logging::logger::log_message(
            $crate::logging::LogLevel::Error,
            &format!($($arg)*),
        );
    };
}
#[macro_export]
#[cfg(not(feature = "logging"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}

/// Function entry trace marker, only active when both `logging` and
/// `trace` features are enabled — a step below `debug!` in verbosity,
/// for hot-path entry points that would otherwise flood a `Debug`-level
/// log on every message.
#[macro_export]
#[cfg(all(feature = "logging", feature = "trace"))]
macro_rules! trace_fn {
    ($fn_name:expr) => {
        let _ = $crate::logging::logger::trace_entry($fn_name);
    };
}
#[macro_export]
#[cfg(not(all(feature = "logging", feature = "trace")))]
macro_rules! trace_fn {
    ($fn_name:expr) => {};
}

/// Log a fatal condition and abort the process.
///
/// Used at the points the component design (§9) calls out as
/// assert-and-abort: nonce reuse, AEAD authentication failure, session
/// order violation. Never returns.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        #[cfg(feature = "logging")]
        {
            let _ = $crate::logging::logger::log_message(
                $crate::logging::LogLevel::Error,
                &format!($($arg)*),
            );
            let _ = $crate::logging::logger::flush_logger();
        }
        #[cfg(not(feature = "logging"))]
        {
            eprintln!($($arg)*);
        }
        std::process::abort()
    }};
}
