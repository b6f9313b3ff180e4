// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Global logger instance and initialization.
//!
//! Lazily-initialized thread-safe singleton logger with a pluggable output.

use super::output::{LogLevel, Output};
use std::io;
use std::sync::{Arc, Mutex, OnceLock};

static LOGGER: OnceLock<Arc<Mutex<GlobalLogger>>> = OnceLock::new();

struct GlobalLogger {
    output: Option<Arc<dyn Output>>,
    level_filter: LogLevel,
}

impl GlobalLogger {
    fn new() -> Self {
        Self {
            output: None,
            level_filter: LogLevel::Info,
        }
    }

    fn log(&self, level: LogLevel, message: &str) -> io::Result<()> {
        if level < self.level_filter {
            return Ok(());
        }
        if let Some(ref output) = self.output {
            output.write(level, message)?;
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        if let Some(ref output) = self.output {
            output.flush()?;
        }
        Ok(())
    }
}

/// Initialize the global logger. Only the first call takes effect.
pub fn init_logger(output: Arc<dyn Output>, level: LogLevel) {
    let _ = LOGGER.get_or_init(|| {
        Arc::new(Mutex::new(GlobalLogger {
            output: Some(output),
            level_filter: level,
        }))
    });
}

#[inline]
fn get_logger() -> Option<Arc<Mutex<GlobalLogger>>> {
    LOGGER.get().cloned()
}

/// Called by the logging macros. No-op until `init_logger` runs.
#[inline]
#[doc(hidden)]
pub fn log_message(level: LogLevel, message: &str) -> io::Result<()> {
    match get_logger() {
        Some(logger) => {
            let guard = logger
                .lock()
                .map_err(|_| io::Error::other("global logger mutex poisoned"))?;
            guard.log(level, message)
        }
        None => Ok(()),
    }
}

/// Called by [`crate::trace_fn!`]. Not public API; `pub(crate)` only
/// because the macro expansion needs to name it from other modules.
#[doc(hidden)]
pub(crate) fn trace_entry(fn_name: &str) -> io::Result<()> {
    log_message(LogLevel::Debug, &format!("[ENTER:FNC] {fn_name}"))
}

/// Flush the global logger's output. Safe to call if uninitialized.
pub fn flush_logger() -> io::Result<()> {
    match get_logger() {
        Some(logger) => {
            let guard = logger
                .lock()
                .map_err(|_| io::Error::other("global logger mutex poisoned"))?;
            guard.flush()
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::output::ConsoleOutput;

    #[test]
    fn log_message_never_panics_uninitialized() {
        let result = log_message(LogLevel::Info, "probe");
        assert!(result.is_ok());
    }

    #[test]
    fn init_then_log() {
        let output = Arc::new(ConsoleOutput::new(LogLevel::Debug));
        init_logger(output, LogLevel::Debug);
        assert!(log_message(LogLevel::Warning, "after init").is_ok());
        assert!(flush_logger().is_ok());
    }
}
