/// Process-wide state for the batching engine
///
/// Only two things are global: the logger and the 16-bit batch id counter.
/// Everything else (managers, pools, intersectors) is an explicit object owned
/// by the host.

use std::sync::{Arc, OnceLock, RwLock};
use std::time::SystemTime;
use crate::batch::BatchIdAllocator;
use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};

// ===== INTERNAL STATE =====

/// Global logger (initialized with DefaultLogger)
static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();

/// Global batch id counter shared by every manager that does not inject its own
static BATCH_IDS: OnceLock<Arc<BatchIdAllocator>> = OnceLock::new();

fn logger_lock() -> &'static RwLock<Box<dyn Logger>> {
    LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger::default())))
}

// ===== PUBLIC API =====

/// Engine-wide entry points
///
/// # Example
///
/// ```no_run
/// use stroke_batching::batching::Engine;
/// use stroke_batching::batching::log::{DefaultLogger, LogSeverity};
///
/// Engine::set_logger(DefaultLogger::new(LogSeverity::Warn));
/// let ids = Engine::batch_id_allocator();
/// let first = ids.allocate();
/// assert_ne!(first.0, 0);
/// ```
pub struct Engine;

impl Engine {
    // ===== BATCH IDS =====

    /// Shared batch id allocator
    ///
    /// Ids wrap after 65,535 allocations and never take the value 0.
    pub fn batch_id_allocator() -> Arc<BatchIdAllocator> {
        BATCH_IDS.get_or_init(|| Arc::new(BatchIdAllocator::new())).clone()
    }

    // ===== LOGGING API =====

    /// Replace the current logger
    pub fn set_logger<L: Logger + 'static>(logger: L) {
        if let Ok(mut lock) = logger_lock().write() {
            *lock = Box::new(logger);
        }
    }

    /// Reset logger to the default console logger
    pub fn reset_logger() {
        if let Ok(mut lock) = logger_lock().write() {
            *lock = Box::new(DefaultLogger::default());
        }
    }

    /// Log without file:line (used by engine_trace! .. engine_warn!)
    pub fn log(severity: LogSeverity, source: &str, message: String) {
        if let Ok(lock) = logger_lock().read() {
            lock.log(&LogEntry {
                severity,
                timestamp: SystemTime::now(),
                source: source.to_string(),
                message,
                file: None,
                line: None,
            });
        }
    }

    /// Log with file:line (used by engine_error!)
    pub fn log_detailed(
        severity: LogSeverity,
        source: &str,
        message: String,
        file: &'static str,
        line: u32,
    ) {
        if let Ok(lock) = logger_lock().read() {
            lock.log(&LogEntry {
                severity,
                timestamp: SystemTime::now(),
                source: source.to_string(),
                message,
                file: Some(file),
                line: Some(line),
            });
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
