//! Error types for the stroke batching engine
//!
//! This module defines the error types used throughout the crate,
//! including capacity checks, residency, GPU readback and device failures.

use std::fmt;

/// Result type for batching operations
pub type Result<T> = std::result::Result<T, Error>;

/// Batching engine errors
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Graphics device failure (buffer write out of range, lock poisoned, etc.)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource (unknown material, stale subset handle, etc.)
    InvalidResource(String),

    /// Initialization failed (device resources for the intersector, etc.)
    InitializationFailed(String),

    /// Argument outside the accepted range (batch capacity, index ranges)
    InvalidArgument(String),

    /// Result accessed before the asynchronous readback completed
    NotReady,

    /// CPU-side geometry requested while only the GPU copy exists
    NotResident(String),

    /// Operation has no implementation for this request kind
    NotImplemented(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::NotReady => write!(f, "Intersection result is not ready"),
            Error::NotResident(msg) => write!(f, "Geometry not resident: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ===== ERROR MACROS =====

/// Build an `Error`, logging it through `engine_error!` first.
///
/// ```ignore
/// let err = engine_err!("batching::Batch", InvalidArgument, "batch {} is full", id);
/// ```
#[macro_export]
macro_rules! engine_err {
    ($source:expr, $variant:ident, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::engine_error!($source, "{}", message);
        $crate::batching::Error::$variant(message)
    }};
}

/// Log and return an `Err` from the current function.
///
/// ```ignore
/// engine_bail!("batching::BatchManager", InvalidResource, "unknown material {}", id);
/// ```
#[macro_export]
macro_rules! engine_bail {
    ($source:expr, $variant:ident, $($arg:tt)*) => {
        return Err($crate::engine_err!($source, $variant, $($arg)*))
    };
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
