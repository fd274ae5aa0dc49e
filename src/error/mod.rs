// Error types for the pitch recognizer
//
// This module defines custom error types for capture, configuration and
// note-bookkeeping operations, providing structured error handling with
// numeric codes suitable for notifications and logs.

mod capture;
mod config;
mod consistency;

pub use capture::{log_capture_error, CaptureError, CaptureErrorCodes};
pub use config::{log_config_error, ConfigError, ConfigErrorCodes};
pub use consistency::{log_consistency_warning, ConsistencyError, ConsistencyErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the capture thread boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
