// Capture transport error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Capture error code constants
///
/// Error code range: 1001-1008
pub struct CaptureErrorCodes {}

impl CaptureErrorCodes {
    /// Backend library or server is not reachable on this machine
    pub const BACKEND_UNAVAILABLE: i32 = 1001;

    /// Device exists but is held by another client
    pub const DEVICE_BUSY: i32 = 1002;

    /// Source (device name, file path) cannot be opened
    pub const INVALID_SOURCE: i32 = 1003;

    /// Source delivers a sample format the transport cannot normalize
    pub const INVALID_FORMAT: i32 = 1004;

    /// Stream failed or disconnected while capturing
    pub const STREAM_FAILURE: i32 = 1005;

    /// Operation not supported by this transport
    pub const UNSUPPORTED: i32 = 1006;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1007;

    /// Capture thread could not be spawned
    pub const THREAD_SPAWN_FAILED: i32 = 1008;
}

/// Log a capture error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_capture_error(err: &CaptureError, context: &str) {
    error!(
        "Capture error in {}: code={}, component=CaptureThread, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Transport-level errors
///
/// Raised by a backend while probing, opening or reading its source. Inside
/// the capture loop they are converted into an error notification and never
/// cross the thread boundary as a panic.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// Backend library or server is not reachable
    BackendUnavailable { backend: String, reason: String },

    /// Device exists but is held by another client
    DeviceBusy { device: String },

    /// Source cannot be opened
    InvalidSource { source: String, reason: String },

    /// Sample format cannot be normalized
    InvalidFormat { details: String },

    /// Stream failed while capturing
    StreamFailure { reason: String },

    /// Operation not supported by the transport
    Unsupported { transport: String, operation: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Capture thread could not be spawned
    ThreadSpawnFailed { reason: String },
}

impl ErrorCode for CaptureError {
    fn code(&self) -> i32 {
        match self {
            CaptureError::BackendUnavailable { .. } => CaptureErrorCodes::BACKEND_UNAVAILABLE,
            CaptureError::DeviceBusy { .. } => CaptureErrorCodes::DEVICE_BUSY,
            CaptureError::InvalidSource { .. } => CaptureErrorCodes::INVALID_SOURCE,
            CaptureError::InvalidFormat { .. } => CaptureErrorCodes::INVALID_FORMAT,
            CaptureError::StreamFailure { .. } => CaptureErrorCodes::STREAM_FAILURE,
            CaptureError::Unsupported { .. } => CaptureErrorCodes::UNSUPPORTED,
            CaptureError::LockPoisoned { .. } => CaptureErrorCodes::LOCK_POISONED,
            CaptureError::ThreadSpawnFailed { .. } => CaptureErrorCodes::THREAD_SPAWN_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            CaptureError::BackendUnavailable { backend, reason } => {
                format!("{} backend unavailable: {}", backend, reason)
            }
            CaptureError::DeviceBusy { device } => {
                format!("Device {} is busy", device)
            }
            CaptureError::InvalidSource { source, reason } => {
                format!("Cannot open source '{}': {}", source, reason)
            }
            CaptureError::InvalidFormat { details } => {
                format!("Unsupported sample format: {}", details)
            }
            CaptureError::StreamFailure { reason } => {
                format!("Capture stream failed: {}", reason)
            }
            CaptureError::Unsupported {
                transport,
                operation,
            } => {
                format!("{} does not support {}", transport, operation)
            }
            CaptureError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            CaptureError::ThreadSpawnFailed { reason } => {
                format!("Failed to spawn capture thread: {}", reason)
            }
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CaptureError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CaptureError {}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::StreamFailure {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_codes() {
        assert_eq!(
            CaptureError::DeviceBusy {
                device: "hw:0".to_string()
            }
            .code(),
            CaptureErrorCodes::DEVICE_BUSY
        );
        assert_eq!(
            CaptureError::StreamFailure {
                reason: "xrun".to_string()
            }
            .code(),
            CaptureErrorCodes::STREAM_FAILURE
        );
        assert_eq!(
            CaptureError::ThreadSpawnFailed {
                reason: "limit".to_string()
            }
            .code(),
            CaptureErrorCodes::THREAD_SPAWN_FAILED
        );
    }

    #[test]
    fn test_capture_error_display_carries_code_and_message() {
        let err = CaptureError::InvalidSource {
            source: "missing.wav".to_string(),
            reason: "not found".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("code 1003"), "display was {}", text);
        assert!(text.contains("missing.wav"), "display was {}", text);
    }

    #[test]
    fn test_io_error_converts_to_stream_failure() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: CaptureError = io.into();
        assert_eq!(err.code(), CaptureErrorCodes::STREAM_FAILURE);
    }
}
