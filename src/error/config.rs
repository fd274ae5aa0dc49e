// Configuration error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Configuration error code constants
///
/// Error code range: 2001-2009
pub struct ConfigErrorCodes {}

impl ConfigErrorCodes {
    /// No registered transport matches the requested name
    pub const UNKNOWN_TRANSPORT: i32 = 2001;

    /// A transport option was set before any transport was selected
    pub const NO_TRANSPORT_SELECTED: i32 = 2002;

    /// Semitone bounds are not ordered (min must be < max)
    pub const INVALID_SEMITONE_BOUNDS: i32 = 2003;

    /// Tuning frequency must be strictly positive and finite
    pub const INVALID_TUNING_FREQUENCY: i32 = 2004;

    /// Unknown estimator name
    pub const UNKNOWN_ESTIMATOR: i32 = 2005;

    /// recognize() called before init()
    pub const ESTIMATOR_NOT_INITIALIZED: i32 = 2006;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 2007;

    /// The selected transport refused the new option value
    pub const TRANSPORT_REJECTED: i32 = 2008;

    /// A semitone bound maps outside the analysable frequency range
    pub const FREQUENCY_OUT_OF_RANGE: i32 = 2009;
}

/// Log a configuration error with structured context
pub fn log_config_error(err: &ConfigError, context: &str) {
    error!(
        "Config error in {}: code={}, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Configuration errors
///
/// Rejected synchronously by the setter that received the bad value; the
/// target component keeps its previous state.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// No registered transport matches the requested name
    UnknownTransport { name: String },

    /// A transport option was set with no transport selected
    NoTransportSelected { operation: String },

    /// Semitone bounds are not ordered
    InvalidSemitoneBounds { min: i32, max: i32 },

    /// Tuning frequency is not strictly positive
    InvalidTuningFrequency { frequency: f64 },

    /// Unknown estimator name
    UnknownEstimator { name: String },

    /// Orchestrator used before an estimator was built
    EstimatorNotInitialized,

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// The selected transport refused the new option value
    TransportRejected { transport: String, reason: String },

    /// A semitone bound maps outside the analysable frequency range
    FrequencyOutOfRange { semitone: i32, frequency: f64 },
}

impl ErrorCode for ConfigError {
    fn code(&self) -> i32 {
        match self {
            ConfigError::UnknownTransport { .. } => ConfigErrorCodes::UNKNOWN_TRANSPORT,
            ConfigError::NoTransportSelected { .. } => ConfigErrorCodes::NO_TRANSPORT_SELECTED,
            ConfigError::InvalidSemitoneBounds { .. } => {
                ConfigErrorCodes::INVALID_SEMITONE_BOUNDS
            }
            ConfigError::InvalidTuningFrequency { .. } => {
                ConfigErrorCodes::INVALID_TUNING_FREQUENCY
            }
            ConfigError::UnknownEstimator { .. } => ConfigErrorCodes::UNKNOWN_ESTIMATOR,
            ConfigError::EstimatorNotInitialized => ConfigErrorCodes::ESTIMATOR_NOT_INITIALIZED,
            ConfigError::LockPoisoned { .. } => ConfigErrorCodes::LOCK_POISONED,
            ConfigError::TransportRejected { .. } => ConfigErrorCodes::TRANSPORT_REJECTED,
            ConfigError::FrequencyOutOfRange { .. } => ConfigErrorCodes::FREQUENCY_OUT_OF_RANGE,
        }
    }

    fn message(&self) -> String {
        match self {
            ConfigError::UnknownTransport { name } => {
                format!("Unknown transport '{}'", name)
            }
            ConfigError::NoTransportSelected { operation } => {
                format!("Cannot {} without a selected transport", operation)
            }
            ConfigError::InvalidSemitoneBounds { min, max } => {
                format!("Semitone bounds must satisfy min < max (got [{}, {}])", min, max)
            }
            ConfigError::InvalidTuningFrequency { frequency } => {
                format!("Tuning frequency must be > 0 Hz (got {})", frequency)
            }
            ConfigError::UnknownEstimator { name } => {
                format!(
                    "Unknown estimator '{}' (expected autocorrelation, multi_correlation or bubble)",
                    name
                )
            }
            ConfigError::EstimatorNotInitialized => {
                "No estimator initialized. Call init() first.".to_string()
            }
            ConfigError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            ConfigError::TransportRejected { transport, reason } => {
                format!("{} rejected the setting: {}", transport, reason)
            }
            ConfigError::FrequencyOutOfRange {
                semitone,
                frequency,
            } => {
                format!(
                    "Semitone {} is {:.2} Hz, outside the analysable range [{}, {}] Hz",
                    semitone,
                    frequency,
                    crate::settings::LOWEST_FREQUENCY,
                    crate::settings::HIGHEST_FREQUENCY
                )
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConfigError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_codes() {
        assert_eq!(
            ConfigError::UnknownTransport {
                name: "OSS".to_string()
            }
            .code(),
            ConfigErrorCodes::UNKNOWN_TRANSPORT
        );
        assert_eq!(
            ConfigError::InvalidSemitoneBounds { min: 3, max: 3 }.code(),
            ConfigErrorCodes::INVALID_SEMITONE_BOUNDS
        );
        assert_eq!(
            ConfigError::EstimatorNotInitialized.code(),
            ConfigErrorCodes::ESTIMATOR_NOT_INITIALIZED
        );
    }

    #[test]
    fn test_no_transport_message_names_operation() {
        let err = ConfigError::NoTransportSelected {
            operation: "set the port name".to_string(),
        };
        assert_eq!(
            err.message(),
            "Cannot set the port name without a selected transport"
        );
    }
}
