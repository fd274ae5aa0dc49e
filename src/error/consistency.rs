// Consistency errors: bookkeeping anomalies that are logged and skipped

use crate::error::ErrorCode;
use log::warn;
use std::fmt;

/// Consistency error code constants
///
/// Error code range: 3001-3003
pub struct ConsistencyErrorCodes {}

impl ConsistencyErrorCodes {
    /// note-finished received for a note that is already finished
    pub const NOTE_ALREADY_FINISHED: i32 = 3001;

    /// Semitone index outside the configured range
    pub const SEMITONE_OUT_OF_RANGE: i32 = 3002;

    /// Event refers to a semitone with no note history
    pub const MISSING_NOTE: i32 = 3003;
}

/// Log a consistency problem as a warning. Recognition continues.
pub fn log_consistency_warning(err: &ConsistencyError, context: &str) {
    warn!(
        "Consistency warning in {}: code={}, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Non-fatal inconsistencies detected by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsistencyError {
    NoteAlreadyFinished { semitone: i32 },
    SemitoneOutOfRange { semitone: i32, min: i32, max: i32 },
    MissingNote { semitone: i32 },
}

impl ErrorCode for ConsistencyError {
    fn code(&self) -> i32 {
        match self {
            ConsistencyError::NoteAlreadyFinished { .. } => {
                ConsistencyErrorCodes::NOTE_ALREADY_FINISHED
            }
            ConsistencyError::SemitoneOutOfRange { .. } => {
                ConsistencyErrorCodes::SEMITONE_OUT_OF_RANGE
            }
            ConsistencyError::MissingNote { .. } => ConsistencyErrorCodes::MISSING_NOTE,
        }
    }

    fn message(&self) -> String {
        match self {
            ConsistencyError::NoteAlreadyFinished { semitone } => {
                format!("Note at semitone {} is already finished", semitone)
            }
            ConsistencyError::SemitoneOutOfRange { semitone, min, max } => {
                format!("Semitone {} outside [{}, {}]", semitone, min, max)
            }
            ConsistencyError::MissingNote { semitone } => {
                format!("No note recorded for semitone {}", semitone)
            }
        }
    }
}

impl fmt::Display for ConsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConsistencyError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ConsistencyError {}
