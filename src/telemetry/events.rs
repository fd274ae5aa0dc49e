//! Event payloads published by the telemetry hub.

use serde::{Deserialize, Serialize};

/// Capture thread lifecycle stages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CapturePhase {
    Started,
    Stopped,
    Failed,
}

/// Diagnostic error codes surfaced via telemetry metrics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticError {
    Transport,
    Estimator,
    Consistency,
    Unknown,
}

/// Note lifecycle stage carried by [`MetricEvent::Note`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotePhase {
    Started,
    Finished,
}

/// Metric events covering refresh latency, queue backlog, notes and capture lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    RefreshLatency {
        avg_ms: f32,
        max_ms: f32,
        /// Spread between the slowest and fastest cycle in the window
        jitter_ms: f32,
        sample_count: usize,
    },
    Backlog {
        channel: String,
        samples: usize,
    },
    Note {
        phase: NotePhase,
        semitone: i32,
        tag: u64,
    },
    CaptureLifecycle {
        phase: CapturePhase,
        timestamp_ms: u64,
    },
    Error {
        code: DiagnosticError,
        context: String,
    },
}
