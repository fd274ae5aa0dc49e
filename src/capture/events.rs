//! Notifications emitted by the capture thread.

use serde::{Deserialize, Serialize};

use super::transport::SamplingRate;

/// Capture-side notification broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CaptureEvent {
    /// Selected transport changed; empty name when none is available
    TransportChanged { name: String },
    /// Requested or negotiated sampling rate changed
    SamplingRateChanged { rate: SamplingRate },
    PortNameChanged { name: String },
    SourceChanged { source: String },
    CaptureStarted,
    CaptureStopped,
    CaptureToggled { capturing: bool },
    /// Backend failure; the capture loop has stopped
    ErrorRaised { code: i32, message: String },
}
