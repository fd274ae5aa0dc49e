//! Capability interface implemented by every capture backend.

use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

use super::CaptureContext;

/// Sampling rate requested from a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SamplingRate {
    /// Let the backend use its native rate
    #[default]
    Unknown,
    /// Highest rate the device supports
    Max,
    Hz(u32),
}

impl SamplingRate {
    pub fn hz(&self) -> Option<u32> {
        match self {
            SamplingRate::Hz(rate) => Some(*rate),
            _ => None,
        }
    }
}

/// Backend-specific options shared by every transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportOptions {
    pub sampling_rate: SamplingRate,
    /// Name under which the transport registers its input port
    pub port_name: String,
    /// Device name or file path; empty for the backend default
    pub source: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            sampling_rate: SamplingRate::Unknown,
            port_name: "input".to_string(),
            source: String::new(),
        }
    }
}

/// Public description of a registered transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportInfo {
    pub name: String,
    pub description: String,
    pub status: String,
}

/// A capture backend.
///
/// `capture_loop` runs on the capture thread and must return soon after
/// [`CaptureContext::should_continue`] turns false. Errors returned from any
/// method are turned into notifications by the capture thread.
pub trait CaptureTransport: Send {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Check that the backend can capture right now.
    fn probe(&mut self) -> Result<(), CaptureError>;

    fn options(&self) -> &TransportOptions;

    fn options_mut(&mut self) -> &mut TransportOptions;

    fn set_sampling_rate(&mut self, rate: SamplingRate) -> Result<(), CaptureError> {
        self.options_mut().sampling_rate = rate;
        Ok(())
    }

    fn set_port_name(&mut self, name: &str) -> Result<(), CaptureError> {
        self.options_mut().port_name = name.to_string();
        Ok(())
    }

    fn set_source(&mut self, source: &str) -> Result<(), CaptureError> {
        self.options_mut().source = source.to_string();
        Ok(())
    }

    /// Open the source. Called on the capture thread before `capture_loop`.
    fn capture_init(&mut self) -> Result<(), CaptureError>;

    fn capture_loop(&mut self, ctx: &CaptureContext<'_>) -> Result<(), CaptureError>;

    /// Release whatever `capture_init` acquired. Always called.
    fn capture_finished(&mut self) {}
}
