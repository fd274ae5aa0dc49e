// Pitch Recognizer Core
// Monophonic pitch recognition: capture thread, estimators and note quantizer

// Module declarations
pub mod analysis;
pub mod capture;
pub mod clock;
pub mod config;
pub mod error;
pub mod music;
pub mod settings;
pub mod telemetry;

// Re-exports for convenience
pub use analysis::{CycleReport, EstimatorKind, NoteEvent, QuantizerListener, Recognizer};
pub use capture::{CaptureEvent, CaptureThread, SampleQueue, SamplingRate};
pub use clock::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use config::AppConfig;
pub use settings::{Settings, SettingsRegistry};
