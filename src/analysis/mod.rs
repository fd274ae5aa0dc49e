// Analysis module - pitch estimation, note quantization and orchestration
//
// Architecture:
// - Recognizer: refresh-cycle driver draining the capture SampleQueue
// - Pipeline: Estimator → activation vector → Quantizer → note events
// - Output: NoteEvent via sinks, a tokio broadcast channel and CycleReport

pub mod estimators;
pub mod history;
pub mod quantizer;
pub mod recognizer;
pub mod stats;

pub use estimators::{Estimator, EstimatorKind, Fundamental, PitchEstimate, PitchEstimator};
pub use history::{NoteDescription, NoteHistory};
pub use quantizer::{Channel, ChannelState, NoteEvent, NoteTag, Quantizer, QuantizerListener};
pub use recognizer::{CycleReport, NoteSink, Recognizer};
pub use stats::{RefreshAggregates, RefreshStats, StatSample};
