//! Configuration management for recognizer tuning
//!
//! Settings are read from a JSON file at startup so they can be tuned
//! without a rebuild. Estimator thresholds, quantizer debounce timing and
//! capture options all live there. Missing sections fall back to their
//! defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::analysis::estimators::EstimatorKind;
use crate::capture::{SamplingRate, SyntheticSpec};
use crate::music::{NoteNotation, DEFAULT_TUNING_FREQUENCY};
use crate::error::ErrorCode;
use crate::settings::{validate_semitone_bounds, Settings};

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub settings: SettingsConfig,
    pub capture: CaptureConfig,
    pub estimator: EstimatorConfig,
    pub quantizer: QuantizerConfig,
    pub recognition: RecognitionConfig,
}

/// Initial values for the settings registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Leave unset to take the rate reported by the transport
    pub sampling_rate: Option<u32>,
    pub tuning_frequency: f64,
    pub semitone_min: i32,
    pub semitone_max: i32,
    /// Naming used in logs and CLI output
    pub notation: NoteNotation,
    /// Label transposition in semitones
    pub tonality: i32,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            sampling_rate: None,
            tuning_frequency: DEFAULT_TUNING_FREQUENCY,
            // A-1 (27.5 Hz) to A7 (7040 Hz)
            semitone_min: -48,
            semitone_max: 48,
            notation: NoteNotation::Anglo,
            tonality: 0,
        }
    }
}

impl SettingsConfig {
    /// Registry seed. An invalid tuning or range falls back to the defaults.
    pub fn to_settings(&self) -> Settings {
        let defaults = Settings::default();
        let tuning_frequency = if self.tuning_frequency.is_finite() && self.tuning_frequency > 0.0 {
            self.tuning_frequency
        } else {
            log::warn!(
                "[Config] Invalid tuning frequency {}. Using {} Hz.",
                self.tuning_frequency,
                defaults.tuning_frequency
            );
            defaults.tuning_frequency
        };
        let (semitone_min, semitone_max) =
            match validate_semitone_bounds(self.semitone_min, self.semitone_max, tuning_frequency) {
                Ok(()) => (self.semitone_min, self.semitone_max),
                Err(err) => {
                    log::warn!("[Config] {}. Using default semitone bounds.", err.message());
                    (defaults.semitone_min, defaults.semitone_max)
                }
            };
        Settings {
            sampling_rate: self.sampling_rate,
            tuning_frequency,
            semitone_min,
            semitone_max,
        }
    }
}

/// Capture transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Transport name; auto-detect when unset
    pub transport: Option<String>,
    pub sampling_rate: SamplingRate,
    pub port_name: String,
    /// Device name or file path
    pub source: String,
    /// Number of recycled packet buffers between the driver callback and the capture loop
    pub buffer_pool_size: usize,
    /// Capacity of each packet buffer in samples
    pub buffer_size: usize,
    /// Register the synthetic generator as a transport
    pub enable_synthetic: bool,
    pub synthetic: SyntheticSpec,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            transport: None,
            sampling_rate: SamplingRate::Unknown,
            port_name: "input".to_string(),
            source: String::new(),
            buffer_pool_size: 64,
            buffer_size: 2048,
            enable_synthetic: false,
            synthetic: SyntheticSpec::default(),
        }
    }
}

/// Pitch estimator selection and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub kind: EstimatorKind,
    /// Peak amplitude below which a window counts as silence
    pub volume_threshold: f32,
    pub autocorrelation: AutocorrelationConfig,
    pub multi_correlation: MultiCorrelationConfig,
    pub bubble: BubbleConfig,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            kind: EstimatorKind::MultiCorrelation,
            volume_threshold: 0.01,
            autocorrelation: AutocorrelationConfig::default(),
            multi_correlation: MultiCorrelationConfig::default(),
            bubble: BubbleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutocorrelationConfig {
    /// Minimum normalized autocorrelation accepted as periodicity evidence
    pub noise_threshold: f32,
    /// A later peak wins only if it beats the first one by this ratio
    pub key_maximum_ratio: f32,
}

impl Default for AutocorrelationConfig {
    fn default() -> Self {
        Self {
            noise_threshold: 0.1,
            key_maximum_ratio: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiCorrelationConfig {
    /// Matching length as a multiple of each filter's period
    pub latency_factor: usize,
    /// Offsets evaluated per period during refinement
    pub test_complexity: f32,
    /// Highest accepted error relative to the largest error of the cycle
    pub components_threshold: f64,
    /// Harmonics (beyond the fundamental) counted in latency accounting
    pub max_harmonic: usize,
}

impl Default for MultiCorrelationConfig {
    fn default() -> Self {
        Self {
            latency_factor: 1,
            test_complexity: 2.0,
            components_threshold: 0.3,
            max_harmonic: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BubbleConfig {
    /// Error threshold as a fraction of the window's peak amplitude
    pub error_threshold: f64,
    /// Finished bubbles within best + tolerance * threshold join the consensus
    pub consensus_tolerance: f64,
    /// Minimum comparisons before a bubble may finish
    pub min_evidence: usize,
}

impl Default for BubbleConfig {
    fn default() -> Self {
        Self {
            error_threshold: 0.33,
            consensus_tolerance: 0.05,
            min_evidence: 100,
        }
    }
}

/// Note quantizer debounce parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizerConfig {
    /// Rolling window and confirmation delay in milliseconds
    pub tolerance_ms: f64,
    /// Fraction of active samples required to count a semitone as sounding
    pub min_density: f64,
}

impl Default for QuantizerConfig {
    fn default() -> Self {
        Self {
            tolerance_ms: 100.0,
            min_density: 0.5,
        }
    }
}

/// Orchestrator bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Statistics retention window in milliseconds
    pub stats_window_ms: f64,
    /// Finished notes kept per semitone before the oldest are evicted
    pub max_notes_per_semitone: usize,
    /// Refresh period used by the CLI loops
    pub refresh_interval_ms: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            stats_window_ms: 1000.0,
            max_notes_per_semitone: 64,
            refresh_interval_ms: 20,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The loaded configuration, or the defaults if the file is missing or
    /// the JSON is invalid.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    pub fn load() -> Self {
        Self::load_from_file("assets/recognizer_config.json")
    }
}
