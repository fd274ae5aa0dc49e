//! Pitch estimators
//!
//! Three interchangeable strategies turn a rolling window of samples into a
//! fundamental pitch. Each one keeps a per-semitone component curve sized to
//! the configured semitone range and rebuilds its length bounds whenever the
//! sampling rate, tuning reference or semitone range changes.
//!
//! Windows are passed newest-first: `window[0]` is the most recent sample.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::EstimatorConfig;
use crate::error::ConfigError;
use crate::music::frequency_to_semitone_f;
use crate::settings::{Settings, SettingsChange, SettingsListener};

pub mod autocorrelation;
pub mod bubble;
pub mod multi_correlation;

pub use autocorrelation::AutocorrelationEstimator;
pub use bubble::BubbleEstimator;
pub use multi_correlation::MultiCorrelationEstimator;

/// Estimator selection tag, parsed from config files and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    Autocorrelation,
    #[default]
    MultiCorrelation,
    Bubble,
}

impl EstimatorKind {
    pub const ALL: [EstimatorKind; 3] = [
        EstimatorKind::Autocorrelation,
        EstimatorKind::MultiCorrelation,
        EstimatorKind::Bubble,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EstimatorKind::Autocorrelation => "autocorrelation",
            EstimatorKind::MultiCorrelation => "multi_correlation",
            EstimatorKind::Bubble => "bubble",
        }
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EstimatorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "autocorrelation" | "acf" => Ok(EstimatorKind::Autocorrelation),
            "multi_correlation" | "multicorrelation" | "multi" => {
                Ok(EstimatorKind::MultiCorrelation)
            }
            "bubble" | "gcd" => Ok(EstimatorKind::Bubble),
            _ => Err(ConfigError::UnknownEstimator {
                name: s.to_string(),
            }),
        }
    }
}

/// Recognized fundamental.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fundamental {
    /// Fractional semitone relative to the tuning reference
    pub semitone: f64,
    /// Period in samples
    pub wave_length: f64,
}

impl Fundamental {
    /// Nearest integer semitone.
    pub fn nearest_semitone(&self) -> i32 {
        self.semitone.round() as i32
    }
}

/// Output of one estimation cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PitchEstimate {
    /// Per-semitone evidence in `[0, 1]`, one entry per semitone of the range
    pub components: Vec<f64>,
    /// True only at the chosen fundamental's semitone
    pub is_fundamental: Vec<bool>,
    pub fundamental: Option<Fundamental>,
}

impl PitchEstimate {
    pub fn with_size(count: usize) -> Self {
        Self {
            components: vec![0.0; count],
            is_fundamental: vec![false; count],
            fundamental: None,
        }
    }

    /// Clear the previous result and size the curves to `count` semitones.
    pub fn reset(&mut self, count: usize) {
        self.components.clear();
        self.components.resize(count, 0.0);
        self.is_fundamental.clear();
        self.is_fundamental.resize(count, false);
        self.fundamental = None;
    }

    pub fn has_note(&self) -> bool {
        self.fundamental.is_some()
    }

    /// Record a fundamental found at period `wave_length` (in samples).
    pub(crate) fn set_from_wave_length(&mut self, settings: &Settings, wave_length: f64) {
        let Some(rate) = settings.analysis_rate() else {
            return;
        };
        if wave_length <= 0.0 {
            return;
        }
        let semitone = frequency_to_semitone_f(rate as f64 / wave_length, settings.tuning_frequency);
        self.set_fundamental(settings, semitone, wave_length);
    }

    pub(crate) fn set_fundamental(&mut self, settings: &Settings, semitone: f64, wave_length: f64) {
        self.fundamental = Some(Fundamental {
            semitone,
            wave_length,
        });
        if let Some(index) = settings.semitone_index(semitone.round() as i32) {
            self.is_fundamental[index] = true;
        }
    }
}

/// Capability shared by every estimator.
pub trait PitchEstimator {
    /// Recompute the estimate from a newest-first window.
    fn apply(&mut self, window: &[f32]);

    fn estimate(&self) -> &PitchEstimate;

    /// Samples of history needed for a full analysis.
    fn sample_latency(&self) -> usize;

    fn settings(&self) -> &Settings;

    fn has_note_recognized(&self) -> bool {
        self.estimate().has_note()
    }

    fn fundamental_semitone(&self) -> Option<f64> {
        self.estimate().fundamental.map(|f| f.semitone)
    }

    fn fundamental_wave_length(&self) -> Option<f64> {
        self.estimate().fundamental.map(|f| f.wave_length)
    }

    /// Latency in milliseconds, 0 while the sampling rate is unknown.
    fn latency_ms(&self) -> f64 {
        match self.settings().analysis_rate() {
            Some(rate) => 1000.0 * self.sample_latency() as f64 / rate as f64,
            None => 0.0,
        }
    }
}

/// Active estimator, one of a closed set of strategies.
pub enum Estimator {
    Autocorrelation(AutocorrelationEstimator),
    MultiCorrelation(MultiCorrelationEstimator),
    Bubble(BubbleEstimator),
}

impl Estimator {
    pub fn new(kind: EstimatorKind, config: &EstimatorConfig, settings: Settings) -> Self {
        match kind {
            EstimatorKind::Autocorrelation => Estimator::Autocorrelation(
                AutocorrelationEstimator::new(config.volume_threshold, &config.autocorrelation, settings),
            ),
            EstimatorKind::MultiCorrelation => {
                Estimator::MultiCorrelation(MultiCorrelationEstimator::new(
                    config.volume_threshold,
                    &config.multi_correlation,
                    settings,
                ))
            }
            EstimatorKind::Bubble => Estimator::Bubble(BubbleEstimator::new(
                config.volume_threshold,
                &config.bubble,
                settings,
            )),
        }
    }

    pub fn kind(&self) -> EstimatorKind {
        match self {
            Estimator::Autocorrelation(_) => EstimatorKind::Autocorrelation,
            Estimator::MultiCorrelation(_) => EstimatorKind::MultiCorrelation,
            Estimator::Bubble(_) => EstimatorKind::Bubble,
        }
    }

    fn inner(&self) -> &dyn PitchEstimator {
        match self {
            Estimator::Autocorrelation(e) => e,
            Estimator::MultiCorrelation(e) => e,
            Estimator::Bubble(e) => e,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn PitchEstimator {
        match self {
            Estimator::Autocorrelation(e) => e,
            Estimator::MultiCorrelation(e) => e,
            Estimator::Bubble(e) => e,
        }
    }
}

impl PitchEstimator for Estimator {
    fn apply(&mut self, window: &[f32]) {
        self.inner_mut().apply(window)
    }

    fn estimate(&self) -> &PitchEstimate {
        self.inner().estimate()
    }

    fn sample_latency(&self) -> usize {
        self.inner().sample_latency()
    }

    fn settings(&self) -> &Settings {
        self.inner().settings()
    }
}

impl SettingsListener for Estimator {
    fn settings_changed(&mut self, change: SettingsChange, settings: &Settings) {
        tracing::debug!("[Estimator] {} reconfigured after {:?}", self.kind(), change);
        match self {
            Estimator::Autocorrelation(e) => e.configure(*settings),
            Estimator::MultiCorrelation(e) => e.configure(*settings),
            Estimator::Bubble(e) => e.configure(*settings),
        }
    }
}

/// Largest absolute value among the first `len` samples.
pub(crate) fn peak_amplitude(window: &[f32], len: usize) -> f32 {
    window
        .iter()
        .take(len)
        .fold(0.0_f32, |acc, s| acc.max(s.abs()))
}
