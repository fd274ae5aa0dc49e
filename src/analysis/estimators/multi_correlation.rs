// Multi-correlation estimator
//
// One correlation filter per semitone compares the window with itself
// shifted by the semitone's period. A periodic signal of period P leaves
// near-zero error at P and at its multiples 2P, 3P, 4P, which sit 12, 19 and
// 24 semitones below the fundamental. A semitone is only accepted when all
// of those positions are local minima of the error curve, which rejects
// octave errors in both directions.

use crate::config::MultiCorrelationConfig;
use crate::music::period_in_samples;
use crate::settings::Settings;

use super::{peak_amplitude, PitchEstimate, PitchEstimator};

/// Semitone offsets (downwards) of the 2nd, 3rd and 4th multiples of a period.
const HARMONIC_OFFSETS: [isize; 3] = [12, 19, 24];

#[derive(Debug, Clone, Copy)]
struct CorrelationFilter {
    /// Hypothesized period in samples
    period: usize,
}

impl CorrelationFilter {
    /// Mean absolute difference between the window and itself shifted by
    /// one period, over `latency_factor` periods starting at `offset`.
    fn error(&self, window: &[f32], offset: usize, latency_factor: usize) -> f64 {
        let span = (latency_factor * self.period).max(1);
        let sum: f64 = window[offset..offset + span]
            .iter()
            .zip(&window[offset + self.period..offset + self.period + span])
            .map(|(a, b)| (a - b).abs() as f64)
            .sum();
        sum / span as f64
    }
}

pub struct MultiCorrelationEstimator {
    settings: Settings,
    volume_threshold: f32,
    latency_factor: usize,
    test_complexity: f32,
    components_threshold: f64,
    max_harmonic: usize,
    /// Indexed like the semitone range, lowest semitone (longest period) first
    filters: Vec<CorrelationFilter>,
    errors: Vec<f64>,
    estimate: PitchEstimate,
}

impl MultiCorrelationEstimator {
    pub fn new(volume_threshold: f32, config: &MultiCorrelationConfig, settings: Settings) -> Self {
        let mut estimator = Self {
            settings,
            volume_threshold,
            latency_factor: config.latency_factor.max(1),
            test_complexity: config.test_complexity.max(1.0),
            components_threshold: config.components_threshold,
            max_harmonic: config.max_harmonic,
            filters: Vec::new(),
            errors: Vec::new(),
            estimate: PitchEstimate::default(),
        };
        estimator.configure(settings);
        estimator
    }

    /// Rebuild one filter per semitone for new settings.
    pub fn configure(&mut self, settings: Settings) {
        self.settings = settings;
        let count = settings.semitone_count();
        self.estimate.reset(count);
        self.errors = vec![0.0; count];

        self.filters = match settings.analysis_rate() {
            Some(rate) => (settings.semitone_min..=settings.semitone_max)
                .map(|semitone| CorrelationFilter {
                    period: (period_in_samples(semitone, rate, settings.tuning_frequency).round()
                        as usize)
                        .max(1),
                })
                .collect(),
            None => Vec::new(),
        };

        if let Some(longest) = self.filters.first() {
            tracing::debug!(
                "[Estimator] multi-correlation over {} filters, longest period {}",
                self.filters.len(),
                longest.period
            );
        }
    }

    fn longest_period(&self) -> usize {
        self.filters.first().map(|f| f.period).unwrap_or(0)
    }

    /// Window length needed to evaluate every filter at every refinement offset.
    fn required_window(&self) -> usize {
        ((self.test_complexity as f64 + self.latency_factor as f64 + 1.0) * self.longest_period() as f64)
            .ceil() as usize
    }

    /// Strict local minimum; positions outside the range pass.
    fn is_minima(errors: &[f64], ih: isize) -> bool {
        let len = errors.len() as isize;
        if ih < 0 || ih >= len {
            return true;
        }
        let value = errors[ih as usize];
        let below = ih - 1;
        let above = ih + 1;
        if below >= 0 && errors[below as usize] <= value {
            return false;
        }
        if above < len && errors[above as usize] <= value {
            return false;
        }
        true
    }

    fn harmonics_are_minima(&self, ih: isize) -> bool {
        let errors = &self.errors;
        Self::is_minima(errors, ih)
            && Self::is_minima(errors, ih - 12)
            && (Self::is_minima(errors, ih - 19)
                || Self::is_minima(errors, ih - 18)
                || Self::is_minima(errors, ih - 20))
            && Self::is_minima(errors, ih - 24)
    }

    /// Headroom below the largest error at the fundamental and its multiples.
    fn harmonic_score(&self, ih: isize, max_error: f64) -> f64 {
        let mut sum = max_error - self.errors[ih as usize];
        for offset in HARMONIC_OFFSETS {
            let index = ih - offset;
            if index >= 0 {
                sum += max_error - self.errors[index as usize];
            }
        }
        sum
    }

    /// Re-check that `ih` stays a local minimum when the comparison starts
    /// at later offsets within one period.
    fn survives_refinement(&self, window: &[f32], ih: usize) -> bool {
        let period = self.filters[ih].period;
        let step = ((period as f32 / self.test_complexity) as usize).max(1);
        let lf = self.latency_factor;

        for offset in (step..period).step_by(step) {
            let center = self.filters[ih].error(window, offset, lf);
            let lower_ok = ih == 0 || self.filters[ih - 1].error(window, offset, lf) > center;
            let upper_ok =
                ih + 1 >= self.filters.len() || self.filters[ih + 1].error(window, offset, lf) > center;
            if !(lower_ok && upper_ok) {
                return false;
            }
        }
        true
    }
}

impl PitchEstimator for MultiCorrelationEstimator {
    fn apply(&mut self, window: &[f32]) {
        self.estimate.reset(self.settings.semitone_count());
        self.errors.iter_mut().for_each(|e| *e = 0.0);

        if self.filters.is_empty() || window.len() < self.required_window() {
            return;
        }
        if peak_amplitude(window, self.longest_period()) <= self.volume_threshold {
            return;
        }

        let lf = self.latency_factor;
        for (error, filter) in self.errors.iter_mut().zip(&self.filters) {
            *error = filter.error(window, 0, lf);
        }
        let max_error = self.errors.iter().copied().fold(0.0_f64, f64::max);
        if max_error <= f64::EPSILON {
            return;
        }
        for (component, error) in self.estimate.components.iter_mut().zip(&self.errors) {
            *component = 1.0 - error / max_error;
        }

        let mut best: Option<(usize, f64)> = None;
        for ih in (0..self.filters.len()).rev() {
            let signed = ih as isize;
            if !self.harmonics_are_minima(signed) {
                continue;
            }
            if self.errors[ih] / max_error > self.components_threshold {
                continue;
            }

            let score = self.harmonic_score(signed, max_error);
            let improves = best.map_or(true, |(_, best_score)| score > best_score);
            if improves && self.survives_refinement(window, ih) {
                best = Some((ih, score));
            }
        }

        if let (Some((ih, _)), Some(rate)) = (best, self.settings.analysis_rate()) {
            let settings = self.settings;
            let semitone = settings.semitone_min + ih as i32;
            let wave_length = period_in_samples(semitone, rate, settings.tuning_frequency);
            self.estimate.set_fundamental(&settings, semitone as f64, wave_length);
        }
    }

    fn estimate(&self) -> &PitchEstimate {
        &self.estimate
    }

    fn sample_latency(&self) -> usize {
        let longest = self.longest_period();
        ((self.max_harmonic + 1) * longest)
            .max((self.latency_factor + 1) * longest)
            .max(self.required_window())
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }
}
