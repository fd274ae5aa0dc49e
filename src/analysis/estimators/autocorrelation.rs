// Autocorrelation estimator
//
// Computes the autocorrelation of the window through an FFT (Wiener-Khinchin:
// inverse transform of the power spectrum, zero padded to avoid circular
// wrap), normalizes it into the square difference function 2r'/m' and looks
// for periodicity in the lag range spanned by the semitone bounds. The
// normalized curve reaches 1 at the exact period of a periodic signal.
//
// The first local maximum reaching `key_maximum_ratio` of the strongest
// one wins, which favours the fundamental over its sub-octaves. The chosen lag
// is refined with parabolic interpolation.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::config::AutocorrelationConfig;
use crate::music::semitone_to_frequency;
use crate::settings::Settings;

use super::{peak_amplitude, PitchEstimate, PitchEstimator};

pub struct AutocorrelationEstimator {
    settings: Settings,
    volume_threshold: f32,
    noise_threshold: f32,
    key_maximum_ratio: f32,
    /// Shortest lag considered, in samples
    min_length: usize,
    /// Longest lag considered, in samples
    max_length: usize,
    fft_size: usize,
    forward: Option<Arc<dyn Fft<f32>>>,
    inverse: Option<Arc<dyn Fft<f32>>>,
    buffer: Vec<Complex<f32>>,
    acf: Vec<f32>,
    estimate: PitchEstimate,
}

impl AutocorrelationEstimator {
    pub fn new(volume_threshold: f32, config: &AutocorrelationConfig, settings: Settings) -> Self {
        let mut estimator = Self {
            settings,
            volume_threshold,
            noise_threshold: config.noise_threshold,
            key_maximum_ratio: config.key_maximum_ratio,
            min_length: 0,
            max_length: 0,
            fft_size: 0,
            forward: None,
            inverse: None,
            buffer: Vec::new(),
            acf: Vec::new(),
            estimate: PitchEstimate::default(),
        };
        estimator.configure(settings);
        estimator
    }

    /// Rebuild the lag range and FFT plans for new settings.
    pub fn configure(&mut self, settings: Settings) {
        self.settings = settings;
        self.estimate.reset(settings.semitone_count());

        let Some(rate) = settings.analysis_rate() else {
            self.min_length = 0;
            self.max_length = 0;
            self.forward = None;
            self.inverse = None;
            return;
        };

        let rate = rate as f64;
        let highest = semitone_to_frequency(settings.semitone_max as f64, settings.tuning_frequency);
        let lowest = semitone_to_frequency(settings.semitone_min as f64, settings.tuning_frequency);
        self.min_length = ((rate / highest).floor() as usize).max(2);
        self.max_length = ((rate / lowest).ceil() as usize).max(self.min_length + 2);

        self.fft_size = (2 * self.sample_latency()).next_power_of_two();
        let mut planner = FftPlanner::new();
        self.forward = Some(planner.plan_fft_forward(self.fft_size));
        self.inverse = Some(planner.plan_fft_inverse(self.fft_size));
        self.buffer = vec![Complex::new(0.0, 0.0); self.fft_size];
        self.acf = vec![0.0; self.max_length + 2];

        tracing::debug!(
            "[Estimator] autocorrelation lags [{}; {}], fft size {}",
            self.min_length,
            self.max_length,
            self.fft_size
        );
    }

    /// Fill `self.acf[0..=max_length+1]` with the normalized square
    /// difference function. Returns false on a flat window.
    fn compute_acf(&mut self, frame: &[f32]) -> bool {
        let (Some(forward), Some(inverse)) = (&self.forward, &self.inverse) else {
            return false;
        };

        let n = frame.len();
        for (slot, &sample) in self.buffer.iter_mut().zip(frame.iter()) {
            *slot = Complex::new(sample, 0.0);
        }
        for slot in self.buffer.iter_mut().skip(n) {
            *slot = Complex::new(0.0, 0.0);
        }

        forward.process(&mut self.buffer);
        for bin in self.buffer.iter_mut() {
            *bin = Complex::new(bin.norm_sqr(), 0.0);
        }
        inverse.process(&mut self.buffer);

        let energy: f64 = frame.iter().map(|&x| (x as f64) * (x as f64)).sum();
        if energy <= f64::EPSILON {
            return false;
        }
        // m'(lag): energy of both overlapping segments
        let mut m_prime = 2.0 * energy;
        for (lag, value) in self.acf.iter_mut().enumerate() {
            if lag > 0 {
                let head = frame[lag - 1] as f64;
                let tail = frame[n - lag] as f64;
                m_prime -= head * head + tail * tail;
            }
            *value = if m_prime > f64::EPSILON {
                (2.0 * self.buffer[lag].re as f64 / m_prime) as f32
            } else {
                0.0
            };
        }
        true
    }

    /// Lag with the first key maximum, refined to a fractional lag.
    fn pick_lag(&self) -> Option<f64> {
        let acf = &self.acf;
        let peaks: Vec<usize> = (self.min_length + 1..self.max_length)
            .filter(|&lag| {
                acf[lag] > self.noise_threshold && acf[lag] > acf[lag - 1] && acf[lag] >= acf[lag + 1]
            })
            .collect();

        let best = peaks.iter().map(|&lag| acf[lag]).fold(f32::MIN, f32::max);
        let lag = *peaks
            .iter()
            .find(|&&lag| acf[lag] >= self.key_maximum_ratio * best)?;

        let (a, b, c) = (acf[lag - 1] as f64, acf[lag] as f64, acf[lag + 1] as f64);
        let curvature = a - 2.0 * b + c;
        let delta = if curvature.abs() > f64::EPSILON {
            (0.5 * (a - c) / curvature).clamp(-0.5, 0.5)
        } else {
            0.0
        };
        Some(lag as f64 + delta)
    }

    fn fill_components(&mut self) {
        let Some(rate) = self.settings.analysis_rate() else {
            return;
        };
        let semitone_min = self.settings.semitone_min;
        for (index, component) in self.estimate.components.iter_mut().enumerate() {
            let frequency =
                semitone_to_frequency((semitone_min + index as i32) as f64, self.settings.tuning_frequency);
            let lag = ((rate as f64 / frequency).round() as usize).clamp(self.min_length, self.max_length);
            *component = self.acf[lag].clamp(0.0, 1.0) as f64;
        }
    }
}

impl PitchEstimator for AutocorrelationEstimator {
    fn apply(&mut self, window: &[f32]) {
        self.estimate.reset(self.settings.semitone_count());

        let latency = self.sample_latency();
        if latency == 0 || window.len() < latency {
            return;
        }
        if peak_amplitude(window, latency) <= self.volume_threshold {
            return;
        }
        if !self.compute_acf(&window[..latency]) {
            return;
        }

        self.fill_components();
        if let Some(wave_length) = self.pick_lag() {
            let settings = self.settings;
            self.estimate.set_from_wave_length(&settings, wave_length);
        }
    }

    fn estimate(&self) -> &PitchEstimate {
        &self.estimate
    }

    fn sample_latency(&self) -> usize {
        2 * self.max_length
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::estimators::tests::newest_first;
    use crate::capture::SyntheticSpec;

    fn estimator() -> AutocorrelationEstimator {
        AutocorrelationEstimator::new(
            0.01,
            &AutocorrelationConfig::default(),
            Settings {
                sampling_rate: Some(44_100),
                ..Settings::default()
            },
        )
    }

    #[test]
    fn test_lag_range_matches_bounds() {
        let estimator = estimator();
        // 7040 Hz and 27.5 Hz at 44.1 kHz
        assert_eq!(estimator.min_length, 6);
        assert_eq!(estimator.max_length, 1604);
        assert_eq!(estimator.sample_latency(), 3208);
    }

    #[test]
    fn test_fractional_period_is_refined() {
        let mut estimator = estimator();
        let window = newest_first(SyntheticSpec::sine(110.0, 0.5), 44_100, estimator.sample_latency());
        estimator.apply(&window);

        let wave_length = estimator.fundamental_wave_length().unwrap();
        assert!((wave_length - 44_100.0 / 110.0).abs() < 0.5, "wave length {}", wave_length);
        assert_eq!(estimator.estimate().fundamental.unwrap().nearest_semitone(), -24);
    }
}
