//! Synthetic signal transport
//!
//! Generates a tone, noise or silence in real time. Used for demos and
//! tests where no hardware is present; [`SignalGenerator`] is also usable on
//! its own to fill buffers offline.

use std::f64::consts::PI;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

use super::transport::{CaptureTransport, SamplingRate, TransportOptions};
use super::CaptureContext;

const DEFAULT_SAMPLE_RATE: u32 = 44_100;
const PACKET_SIZE: usize = 512;

/// Waveform emitted by the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntheticPattern {
    Sine,
    Square,
    WhiteNoise,
    Silence,
}

/// Description of a synthetic signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticSpec {
    pub pattern: SyntheticPattern,
    #[serde(default = "default_frequency_hz")]
    pub frequency_hz: f64,
    #[serde(default = "default_amplitude")]
    pub amplitude: f32,
    /// Relative amplitudes of harmonics 2, 3, ... added to a sine
    #[serde(default)]
    pub harmonics: Vec<f32>,
    /// Stop after this long; 0 runs until stopped
    #[serde(default)]
    pub duration_ms: u32,
}

fn default_frequency_hz() -> f64 {
    110.0
}

fn default_amplitude() -> f32 {
    0.5
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            pattern: SyntheticPattern::Sine,
            frequency_hz: default_frequency_hz(),
            amplitude: default_amplitude(),
            harmonics: Vec::new(),
            duration_ms: 0,
        }
    }
}

impl SyntheticSpec {
    pub fn sine(frequency_hz: f64, amplitude: f32) -> Self {
        Self {
            pattern: SyntheticPattern::Sine,
            frequency_hz,
            amplitude,
            ..Self::default()
        }
    }
}

/// Sample-by-sample generator for a [`SyntheticSpec`].
pub struct SignalGenerator {
    spec: SyntheticSpec,
    sample_rate: u32,
    frame: u64,
    rng: StdRng,
}

impl SignalGenerator {
    pub fn new(spec: SyntheticSpec, sample_rate: u32) -> Self {
        Self {
            spec,
            sample_rate: sample_rate.max(1),
            frame: 0,
            rng: StdRng::seed_from_u64(0x5A5A_FFF0),
        }
    }

    /// Frames left before `duration_ms` elapses, `None` when endless.
    pub fn remaining(&self) -> Option<u64> {
        if self.spec.duration_ms == 0 {
            return None;
        }
        let total = self.spec.duration_ms as u64 * self.sample_rate as u64 / 1000;
        Some(total.saturating_sub(self.frame))
    }

    pub fn next_sample(&mut self) -> f32 {
        let t = self.frame as f64 / self.sample_rate as f64;
        let phase = 2.0 * PI * self.spec.frequency_hz * t;
        self.frame += 1;

        let amplitude = self.spec.amplitude;
        match self.spec.pattern {
            SyntheticPattern::Sine => {
                let mut value = phase.sin();
                for (k, weight) in self.spec.harmonics.iter().enumerate() {
                    value += *weight as f64 * (phase * (k + 2) as f64).sin();
                }
                (value * amplitude as f64) as f32
            }
            SyntheticPattern::Square => {
                if phase.sin() >= 0.0 {
                    amplitude
                } else {
                    -amplitude
                }
            }
            SyntheticPattern::WhiteNoise => {
                if amplitude <= 0.0 {
                    0.0
                } else {
                    self.rng.gen_range(-amplitude..amplitude)
                }
            }
            SyntheticPattern::Silence => 0.0,
        }
    }

    pub fn fill(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.next_sample();
        }
    }

    /// Convenience: `count` freshly generated samples.
    pub fn take(&mut self, count: usize) -> Vec<f32> {
        let mut samples = vec![0.0; count];
        self.fill(&mut samples);
        samples
    }
}

/// Real-time transport backed by a [`SignalGenerator`].
pub struct SyntheticTransport {
    spec: SyntheticSpec,
    options: TransportOptions,
}

impl SyntheticTransport {
    pub fn new(spec: SyntheticSpec) -> Self {
        Self {
            spec,
            options: TransportOptions::default(),
        }
    }

    fn rate(&self) -> u32 {
        match self.options.sampling_rate {
            SamplingRate::Hz(rate) if rate > 0 => rate,
            _ => DEFAULT_SAMPLE_RATE,
        }
    }
}

impl CaptureTransport for SyntheticTransport {
    fn name(&self) -> &str {
        "SYNTH"
    }

    fn description(&self) -> &str {
        "Synthetic test signal"
    }

    fn probe(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn options(&self) -> &TransportOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut TransportOptions {
        &mut self.options
    }

    fn capture_init(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn capture_loop(&mut self, ctx: &CaptureContext<'_>) -> Result<(), CaptureError> {
        let rate = self.rate();
        ctx.report_sampling_rate(rate);

        let mut generator = SignalGenerator::new(self.spec.clone(), rate);
        let mut packet = vec![0.0_f32; PACKET_SIZE];
        let started = Instant::now();
        let mut sent = 0u64;

        while ctx.should_continue() {
            let len = match generator.remaining() {
                Some(0) => break,
                Some(left) => (left as usize).min(PACKET_SIZE),
                None => PACKET_SIZE,
            };
            generator.fill(&mut packet[..len]);
            ctx.deliver(&packet[..len])?;
            sent += len as u64;

            let due = Duration::from_secs_f64(sent as f64 / rate as f64);
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
        }
        Ok(())
    }
}
