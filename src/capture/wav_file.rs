//! File-backed transport: streams a WAV file as if it were a live input.
//!
//! The file named by the `source` option is decoded with hound, mixed down
//! to mono and delivered in fixed-size packets paced to real time. Capture
//! ends by itself when the file is exhausted.

use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::CaptureError;

use super::transport::{CaptureTransport, SamplingRate, TransportOptions};
use super::CaptureContext;

const PACKET_SIZE: usize = 1024;

pub struct WavFileTransport {
    options: TransportOptions,
    samples: Vec<f32>,
    sample_rate: u32,
    paced: bool,
}

impl WavFileTransport {
    pub fn new() -> Self {
        Self {
            options: TransportOptions::default(),
            samples: Vec::new(),
            sample_rate: 0,
            paced: true,
        }
    }

    pub fn with_path(path: impl AsRef<Path>) -> Self {
        let mut transport = Self::new();
        transport.options.source = path.as_ref().display().to_string();
        transport
    }

    /// Deliver as fast as the consumer drains instead of in real time.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

impl Default for WavFileTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureTransport for WavFileTransport {
    fn name(&self) -> &str {
        "WAVFILE"
    }

    fn description(&self) -> &str {
        "WAV file played back at its own sampling rate"
    }

    fn probe(&mut self) -> Result<(), CaptureError> {
        if self.options.source.is_empty() {
            return Err(CaptureError::InvalidSource {
                source: String::new(),
                reason: "no file selected".to_string(),
            });
        }
        hound::WavReader::open(&self.options.source)
            .map(|_| ())
            .map_err(|err| CaptureError::InvalidSource {
                source: self.options.source.clone(),
                reason: err.to_string(),
            })
    }

    fn options(&self) -> &TransportOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut TransportOptions {
        &mut self.options
    }

    fn set_sampling_rate(&mut self, rate: SamplingRate) -> Result<(), CaptureError> {
        match rate {
            SamplingRate::Unknown => {
                self.options.sampling_rate = rate;
                Ok(())
            }
            SamplingRate::Hz(hz) if hz == self.sample_rate => {
                self.options.sampling_rate = rate;
                Ok(())
            }
            _ => Err(CaptureError::Unsupported {
                transport: self.name().to_string(),
                operation: "resampling (the file dictates the rate)".to_string(),
            }),
        }
    }

    fn capture_init(&mut self) -> Result<(), CaptureError> {
        let (samples, sample_rate) = read_wav(Path::new(&self.options.source))?;
        tracing::info!(
            "[Capture] loaded {} ({} samples @ {} Hz)",
            self.options.source,
            samples.len(),
            sample_rate
        );
        self.samples = samples;
        self.sample_rate = sample_rate;
        Ok(())
    }

    fn capture_loop(&mut self, ctx: &CaptureContext<'_>) -> Result<(), CaptureError> {
        if self.sample_rate == 0 {
            return Err(CaptureError::InvalidFormat {
                details: "file reports a zero sampling rate".to_string(),
            });
        }
        ctx.report_sampling_rate(self.sample_rate);

        let started = Instant::now();
        let mut sent = 0usize;
        for packet in self.samples.chunks(PACKET_SIZE) {
            if !ctx.should_continue() {
                break;
            }
            ctx.deliver(packet)?;
            sent += packet.len();

            if self.paced {
                let due = Duration::from_secs_f64(sent as f64 / self.sample_rate as f64);
                if let Some(wait) = due.checked_sub(started.elapsed()) {
                    std::thread::sleep(wait);
                }
            }
        }
        Ok(())
    }

    fn capture_finished(&mut self) {
        self.samples = Vec::new();
    }
}

/// Decode a WAV file to mono f32 samples in [-1, 1].
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, u32), CaptureError> {
    let invalid = |reason: String| CaptureError::InvalidSource {
        source: path.display().to_string(),
        reason,
    };

    let mut reader = hound::WavReader::open(path).map_err(|err| invalid(err.to_string()))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(invalid("zero channels".to_string()));
    }

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<f32>, _>>()
            .map_err(|err| invalid(err.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = match spec.bits_per_sample {
                8 | 16 | 24 | 32 => (1u64 << (spec.bits_per_sample - 1)) as f32,
                bits => {
                    return Err(CaptureError::InvalidFormat {
                        details: format!("{} bits per sample", bits),
                    })
                }
            };
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|v| v as f32 / scale))
                .collect::<Result<Vec<f32>, _>>()
                .map_err(|err| invalid(err.to_string()))?
        }
    };

    let channels = spec.channels as usize;
    if channels == 1 {
        return Ok((samples, spec.sample_rate));
    }

    let mono = samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureThread, SampleQueue};
    use crate::config::CaptureConfig;
    use std::sync::Arc;

    fn write_tone(path: &Path, channels: u16, sample_rate: u32, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let value = if i % 2 == 0 { 16384 } else { -16384 };
            for _ in 0..channels {
                writer.write_sample(value as i16).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("pitch_recognizer_{}_{}.wav", name, std::process::id()))
    }

    #[test]
    fn test_read_wav_normalizes_and_mixes_down() {
        let path = temp_path("stereo");
        write_tone(&path, 2, 8000, 10);

        let (samples, rate) = read_wav(&path).unwrap();
        assert_eq!(rate, 8000);
        assert_eq!(samples.len(), 10);
        assert!((samples[0] - 0.5).abs() < 1e-6);
        assert!((samples[1] + 0.5).abs() < 1e-6);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_probe_requires_a_readable_file() {
        let mut transport = WavFileTransport::new();
        assert!(matches!(
            transport.probe(),
            Err(CaptureError::InvalidSource { .. })
        ));

        let mut missing = WavFileTransport::with_path("/nonexistent/file.wav");
        assert!(missing.probe().is_err());

        let path = temp_path("probe");
        write_tone(&path, 1, 8000, 4);
        let mut present = WavFileTransport::with_path(&path);
        assert!(present.probe().is_ok());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_configured_source_reaches_default_transport() {
        let path = temp_path("configured");
        write_tone(&path, 1, 8000, 4);
        let config = CaptureConfig {
            source: path.display().to_string(),
            enable_synthetic: false,
            ..CaptureConfig::default()
        };

        let capture = CaptureThread::with_default_transports(Arc::new(SampleQueue::new()), &config);
        capture.select_transport("WAVFILE").unwrap();
        assert_eq!(capture.current_options().unwrap().source, config.source);

        let mut transport = WavFileTransport::with_path(&config.source);
        assert!(transport.probe().is_ok());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_rate_is_dictated_by_file() {
        let mut transport = WavFileTransport::new();
        assert!(transport.set_sampling_rate(SamplingRate::Max).is_err());
        assert!(transport.set_sampling_rate(SamplingRate::Unknown).is_ok());
    }
}
