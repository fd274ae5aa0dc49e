//! Live capture through cpal
//!
//! One transport is registered per cpal host compiled for the platform
//! (ALSA, JACK, CoreAudio, WASAPI...). The driver callback copies the first
//! channel of each packet into a recycled buffer; the capture loop drains
//! those buffers into the sample queue.
//!
//! `cpal::Stream` is not `Send` on every platform, so the stream is created,
//! played and dropped inside `capture_loop` on the capture thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};

use crate::config::CaptureConfig;
use crate::error::CaptureError;

use super::buffer_pool::{BufferPool, CallbackChannels};
use super::transport::{CaptureTransport, SamplingRate, TransportOptions};
use super::CaptureContext;

/// Sleep between empty polls of the data queue
const IDLE_SLEEP: Duration = Duration::from_millis(1);

pub struct CpalTransport {
    host_id: cpal::HostId,
    name: String,
    description: String,
    options: TransportOptions,
    buffer_count: usize,
    buffer_size: usize,
}

impl CpalTransport {
    pub fn new(host_id: cpal::HostId, config: &CaptureConfig) -> Self {
        Self {
            host_id,
            name: host_id.name().to_uppercase(),
            description: format!("Live input through the {} host", host_id.name()),
            options: TransportOptions {
                sampling_rate: config.sampling_rate,
                port_name: config.port_name.clone(),
                source: config.source.clone(),
            },
            buffer_count: config.buffer_pool_size,
            buffer_size: config.buffer_size,
        }
    }

    /// One transport per host available on this platform.
    pub fn available(config: &CaptureConfig) -> Vec<Self> {
        cpal::available_hosts()
            .into_iter()
            .map(|host_id| Self::new(host_id, config))
            .collect()
    }

    fn open_device(&self) -> Result<cpal::Device, CaptureError> {
        let host = cpal::host_from_id(self.host_id).map_err(|err| {
            CaptureError::BackendUnavailable {
                backend: self.name.clone(),
                reason: err.to_string(),
            }
        })?;

        if self.options.source.is_empty() {
            return host
                .default_input_device()
                .ok_or_else(|| CaptureError::BackendUnavailable {
                    backend: self.name.clone(),
                    reason: "no default input device".to_string(),
                });
        }

        let devices = host
            .input_devices()
            .map_err(|err| CaptureError::BackendUnavailable {
                backend: self.name.clone(),
                reason: err.to_string(),
            })?;
        for device in devices {
            if device.name().is_ok_and(|name| name == self.options.source) {
                return Ok(device);
            }
        }
        Err(CaptureError::InvalidSource {
            source: self.options.source.clone(),
            reason: format!("no such input device on {}", self.name),
        })
    }

    fn choose_config(
        &self,
        device: &cpal::Device,
    ) -> Result<cpal::SupportedStreamConfig, CaptureError> {
        let unsupported = |details: String| CaptureError::InvalidFormat { details };

        match self.options.sampling_rate {
            SamplingRate::Unknown => device
                .default_input_config()
                .map_err(|err| unsupported(err.to_string())),
            SamplingRate::Max => device
                .supported_input_configs()
                .map_err(|err| unsupported(err.to_string()))?
                .max_by_key(|range| range.max_sample_rate().0)
                .map(|range| range.with_max_sample_rate())
                .ok_or_else(|| unsupported("device reports no input configuration".to_string())),
            SamplingRate::Hz(rate) => {
                let ranges: Vec<_> = device
                    .supported_input_configs()
                    .map_err(|err| unsupported(err.to_string()))?
                    .filter(|range| {
                        range.min_sample_rate().0 <= rate && rate <= range.max_sample_rate().0
                    })
                    .collect();
                ranges
                    .iter()
                    .find(|range| range.sample_format() == cpal::SampleFormat::F32)
                    .or_else(|| ranges.first())
                    .cloned()
                    .map(|range| range.with_sample_rate(cpal::SampleRate(rate)))
                    .ok_or_else(|| unsupported(format!("{} Hz is not supported", rate)))
            }
        }
    }
}

impl CaptureTransport for CpalTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn probe(&mut self) -> Result<(), CaptureError> {
        let device = self.open_device()?;
        self.choose_config(&device).map(|_| ())
    }

    fn options(&self) -> &TransportOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut TransportOptions {
        &mut self.options
    }

    fn capture_init(&mut self) -> Result<(), CaptureError> {
        self.probe()
    }

    fn capture_loop(&mut self, ctx: &CaptureContext<'_>) -> Result<(), CaptureError> {
        let device = self.open_device()?;
        let supported = self.choose_config(&device)?;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.config();
        ctx.report_sampling_rate(config.sample_rate.0);

        let (callback, mut packets) = BufferPool::new(self.buffer_count, self.buffer_size);
        let failure = Arc::new(Mutex::new(None));
        let dropped = Arc::new(AtomicU64::new(0));

        let stream = match format {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &config, callback, &failure, &dropped)
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, callback, &failure, &dropped)
            }
            cpal::SampleFormat::I32 => {
                build_stream::<i32>(&device, &config, callback, &failure, &dropped)
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16>(&device, &config, callback, &failure, &dropped)
            }
            other => Err(CaptureError::InvalidFormat {
                details: format!("{:?}", other),
            }),
        }?;

        stream.play().map_err(|err| CaptureError::StreamFailure {
            reason: format!("play failed: {}", err),
        })?;
        tracing::info!(
            "[Capture] {} streaming {} ch @ {} Hz ({:?})",
            self.name,
            config.channels,
            config.sample_rate.0,
            format
        );

        while ctx.should_continue() {
            if let Some(reason) = failure.lock().ok().and_then(|mut slot| slot.take()) {
                return Err(CaptureError::StreamFailure { reason });
            }

            let mut delivered = false;
            while let Some(result) = packets.with_next_packet(|packet| ctx.deliver(packet)) {
                result?;
                delivered = true;
            }
            if !delivered {
                std::thread::sleep(IDLE_SLEEP);
            }
        }

        drop(stream);
        let lost = dropped.load(Ordering::Relaxed);
        if lost > 0 {
            tracing::warn!("[Capture] {} dropped {} packets (pool exhausted)", self.name, lost);
        }
        Ok(())
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut callback: CallbackChannels,
    failure: &Arc<Mutex<Option<String>>>,
    dropped: &Arc<AtomicU64>,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let stride = config.channels.max(1) as usize;
    let failure = Arc::clone(failure);
    let dropped = Arc::clone(dropped);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !callback.push_packet(data, stride, f32::from_sample) {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            },
            move |err| {
                if let Ok(mut slot) = failure.lock() {
                    *slot = Some(err.to_string());
                }
            },
            None,
        )
        .map_err(|err| match err {
            cpal::BuildStreamError::DeviceNotAvailable => CaptureError::DeviceBusy {
                device: device.name().unwrap_or_else(|_| "input".to_string()),
            },
            cpal::BuildStreamError::StreamConfigNotSupported => CaptureError::InvalidFormat {
                details: format!("{:?}", config),
            },
            other => CaptureError::StreamFailure {
                reason: other.to_string(),
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_follow_capture_config() {
        let config = CaptureConfig {
            port_name: "mic".to_string(),
            source: "USB Audio".to_string(),
            ..CaptureConfig::default()
        };
        let transport = CpalTransport::new(cpal::default_host().id(), &config);
        assert_eq!(transport.options().source, "USB Audio");
        assert_eq!(transport.options().port_name, "mic");
    }
}
