//! Hardware output (and optional capture) through cpal

use std::collections::VecDeque;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, HostId, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use mixdown_core::{Interpolation, SurroundBuffer};
use tracing::{debug, error, info, warn};

use super::{AudioDevice, DeviceCandidate, DeviceError, DeviceRequest, PeriodSource};
use crate::resampler::SampleRateConverter;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// One candidate per cpal host compiled in, default host first
pub fn default_candidates() -> Vec<DeviceCandidate> {
    let default_id = cpal::default_host().id();
    let mut ids = cpal::available_hosts();
    ids.sort_by_key(|id| *id != default_id);

    ids.into_iter()
        .map(|id| {
            DeviceCandidate::new(id.name(), move |request: &DeviceRequest| {
                CpalDevice::open(id, request).map(|d| Box::new(d) as Box<dyn AudioDevice>)
            })
        })
        .collect()
}

/// Maps mixer periods onto the device's channel count and sample rate,
/// splitting them into whatever callback sizes the device asks for.
pub struct PeriodAdapter {
    source_channels: usize,
    device_channels: usize,
    converter: Option<SampleRateConverter>,
    scratch: Vec<f32>,
    pending: VecDeque<f32>,
}

impl PeriodAdapter {
    pub fn new(source_channels: usize, device_channels: usize, converter: Option<SampleRateConverter>) -> Self {
        Self {
            source_channels: source_channels.max(1),
            device_channels: device_channels.max(1),
            converter,
            scratch: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn pending_frames(&self) -> usize {
        self.pending.len() / self.device_channels
    }

    fn push_mapped(&mut self, samples: &[f32]) {
        for frame in samples.chunks_exact(self.source_channels) {
            for channel in 0..self.device_channels {
                self.pending.push_back(frame[channel % self.source_channels]);
            }
        }
    }

    /// Fill `out` (interleaved device frames), pulling periods as needed
    pub fn fill<F>(&mut self, out: &mut [f32], mut pull: F)
    where
        F: FnMut() -> SurroundBuffer,
    {
        while self.pending.len() < out.len() {
            let period = pull();
            if period.is_empty() {
                break;
            }
            match self.converter.as_mut() {
                Some(conv) => {
                    let ready = match conv.process(period.as_slice()) {
                        Ok(ready) => ready,
                        Err(e) => {
                            warn!(error = %e, "Output conversion failed");
                            break;
                        }
                    };
                    let mut scratch = std::mem::take(&mut self.scratch);
                    scratch.resize(ready * self.source_channels, 0.0);
                    let frames = conv.read_frames(&mut scratch);
                    self.push_mapped(&scratch[..frames * self.source_channels]);
                    self.scratch = scratch;
                }
                None => self.push_mapped(period.as_slice()),
            }
        }

        let available = self.pending.len().min(out.len());
        for (dst, src) in out.iter_mut().zip(self.pending.drain(..available)) {
            *dst = src;
        }
        out[available..].fill(0.0);
    }
}

/// Downmix or widen captured frames to interleaved stereo
fn capture_to_stereo(data: &[f32], channels: usize) -> Vec<f32> {
    let channels = channels.max(1);
    data.chunks_exact(channels)
        .flat_map(|frame| [frame[0], frame[1 % channels]])
        .collect()
}

#[derive(Debug, Clone)]
struct CaptureConfig {
    config: StreamConfig,
    format: SampleFormat,
}

/// Default output device of one cpal host
pub struct CpalDevice {
    host_id: HostId,
    name: String,
    config: StreamConfig,
    format: SampleFormat,
    capture: Option<CaptureConfig>,
    interpolation: Interpolation,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalDevice {
    pub fn open(host_id: HostId, request: &DeviceRequest) -> Result<Self, DeviceError> {
        let host = cpal::host_from_id(host_id).map_err(|e| DeviceError::HostUnavailable(e.to_string()))?;
        let device = host.default_output_device().ok_or(DeviceError::NoDevices)?;
        let supported = device
            .default_output_config()
            .map_err(|e| DeviceError::ConfigError(e.to_string()))?;

        let config: StreamConfig = supported.clone().into();

        let capture = host.default_input_device().and_then(|input| {
            let supported = input.default_input_config().ok()?;
            Some(CaptureConfig { format: supported.sample_format(), config: supported.into() })
        });

        let name = format!("{} ({})", host_id.name(), device.name().unwrap_or_default());
        info!(
            device = %name,
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            requested_rate = request.sample_rate,
            capture = capture.is_some(),
            "Opened audio output device"
        );

        Ok(Self {
            host_id,
            name,
            format: supported.sample_format(),
            config,
            capture,
            interpolation: request.quality.interpolation,
            stop_tx: None,
            thread: None,
        })
    }

    fn build_output<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut adapter: PeriodAdapter,
        source: PeriodSource,
    ) -> Result<cpal::Stream, DeviceError>
    where
        T: SizedSample + FromSample<f32> + Send + 'static,
    {
        let mut scratch: Vec<f32> = Vec::new();
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    adapter.fill(&mut scratch, || source.next_buffer());
                    for (out, sample) in data.iter_mut().zip(&scratch) {
                        *out = T::from_sample_(*sample);
                    }
                },
                |err| error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| DeviceError::StreamError(e.to_string()))
    }

    fn build_input<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        source: PeriodSource,
    ) -> Result<cpal::Stream, DeviceError>
    where
        T: SizedSample + Send + 'static,
        f32: FromSample<T>,
    {
        let channels = config.channels as usize;
        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    let samples: Vec<f32> = data.iter().map(|s| f32::from_sample_(*s)).collect();
                    source.push_input_frames(&capture_to_stereo(&samples, channels));
                },
                |err| error!("Input stream error: {}", err),
                None,
            )
            .map_err(|e| DeviceError::StreamError(e.to_string()))
    }

    fn output_stream(
        device: &cpal::Device,
        config: &StreamConfig,
        format: SampleFormat,
        adapter: PeriodAdapter,
        source: PeriodSource,
    ) -> Result<cpal::Stream, DeviceError> {
        match format {
            SampleFormat::F32 => Self::build_output::<f32>(device, config, adapter, source),
            SampleFormat::I16 => Self::build_output::<i16>(device, config, adapter, source),
            SampleFormat::U16 => Self::build_output::<u16>(device, config, adapter, source),
            SampleFormat::I32 => Self::build_output::<i32>(device, config, adapter, source),
            format => Err(DeviceError::ConfigError(format!("Unsupported format: {:?}", format))),
        }
    }

    fn input_stream(
        device: &cpal::Device,
        capture: &CaptureConfig,
        source: PeriodSource,
    ) -> Result<cpal::Stream, DeviceError> {
        match capture.format {
            SampleFormat::F32 => Self::build_input::<f32>(device, &capture.config, source),
            SampleFormat::I16 => Self::build_input::<i16>(device, &capture.config, source),
            SampleFormat::I32 => Self::build_input::<i32>(device, &capture.config, source),
            format => Err(DeviceError::ConfigError(format!("Unsupported format: {:?}", format))),
        }
    }

    /// Build and play the streams; runs on the device thread, which owns them
    fn run_streams(
        host_id: HostId,
        config: &StreamConfig,
        format: SampleFormat,
        capture: Option<&CaptureConfig>,
        adapter: PeriodAdapter,
        source: PeriodSource,
    ) -> Result<Vec<cpal::Stream>, DeviceError> {
        let host = cpal::host_from_id(host_id).map_err(|e| DeviceError::HostUnavailable(e.to_string()))?;
        let device = host.default_output_device().ok_or(DeviceError::NoDevices)?;
        let mut streams = vec![Self::output_stream(&device, config, format, adapter, source.clone())?];

        if let Some(capture) = capture {
            let input = host.default_input_device().ok_or(DeviceError::NoDevices)?;
            source
                .set_input_sample_rate(capture.config.sample_rate.0)
                .map_err(|e| DeviceError::ConfigError(e.to_string()))?;
            match Self::input_stream(&input, capture, source) {
                Ok(stream) => streams.push(stream),
                Err(e) => warn!(error = %e, "Capture unavailable, continuing output only"),
            }
        }

        for stream in &streams {
            stream.play().map_err(|e| DeviceError::StreamError(e.to_string()))?;
        }
        Ok(streams)
    }
}

impl AudioDevice for CpalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn channels(&self) -> usize {
        self.config.channels as usize
    }

    fn supports_capture(&self) -> bool {
        self.capture.is_some()
    }

    fn start(&mut self, source: PeriodSource) -> Result<(), DeviceError> {
        if self.thread.is_some() {
            return Err(DeviceError::AlreadyStarted);
        }

        let converter = if source.sample_rate() == self.sample_rate() {
            None
        } else {
            Some(
                SampleRateConverter::new(
                    source.sample_rate(),
                    self.sample_rate(),
                    source.channels(),
                    self.interpolation,
                    source.frames_per_period(),
                )
                .map_err(|e| DeviceError::ConfigError(e.to_string()))?,
            )
        };
        let adapter = PeriodAdapter::new(source.channels(), self.channels(), converter);

        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let host_id = self.host_id;
        let config = self.config.clone();
        let format = self.format;
        let capture = self.capture.clone();

        let handle = thread::Builder::new()
            .name("mixdown-cpal-device".into())
            .spawn(move || {
                match Self::run_streams(host_id, &config, format, capture.as_ref(), adapter, source) {
                    Ok(streams) => {
                        let _ = ready_tx.send(Ok(()));
                        let _ = stop_rx.recv();
                        drop(streams);
                        debug!("cpal streams closed");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })?;

        let started = ready_rx
            .recv_timeout(STARTUP_TIMEOUT)
            .unwrap_or_else(|_| Err(DeviceError::StreamError("device thread did not start".into())));
        if let Err(e) = started {
            let _ = stop_tx.send(());
            let _ = handle.join();
            return Err(e);
        }

        self.stop_tx = Some(stop_tx);
        self.thread = Some(handle);
        info!(device = %self.name, "Audio output started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
            info!(device = %self.name, "Audio output stopped");
        }
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(value: f32, frames: usize, channels: usize) -> SurroundBuffer {
        SurroundBuffer::from_interleaved(vec![value; frames * channels], channels).unwrap()
    }

    #[test]
    fn test_adapter_splits_periods() {
        let mut adapter = PeriodAdapter::new(2, 2, None);
        let mut pulls = 0;
        let mut out = vec![0.0; 6 * 2];
        adapter.fill(&mut out, || {
            pulls += 1;
            period(pulls as f32, 4, 2)
        });
        assert_eq!(pulls, 2);
        assert_eq!(&out[..8], &[1.0; 8]);
        assert_eq!(&out[8..], &[2.0; 4]);
        assert_eq!(adapter.pending_frames(), 2);
    }

    #[test]
    fn test_adapter_maps_channels() {
        let mut adapter = PeriodAdapter::new(2, 4, None);
        let stereo = SurroundBuffer::from_interleaved(vec![0.1, 0.2], 2).unwrap();
        let mut out = vec![0.0; 4];
        adapter.fill(&mut out, || stereo.clone());
        assert_eq!(out, vec![0.1, 0.2, 0.1, 0.2]);

        let mut mono = PeriodAdapter::new(2, 1, None);
        let mut out = vec![0.0; 1];
        mono.fill(&mut out, || stereo.clone());
        assert_eq!(out, vec![0.1]);
    }

    #[test]
    fn test_adapter_converts_rate() {
        let conv = SampleRateConverter::new(44100, 88200, 2, Interpolation::Linear, 64).unwrap();
        let mut adapter = PeriodAdapter::new(2, 2, Some(conv));
        let mut pulls = 0;
        let mut out = vec![0.0; 512 * 2];
        adapter.fill(&mut out, || {
            pulls += 1;
            period(0.5, 64, 2)
        });
        // Twice the frames per pulled period, give or take filter delay
        assert!((4..=6).contains(&pulls), "pulled {pulls}");
    }

    #[test]
    fn test_empty_period_fills_silence() {
        let mut adapter = PeriodAdapter::new(2, 2, None);
        let mut out = vec![1.0; 4];
        adapter.fill(&mut out, || SurroundBuffer::new(0, 2));
        assert_eq!(out, vec![0.0; 4]);
    }

    #[test]
    fn test_capture_to_stereo() {
        assert_eq!(capture_to_stereo(&[0.1, 0.2], 1), vec![0.1, 0.1, 0.2, 0.2]);
        assert_eq!(capture_to_stereo(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 3), vec![0.1, 0.2, 0.4, 0.5]);
    }
}
