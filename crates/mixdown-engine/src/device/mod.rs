//! Audio device backends

mod cpal_device;
mod null;
mod wav_file;

pub use cpal_device::{default_candidates, CpalDevice, PeriodAdapter};
pub use null::NullDevice;
pub use wav_file::WavFileDevice;

use std::sync::Arc;

use mixdown_core::{QualitySettings, SurroundBuffer};
use thiserror::Error;

use crate::mixer::MixerCore;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("No audio devices found")]
    NoDevices,
    #[error("Audio host unavailable: {0}")]
    HostUnavailable(String),
    #[error("Failed to get device config: {0}")]
    ConfigError(String),
    #[error("Failed to build stream: {0}")]
    StreamError(String),
    #[error("Device already started")]
    AlreadyStarted,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// What the mixer asks of a device when opening it
#[derive(Debug, Clone, Copy)]
pub struct DeviceRequest {
    pub sample_rate: u32,
    pub channels: usize,
    pub frames_per_period: usize,
    pub quality: QualitySettings,
}

/// Pull side of the mixer handed to a running device
#[derive(Clone)]
pub struct PeriodSource {
    core: Arc<MixerCore>,
}

impl PeriodSource {
    pub(crate) fn new(core: Arc<MixerCore>) -> Self {
        Self { core }
    }

    /// Next period of `frames_per_period` frames, blocking while the FIFO is empty
    pub fn next_buffer(&self) -> SurroundBuffer {
        self.core.next_buffer()
    }

    /// Interleaved stereo frames captured at the input rate
    pub fn push_input_frames(&self, frames: &[f32]) {
        self.core.input.push(frames);
    }

    pub fn frames_per_period(&self) -> usize {
        self.core.params().frames_per_period
    }

    pub fn channels(&self) -> usize {
        self.core.params().channels
    }

    /// Rate of buffers returned by `next_buffer`
    pub fn sample_rate(&self) -> u32 {
        self.core.params().base_rate
    }

    pub fn quality(&self) -> QualitySettings {
        self.core.params().quality
    }

    /// Configure conversion of pushed input to the processing rate
    pub fn set_input_sample_rate(&self, rate: u32) -> Result<(), crate::resampler::ConverterError> {
        let params = self.core.params();
        self.core.input.configure(
            rate,
            params.processing_rate(),
            params.quality.interpolation,
            params.frames_per_period,
        )
    }
}

/// Output backend driven by the mixer.
///
/// `start` begins pulling periods from the source on the device's own thread
/// and returns immediately. `stop` must not return until no further
/// `next_buffer` calls can happen.
pub trait AudioDevice: Send {
    fn name(&self) -> &str;

    /// Output rate in Hz
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> usize;

    fn supports_capture(&self) -> bool {
        false
    }

    /// Paced by a hardware clock (offline renderers return false)
    fn is_realtime(&self) -> bool {
        true
    }

    fn start(&mut self, source: PeriodSource) -> Result<(), DeviceError>;

    fn stop(&mut self);
}

type OpenFn = dyn Fn(&DeviceRequest) -> Result<Box<dyn AudioDevice>, DeviceError> + Send + Sync;

/// Named factory tried by `Mixer::init_devices`
pub struct DeviceCandidate {
    name: String,
    open: Box<OpenFn>,
}

impl DeviceCandidate {
    pub fn new<F>(name: impl Into<String>, open: F) -> Self
    where
        F: Fn(&DeviceRequest) -> Result<Box<dyn AudioDevice>, DeviceError> + Send + Sync + 'static,
    {
        Self { name: name.into(), open: Box::new(open) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn open(&self, request: &DeviceRequest) -> Result<Box<dyn AudioDevice>, DeviceError> {
        (self.open)(request)
    }
}

impl std::fmt::Debug for DeviceCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCandidate").field("name", &self.name).finish()
    }
}
