//! mixdown-engine: play handles, render pipeline, and audio device backends

pub mod audio_port;
mod buffer_pool;
pub mod device;
pub mod fifo;
mod input;
pub mod meter;
pub mod midi;
pub mod mixer;
pub mod play_handle;
pub mod resampler;
mod worker_pool;

pub use audio_port::AudioPort;
pub use device::{
    default_candidates, AudioDevice, CpalDevice, DeviceCandidate, DeviceError, DeviceRequest, NullDevice,
    PeriodAdapter, PeriodSource, WavFileDevice,
};
pub use fifo::{FifoBuffer, FifoWriter};
pub use meter::{LoadMonitor, PeakMeter, CRITICAL_LOAD, CRITICAL_PERIODS};
pub use midi::{DummyMidiClient, MidiCandidate, MidiClient};
pub use mixer::{Mixer, MixerError, MixerEvent, MixerGuard};
pub use play_handle::{
    Instrument, InstrumentTrackHandle, NotePlayHandle, PlayHandle, PlayHandleId, PlayHandleKind, RenderContext,
    SampleLoadError, SamplePlayHandle, Waveform,
};
pub use resampler::{ConverterError, SampleRateConverter};
