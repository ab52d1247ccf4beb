//! mixdown-core: Domain types for the mixdown engine

pub mod buffer;
mod config;
mod error;
pub mod quality;
mod track;
mod volume;

pub use buffer::{
    clip, AudioBuffer, StereoBuffer, SurroundBuffer, DEFAULT_CHANNELS, DEFAULT_FRAMES_PER_PERIOD,
    MAX_CHANNELS, OUTPUT_SAMPLE_MULTIPLIER, STEREO_CHANNELS,
};
pub use config::{
    EngineConfig, QualityConfig, DEFAULT_FIFO_DEPTH, DEFAULT_POOL_DEPTH, DEFAULT_SAMPLE_RATE,
    MAX_FRAMES_PER_PERIOD, MAX_SAMPLE_RATE, MIN_FRAMES_PER_PERIOD,
};
pub use error::{MixdownError, Result};
pub use quality::{Interpolation, Oversampling, QualityMode, QualitySettings};
pub use track::{Track, TrackId, TrackRef, WeakTrack};
pub use volume::VolumeVector;
