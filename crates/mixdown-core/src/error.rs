//! Error types for mixdown

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MixdownError {
    #[error("Invalid frames per period: {0}")]
    InvalidPeriod(usize),
    #[error("Unsupported channel count: {0} (expected 1..={max})", max = crate::MAX_CHANNELS)]
    InvalidChannels(usize),
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),
    #[error("Buffer size mismatch: expected {expected} samples, got {actual}")]
    BufferSize { expected: usize, actual: usize },
    #[error("Unknown quality preset: {0}")]
    UnknownPreset(String),
}

pub type Result<T> = std::result::Result<T, MixdownError>;
