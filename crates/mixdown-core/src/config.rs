//! Persisted engine settings

use serde::{Deserialize, Serialize};

use crate::buffer::{DEFAULT_CHANNELS, DEFAULT_FRAMES_PER_PERIOD, MAX_CHANNELS};
use crate::error::{MixdownError, Result};
use crate::quality::{QualityMode, QualitySettings};

pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
pub const DEFAULT_FIFO_DEPTH: usize = 4;
pub const DEFAULT_POOL_DEPTH: usize = 3;
pub const MIN_FRAMES_PER_PERIOD: usize = 32;
pub const MAX_FRAMES_PER_PERIOD: usize = 8192;
/// Highest base rate; oversampled by 8x it still fits a `u32`
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Quality as stored on disk: a preset name or explicit settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QualityConfig {
    Preset(QualityMode),
    Custom(QualitySettings),
}

impl QualityConfig {
    pub fn settings(&self) -> QualitySettings {
        match self {
            Self::Preset(mode) => QualitySettings::from_mode(*mode),
            Self::Custom(settings) => *settings,
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self::Preset(QualityMode::Draft)
    }
}

/// Engine configuration read from the settings store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub quality: QualityConfig,
    pub frames_per_period: usize,
    /// Master bus channel count (2 stereo, 4 surround)
    pub channels: usize,
    /// Base sample rate in Hz
    pub sample_rate: u32,
    /// Worker thread hint, 0 picks the hardware concurrency
    pub worker_threads: usize,
    /// Prebuffer periods on a writer thread
    pub fifo: bool,
    pub fifo_depth: usize,
    pub pool_depth: usize,
    /// Preferred audio backend name, tried before the others
    pub audio_backend: Option<String>,
    pub master_gain: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quality: QualityConfig::default(),
            frames_per_period: DEFAULT_FRAMES_PER_PERIOD,
            channels: DEFAULT_CHANNELS,
            sample_rate: DEFAULT_SAMPLE_RATE,
            worker_threads: 0,
            fifo: true,
            fifo_depth: DEFAULT_FIFO_DEPTH,
            pool_depth: DEFAULT_POOL_DEPTH,
            audio_backend: None,
            master_gain: 1.0,
        }
    }
}

impl EngineConfig {
    pub fn quality_settings(&self) -> QualitySettings {
        self.quality.settings()
    }

    /// Reject values the engine cannot allocate buffers for
    pub fn validate(&self) -> Result<()> {
        if !(MIN_FRAMES_PER_PERIOD..=MAX_FRAMES_PER_PERIOD).contains(&self.frames_per_period) {
            return Err(MixdownError::InvalidPeriod(self.frames_per_period));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(MixdownError::InvalidChannels(self.channels));
        }
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(MixdownError::InvalidSampleRate(self.sample_rate));
        }
        Ok(())
    }

    /// Worker count after resolving the automatic setting
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{Interpolation, Oversampling};

    #[test]
    fn test_defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_period_rejected() {
        let config = EngineConfig { frames_per_period: 8, ..Default::default() };
        assert!(matches!(config.validate(), Err(MixdownError::InvalidPeriod(8))));
    }

    #[test]
    fn test_invalid_channels_rejected() {
        let config = EngineConfig { channels: 6, ..Default::default() };
        assert!(matches!(config.validate(), Err(MixdownError::InvalidChannels(6))));
    }

    #[test]
    fn test_zero_sample_rate_rejected() {
        let config = EngineConfig { sample_rate: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(MixdownError::InvalidSampleRate(0))));
    }

    #[test]
    fn test_huge_sample_rate_rejected() {
        let config = EngineConfig {
            sample_rate: 600_000_000,
            quality: QualityConfig::Preset(QualityMode::FinalMix),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(MixdownError::InvalidSampleRate(600_000_000))));

        let highest = EngineConfig {
            sample_rate: MAX_SAMPLE_RATE,
            quality: QualityConfig::Preset(QualityMode::FinalMix),
            ..Default::default()
        };
        assert!(highest.validate().is_ok());
        let multiplier = highest.quality_settings().sample_rate_multiplier() as u32;
        let processing = highest.sample_rate.checked_mul(multiplier);
        assert!(processing.is_some());
    }

    #[test]
    fn test_quality_config_forms() {
        let preset: QualityConfig = serde_json::from_str("\"final-mix\"").unwrap();
        assert_eq!(preset.settings(), QualitySettings::final_mix());

        let custom = QualityConfig::Custom(QualitySettings::new(
            Interpolation::SincMedium,
            Oversampling::X4,
            true,
            false,
        ));
        let json = serde_json::to_string(&custom).unwrap();
        let back: QualityConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, custom);
    }

    #[test]
    fn test_explicit_worker_count() {
        let config = EngineConfig { worker_threads: 3, ..Default::default() };
        assert_eq!(config.resolved_worker_threads(), 3);
        assert!(EngineConfig::default().resolved_worker_threads() >= 1);
    }
}
