//! Render quality settings

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MixdownError;

/// Named quality presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityMode {
    #[default]
    Draft,
    HighQuality,
    FinalMix,
}

impl fmt::Display for QualityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::HighQuality => "high-quality",
            Self::FinalMix => "final-mix",
        };
        f.write_str(name)
    }
}

impl FromStr for QualityMode {
    type Err = MixdownError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "high-quality" | "hq" => Ok(Self::HighQuality),
            "final-mix" | "final" => Ok(Self::FinalMix),
            other => Err(MixdownError::UnknownPreset(other.to_string())),
        }
    }
}

/// Resampling interpolation quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interpolation {
    #[default]
    Linear,
    SincFastest,
    SincMedium,
    SincBest,
}

impl Interpolation {
    pub fn is_sinc(self) -> bool {
        !matches!(self, Self::Linear)
    }
}

/// Internal oversampling factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Oversampling {
    #[default]
    None,
    #[serde(rename = "2x")]
    X2,
    #[serde(rename = "4x")]
    X4,
    #[serde(rename = "8x")]
    X8,
}

impl Oversampling {
    pub fn factor(self) -> usize {
        match self {
            Self::None => 1,
            Self::X2 => 2,
            Self::X4 => 4,
            Self::X8 => 8,
        }
    }
}

/// Quality settings, fixed for the lifetime of a processing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualitySettings {
    pub interpolation: Interpolation,
    pub oversampling: Oversampling,
    /// Evaluate controllers for every frame instead of once per period
    pub sample_exact_controllers: bool,
    /// Render oscillators band-limited
    pub alias_free_oscillators: bool,
}

impl QualitySettings {
    pub fn new(
        interpolation: Interpolation,
        oversampling: Oversampling,
        sample_exact_controllers: bool,
        alias_free_oscillators: bool,
    ) -> Self {
        Self {
            interpolation,
            oversampling,
            sample_exact_controllers,
            alias_free_oscillators,
        }
    }

    pub fn from_mode(mode: QualityMode) -> Self {
        match mode {
            QualityMode::Draft => Self::new(Interpolation::Linear, Oversampling::None, false, false),
            QualityMode::HighQuality => {
                Self::new(Interpolation::SincFastest, Oversampling::X2, true, false)
            }
            QualityMode::FinalMix => Self::new(Interpolation::SincBest, Oversampling::X8, true, true),
        }
    }

    pub fn draft() -> Self {
        Self::from_mode(QualityMode::Draft)
    }

    pub fn high_quality() -> Self {
        Self::from_mode(QualityMode::HighQuality)
    }

    pub fn final_mix() -> Self {
        Self::from_mode(QualityMode::FinalMix)
    }

    /// Processing rate = base rate * multiplier
    pub fn sample_rate_multiplier(&self) -> usize {
        self.oversampling.factor()
    }

    /// Preset these settings correspond to, if any
    pub fn mode(&self) -> Option<QualityMode> {
        [QualityMode::Draft, QualityMode::HighQuality, QualityMode::FinalMix]
            .into_iter()
            .find(|m| Self::from_mode(*m) == *self)
    }
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self::draft()
    }
}

impl From<QualityMode> for QualitySettings {
    fn from(mode: QualityMode) -> Self {
        Self::from_mode(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let draft = QualitySettings::draft();
        assert_eq!(draft.interpolation, Interpolation::Linear);
        assert_eq!(draft.sample_rate_multiplier(), 1);

        let hq = QualitySettings::high_quality();
        assert_eq!(hq.interpolation, Interpolation::SincFastest);
        assert_eq!(hq.sample_rate_multiplier(), 2);
        assert!(hq.sample_exact_controllers);
        assert!(!hq.alias_free_oscillators);

        let final_mix = QualitySettings::final_mix();
        assert_eq!(final_mix.interpolation, Interpolation::SincBest);
        assert_eq!(final_mix.sample_rate_multiplier(), 8);
        assert!(final_mix.alias_free_oscillators);
    }

    #[test]
    fn test_mode_lookup() {
        assert_eq!(QualitySettings::final_mix().mode(), Some(QualityMode::FinalMix));
        let custom = QualitySettings::new(Interpolation::SincMedium, Oversampling::X4, false, true);
        assert_eq!(custom.mode(), None);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("final-mix".parse::<QualityMode>().unwrap(), QualityMode::FinalMix);
        assert_eq!("HQ".parse::<QualityMode>().unwrap(), QualityMode::HighQuality);
        assert!("ultra".parse::<QualityMode>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&QualitySettings::high_quality()).unwrap();
        assert!(json.contains("\"sinc-fastest\""));
        assert!(json.contains("\"2x\""));
        let back: QualitySettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, QualitySettings::high_quality());
    }
}
