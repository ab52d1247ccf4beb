//! Per-channel gain vectors

use serde::{Deserialize, Serialize};

use crate::buffer::MAX_CHANNELS;

/// Gain applied to each output channel when mixing a stereo source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeVector {
    pub gains: [f32; MAX_CHANNELS],
}

impl VolumeVector {
    pub const fn unity() -> Self {
        Self { gains: [1.0; MAX_CHANNELS] }
    }

    pub const fn silent() -> Self {
        Self { gains: [0.0; MAX_CHANNELS] }
    }

    pub const fn uniform(gain: f32) -> Self {
        Self { gains: [gain; MAX_CHANNELS] }
    }

    /// Volume and pan (-1.0 left .. 1.0 right), attenuating the opposite side.
    /// Even output channels count as left, odd ones as right.
    pub fn from_volume_pan(volume: f32, pan: f32) -> Self {
        let pan = pan.clamp(-1.0, 1.0);
        let mut left = volume;
        let mut right = volume;
        if pan > 0.0 {
            left *= 1.0 - pan;
        } else if pan < 0.0 {
            right *= 1.0 + pan;
        }
        let mut gains = [0.0; MAX_CHANNELS];
        for (ch, gain) in gains.iter_mut().enumerate() {
            *gain = if ch % 2 == 0 { left } else { right };
        }
        Self { gains }
    }

    pub fn gain(&self, channel: usize) -> f32 {
        self.gains.get(channel).copied().unwrap_or(0.0)
    }

    pub fn is_silent(&self) -> bool {
        self.gains.iter().all(|g| *g == 0.0)
    }

    /// Channel-wise product
    pub fn scaled(&self, other: &VolumeVector) -> Self {
        let mut gains = self.gains;
        for (g, o) in gains.iter_mut().zip(other.gains) {
            *g *= o;
        }
        Self { gains }
    }
}

impl Default for VolumeVector {
    fn default() -> Self {
        Self::unity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pan_right_attenuates_left() {
        let v = VolumeVector::from_volume_pan(1.0, 0.5);
        assert_eq!(v.gain(0), 0.5);
        assert_eq!(v.gain(1), 1.0);
        assert_eq!(v.gain(2), 0.5);
        assert_eq!(v.gain(3), 1.0);
    }

    #[test]
    fn test_out_of_range_channel_is_silent() {
        assert_eq!(VolumeVector::unity().gain(MAX_CHANNELS), 0.0);
    }

    #[test]
    fn test_scaled() {
        let v = VolumeVector::uniform(0.5).scaled(&VolumeVector::from_volume_pan(1.0, -1.0));
        assert_eq!(v.gain(0), 0.5);
        assert_eq!(v.gain(1), 0.0);
    }
}
