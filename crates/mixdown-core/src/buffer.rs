//! Interleaved sample buffers used by the mixing engine

use crate::error::{MixdownError, Result};

/// Frames rendered per period unless configured otherwise
pub const DEFAULT_FRAMES_PER_PERIOD: usize = 256;
/// Channel count handed to play handles
pub const STEREO_CHANNELS: usize = 2;
/// Default channel count of the master bus
pub const DEFAULT_CHANNELS: usize = 2;
/// Largest supported master bus (quadraphonic surround)
pub const MAX_CHANNELS: usize = 4;
/// Scale factor for converting float samples to 16-bit integers
pub const OUTPUT_SAMPLE_MULTIPLIER: f32 = 32767.0;

/// Hard clip a sample to [-1, 1]
#[inline]
pub fn clip(sample: f32) -> f32 {
    if sample > 1.0 {
        1.0
    } else if sample < -1.0 {
        -1.0
    } else {
        sample
    }
}

/// Interleaved audio buffer with a fixed channel count.
///
/// Play handles render into a two-channel buffer, the master bus uses the
/// engine channel count. Output channel `c` of a surround bus is fed from
/// stereo channel `c % 2`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: usize,
    samples: Vec<f32>,
}

/// Two-channel buffer written by play handles and audio ports
pub type StereoBuffer = AudioBuffer;
/// Master bus buffer with the engine channel count
pub type SurroundBuffer = AudioBuffer;

impl AudioBuffer {
    pub fn new(frames: usize, channels: usize) -> Self {
        debug_assert!(channels > 0 && channels <= MAX_CHANNELS);
        Self {
            channels,
            samples: vec![0.0; frames * channels],
        }
    }

    pub fn stereo(frames: usize) -> Self {
        Self::new(frames, STEREO_CHANNELS)
    }

    /// Wrap interleaved samples, checking they form whole frames
    pub fn from_interleaved(samples: Vec<f32>, channels: usize) -> Result<Self> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(MixdownError::InvalidChannels(channels));
        }
        if samples.len() % channels != 0 {
            return Err(MixdownError::BufferSize {
                expected: samples.len() - samples.len() % channels,
                actual: samples.len(),
            });
        }
        Ok(Self { channels, samples })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.samples
    }

    /// Samples of one frame
    pub fn frame(&self, index: usize) -> &[f32] {
        let start = index * self.channels;
        &self.samples[start..start + self.channels]
    }

    pub fn frame_mut(&mut self, index: usize) -> &mut [f32] {
        let start = index * self.channels;
        &mut self.samples[start..start + self.channels]
    }

    pub fn frames_iter(&self) -> std::slice::ChunksExact<'_, f32> {
        self.samples.chunks_exact(self.channels)
    }

    pub fn frames_iter_mut(&mut self) -> std::slice::ChunksExactMut<'_, f32> {
        self.samples.chunks_exact_mut(self.channels)
    }

    /// Zero the whole buffer
    pub fn clear(&mut self) {
        self.samples.fill(0.0);
    }

    /// Zero `frames` frames starting at `offset`, clamped to the buffer
    pub fn clear_range(&mut self, frames: usize, offset: usize) {
        clear_frames(&mut self.samples, self.channels, frames, offset);
    }

    /// Change the frame count, keeping capacity and zeroing new frames
    pub fn resize_frames(&mut self, frames: usize) {
        self.samples.resize(frames * self.channels, 0.0);
    }

    /// Absolute peak of one channel
    pub fn peak(&self, channel: usize) -> f32 {
        peak_value(&self.samples, self.channels, channel)
    }

    /// Absolute peak per channel
    pub fn peaks(&self) -> Vec<f32> {
        (0..self.channels).map(|ch| self.peak(ch)).collect()
    }

    /// Add `other` into this buffer sample by sample
    pub fn mix_from(&mut self, other: &AudioBuffer) -> Result<()> {
        if other.channels != self.channels || other.samples.len() != self.samples.len() {
            return Err(MixdownError::BufferSize {
                expected: self.samples.len(),
                actual: other.samples.len(),
            });
        }
        for (dst, src) in self.samples.iter_mut().zip(&other.samples) {
            *dst += *src;
        }
        Ok(())
    }

    /// Convert to signed 16-bit samples, clipping first
    pub fn to_i16(&self) -> Vec<i16> {
        self.samples
            .iter()
            .map(|s| (clip(*s) * OUTPUT_SAMPLE_MULTIPLIER) as i16)
            .collect()
    }
}

/// Zero `frames` interleaved frames starting at frame `offset`
pub fn clear_frames(samples: &mut [f32], channels: usize, frames: usize, offset: usize) {
    let start = (offset * channels).min(samples.len());
    let end = ((offset + frames) * channels).min(samples.len());
    samples[start..end].fill(0.0);
}

/// Absolute peak of one channel of an interleaved slice
pub fn peak_value(samples: &[f32], channels: usize, channel: usize) -> f32 {
    if channel >= channels {
        return 0.0;
    }
    samples
        .iter()
        .skip(channel)
        .step_by(channels)
        .map(|s| s.abs())
        .fold(0.0f32, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_bounds() {
        assert_eq!(clip(1.5), 1.0);
        assert_eq!(clip(-3.0), -1.0);
        assert_eq!(clip(0.25), 0.25);
        assert_eq!(clip(1.0), 1.0);
    }

    #[test]
    fn test_buffer_shape() {
        let buf = AudioBuffer::new(256, 4);
        assert_eq!(buf.frames(), 256);
        assert_eq!(buf.channels(), 4);
        assert_eq!(buf.as_slice().len(), 1024);
    }

    #[test]
    fn test_from_interleaved_rejects_partial_frames() {
        assert!(AudioBuffer::from_interleaved(vec![0.0; 5], 2).is_err());
        assert!(AudioBuffer::from_interleaved(vec![0.0; 4], 0).is_err());
        assert!(AudioBuffer::from_interleaved(vec![0.0; 4], 2).is_ok());
    }

    #[test]
    fn test_clear_range_is_clamped() {
        let mut buf = AudioBuffer::from_interleaved(vec![1.0; 8], 2).unwrap();
        buf.clear_range(10, 2);
        assert_eq!(buf.as_slice(), &[1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_peaks_per_channel() {
        let buf = AudioBuffer::from_interleaved(vec![0.1, -0.7, -0.4, 0.2], 2).unwrap();
        assert_eq!(buf.peak(0), 0.4);
        assert_eq!(buf.peak(1), 0.7);
        assert_eq!(buf.peak(5), 0.0);
    }

    #[test]
    fn test_to_i16_clips() {
        let buf = AudioBuffer::from_interleaved(vec![2.0, -2.0], 2).unwrap();
        assert_eq!(buf.to_i16(), vec![32767, -32767]);
    }
}
