//! Double-buffered capture input

use std::sync::Mutex;

use mixdown_core::{Interpolation, STEREO_CHANNELS};
use tracing::warn;

use crate::resampler::{ConverterError, SampleRateConverter};

struct InputState {
    slots: [Vec<f32>; 2],
    read: usize,
    converter: Option<SampleRateConverter>,
}

/// Captured stereo frames. The capture side appends to the write slot, the
/// render side sees the read slot; slots swap once per period.
pub(crate) struct InputFrames {
    state: Mutex<InputState>,
}

impl InputFrames {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InputState {
                slots: [Vec::new(), Vec::new()],
                read: 0,
                converter: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InputState> {
        match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Convert pushed frames from `input_rate` to `processing_rate`
    pub fn configure(
        &self,
        input_rate: u32,
        processing_rate: u32,
        interpolation: Interpolation,
        chunk_frames: usize,
    ) -> Result<(), ConverterError> {
        let converter = if input_rate == processing_rate {
            None
        } else {
            Some(SampleRateConverter::new(
                input_rate,
                processing_rate,
                STEREO_CHANNELS,
                interpolation,
                chunk_frames,
            )?)
        };
        let mut state = self.lock();
        state.converter = converter;
        for slot in &mut state.slots {
            slot.clear();
        }
        Ok(())
    }

    pub fn input_rate(&self) -> Option<u32> {
        self.lock().converter.as_ref().map(SampleRateConverter::from_rate)
    }

    /// Append interleaved stereo frames to the write slot
    pub fn push(&self, frames: &[f32]) {
        let mut state = self.lock();
        let write = 1 - state.read;
        let InputState { slots, converter, .. } = &mut *state;
        match converter {
            Some(conv) => match conv.process(frames) {
                Ok(ready) => {
                    let start = slots[write].len();
                    slots[write].resize(start + ready * STEREO_CHANNELS, 0.0);
                    conv.read_frames(&mut slots[write][start..]);
                }
                Err(e) => warn!(error = %e, "Dropping captured frames"),
            },
            None => slots[write].extend_from_slice(frames),
        }
    }

    /// Make the write slot readable and start a fresh write slot
    pub fn swap(&self) {
        let mut state = self.lock();
        state.read = 1 - state.read;
        let write = 1 - state.read;
        state.slots[write].clear();
    }

    pub fn read(&self) -> Vec<f32> {
        let state = self.lock();
        state.slots[state.read].clone()
    }

    pub fn read_frames(&self) -> usize {
        let state = self.lock();
        state.slots[state.read].len() / STEREO_CHANNELS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_swap_per_period() {
        let input = InputFrames::new();
        input.push(&[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(input.read_frames(), 0);

        input.swap();
        assert_eq!(input.read(), vec![0.1, 0.2, 0.3, 0.4]);
        input.push(&[0.5, 0.6]);
        assert_eq!(input.read_frames(), 2);

        input.swap();
        assert_eq!(input.read(), vec![0.5, 0.6]);
        input.swap();
        assert_eq!(input.read_frames(), 0);
    }

    #[test]
    fn test_resampled_input() {
        let input = InputFrames::new();
        input.configure(22050, 44100, Interpolation::Linear, 64).unwrap();
        assert_eq!(input.input_rate(), Some(22050));
        input.push(&vec![0.5; 64 * 4 * 2]);
        input.swap();
        let frames = input.read_frames();
        assert!((frames as i64 - 512).abs() <= 8, "got {frames}");
    }
}
