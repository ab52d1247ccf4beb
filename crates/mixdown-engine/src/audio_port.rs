//! Named accumulation buffers collected into the master bus

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mixdown_core::{StereoBuffer, VolumeVector};

/// Stereo bus that play handles write into. The mixer downmixes every
/// registered, enabled port into the master buffer once per period.
#[derive(Debug)]
pub struct AudioPort {
    name: String,
    buffer: Mutex<StereoBuffer>,
    volume: Mutex<VolumeVector>,
    enabled: AtomicBool,
    has_data: AtomicBool,
}

impl AudioPort {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            buffer: Mutex::new(StereoBuffer::stereo(0)),
            volume: Mutex::new(VolumeVector::unity()),
            enabled: AtomicBool::new(true),
            has_data: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Gain applied when the port is downmixed into the master bus
    pub fn volume(&self) -> VolumeVector {
        self.volume.lock().map(|v| *v).unwrap_or_default()
    }

    pub fn set_volume(&self, volume: VolumeVector) {
        if let Ok(mut v) = self.volume.lock() {
            *v = volume;
        }
    }

    /// Whether anything was mixed in since the last `prepare`
    pub fn has_data(&self) -> bool {
        self.has_data.load(Ordering::Relaxed)
    }

    /// Resize to `frames` and clear, called by the mixer at the start of a period
    pub(crate) fn prepare(&self, frames: usize) {
        if let Ok(mut buf) = self.buffer.lock() {
            if buf.frames() != frames {
                buf.resize_frames(frames);
            }
            buf.clear();
        }
        self.has_data.store(false, Ordering::Relaxed);
    }

    /// Add `frames` frames of `source` at `offset`, scaled by the left/right
    /// gains of `volume`. Frames past the port buffer are dropped.
    pub fn mix_in(&self, source: &StereoBuffer, frames: usize, offset: usize, volume: &VolumeVector) {
        let Ok(mut buf) = self.buffer.lock() else {
            return;
        };
        let available = buf.frames().saturating_sub(offset);
        let frames = frames.min(source.frames()).min(available);
        if frames == 0 {
            return;
        }
        let (left, right) = (volume.gain(0), volume.gain(1));
        for i in 0..frames {
            let src = source.frame(i);
            let dst = buf.frame_mut(offset + i);
            dst[0] += src[0] * left;
            dst[1] += src[1] * right;
        }
        self.has_data.store(true, Ordering::Relaxed);
    }

    /// Run `f` over the accumulated buffer
    pub fn with_buffer<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&StereoBuffer) -> R,
    {
        self.buffer.lock().ok().map(|b| f(&b))
    }
}
