//! Play handles: units of work rendered once per period

mod instrument;
mod note;
mod sample;

pub use instrument::{Instrument, InstrumentTrackHandle};
pub use note::{NotePlayHandle, Waveform};
pub use sample::{SampleLoadError, SamplePlayHandle};

use std::fmt;
use std::sync::Arc;

use mixdown_core::{QualitySettings, StereoBuffer, VolumeVector, WeakTrack};

use crate::audio_port::AudioPort;

/// Stable identifier assigned when a handle is registered. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayHandleId(pub u64);

impl fmt::Display for PlayHandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Play handle variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayHandleKind {
    Note,
    InstrumentTrack,
    SampleTrack,
    PresetPreview,
}

/// Per-period parameters handed to every render call
#[derive(Debug, Clone, Copy)]
pub struct RenderContext {
    /// Frames to render, already multiplied by the oversampling factor
    pub frames: usize,
    /// Processing sample rate in Hz
    pub sample_rate: u32,
    pub quality: QualitySettings,
    /// Index of the period being rendered
    pub period: u64,
}

/// A unit of audio-producing work.
///
/// `render` is called exactly once per period from a worker thread while the
/// handle is active. It receives a cleared stereo buffer of `ctx.frames`
/// frames and adds its contribution. The mixer routes the result into
/// `audio_port()` when set, otherwise straight into the master bus.
pub trait PlayHandle: Send {
    fn kind(&self) -> PlayHandleKind;

    fn render(&mut self, ctx: &RenderContext, out: &mut StereoBuffer);

    /// Checked after every render; a finished handle is dropped at the end of the period
    fn is_finished(&self) -> bool;

    /// Owning track. The handle is dropped once the track is gone and
    /// contributes nothing while the track is muted.
    fn owner(&self) -> Option<WeakTrack> {
        None
    }

    fn audio_port(&self) -> Option<Arc<AudioPort>> {
        None
    }

    fn volume(&self) -> VolumeVector {
        VolumeVector::unity()
    }
}
