//! Instrument track renderer

use std::sync::Arc;

use mixdown_core::{StereoBuffer, TrackRef, VolumeVector, WeakTrack};

use super::{PlayHandle, PlayHandleKind, RenderContext};
use crate::audio_port::AudioPort;

/// Sound source driven by an instrument track
pub trait Instrument: Send {
    fn name(&self) -> &str;

    /// Add one period of output to `out`
    fn play(&mut self, ctx: &RenderContext, out: &mut StereoBuffer);
}

/// Renders a track's instrument every period for as long as the track exists.
/// Instruments that mix all their voices themselves use this instead of one
/// handle per note.
pub struct InstrumentTrackHandle {
    instrument: Box<dyn Instrument>,
    track: WeakTrack,
    port: Option<Arc<AudioPort>>,
    volume: VolumeVector,
}

impl InstrumentTrackHandle {
    pub fn new(track: &TrackRef, instrument: Box<dyn Instrument>) -> Self {
        Self {
            instrument,
            track: Arc::downgrade(track),
            port: None,
            volume: VolumeVector::unity(),
        }
    }

    pub fn with_port(mut self, port: Arc<AudioPort>) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_volume(mut self, volume: VolumeVector) -> Self {
        self.volume = volume;
        self
    }

    pub fn instrument_name(&self) -> &str {
        self.instrument.name()
    }
}

impl PlayHandle for InstrumentTrackHandle {
    fn kind(&self) -> PlayHandleKind {
        PlayHandleKind::InstrumentTrack
    }

    fn render(&mut self, ctx: &RenderContext, out: &mut StereoBuffer) {
        self.instrument.play(ctx, out);
    }

    fn is_finished(&self) -> bool {
        self.track.strong_count() == 0
    }

    fn owner(&self) -> Option<WeakTrack> {
        Some(self.track.clone())
    }

    fn audio_port(&self) -> Option<Arc<AudioPort>> {
        self.port.clone()
    }

    fn volume(&self) -> VolumeVector {
        self.volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixdown_core::{QualitySettings, Track, TrackId};

    struct Dc(f32);

    impl Instrument for Dc {
        fn name(&self) -> &str {
            "dc"
        }

        fn play(&mut self, ctx: &RenderContext, out: &mut StereoBuffer) {
            for frame in out.frames_iter_mut().take(ctx.frames) {
                frame[0] += self.0;
                frame[1] += self.0;
            }
        }
    }

    #[test]
    fn test_finishes_when_track_dropped() {
        let track = Track::new(TrackId(7), "keys");
        let mut handle = InstrumentTrackHandle::new(&track, Box::new(Dc(0.25)));
        let ctx = RenderContext { frames: 4, sample_rate: 44100, quality: QualitySettings::draft(), period: 1 };
        let mut buf = StereoBuffer::stereo(4);
        handle.render(&ctx, &mut buf);
        assert_eq!(buf.peak(1), 0.25);
        assert!(!handle.is_finished());
        assert_eq!(handle.instrument_name(), "dc");

        drop(track);
        assert!(handle.is_finished());
    }
}
