//! Fixed-length oscillator note

use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use mixdown_core::{StereoBuffer, TrackRef, VolumeVector, WeakTrack};

use super::{PlayHandle, PlayHandleKind, RenderContext};
use crate::audio_port::AudioPort;

/// Frequency of MIDI key 69 (A4)
pub const BASE_FREQUENCY: f64 = 440.0;
const BASE_KEY: i32 = 69;
const DEFAULT_RELEASE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Saw,
    Square,
}

/// Plays a single oscillator note for a fixed duration, fading out linearly
/// over the release time at the end.
pub struct NotePlayHandle {
    frequency: f64,
    amplitude: f32,
    waveform: Waveform,
    duration: Duration,
    release: Duration,
    phase: f64,
    position: u64,
    finished: bool,
    track: Option<WeakTrack>,
    port: Option<Arc<AudioPort>>,
    volume: VolumeVector,
}

impl NotePlayHandle {
    pub fn new(frequency: f64, duration: Duration) -> Self {
        Self {
            frequency,
            amplitude: 0.5,
            waveform: Waveform::Sine,
            duration,
            release: DEFAULT_RELEASE,
            phase: 0.0,
            position: 0,
            finished: false,
            track: None,
            port: None,
            volume: VolumeVector::unity(),
        }
    }

    /// Note for a MIDI key number in equal temperament
    pub fn from_key(key: u8, velocity: u8, duration: Duration) -> Self {
        let frequency = BASE_FREQUENCY * 2f64.powf((key as i32 - BASE_KEY) as f64 / 12.0);
        Self::new(frequency, duration).with_amplitude(velocity.min(127) as f32 / 127.0)
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }

    pub fn with_release(mut self, release: Duration) -> Self {
        self.release = release;
        self
    }

    pub fn with_track(mut self, track: &TrackRef) -> Self {
        self.track = Some(Arc::downgrade(track));
        self
    }

    pub fn with_port(mut self, port: Arc<AudioPort>) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_volume(mut self, volume: VolumeVector) -> Self {
        self.volume = volume;
        self
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Frames rendered so far at the processing rate
    pub fn frames_played(&self) -> u64 {
        self.position
    }

    fn oscillate(&self, increment: f64, alias_free: bool) -> f64 {
        let t = self.phase;
        match self.waveform {
            Waveform::Sine => (t * TAU).sin(),
            Waveform::Saw => {
                let naive = 2.0 * t - 1.0;
                if alias_free { naive - poly_blep(t, increment) } else { naive }
            }
            Waveform::Square => {
                let naive = if t < 0.5 { 1.0 } else { -1.0 };
                if alias_free {
                    naive + poly_blep(t, increment) - poly_blep((t + 0.5).fract(), increment)
                } else {
                    naive
                }
            }
        }
    }
}

/// Polynomial band-limited step residual
fn poly_blep(t: f64, dt: f64) -> f64 {
    if dt <= 0.0 {
        return 0.0;
    }
    if t < dt {
        let t = t / dt;
        t + t - t * t - 1.0
    } else if t > 1.0 - dt {
        let t = (t - 1.0) / dt;
        t * t + t + t + 1.0
    } else {
        0.0
    }
}

impl PlayHandle for NotePlayHandle {
    fn kind(&self) -> PlayHandleKind {
        PlayHandleKind::Note
    }

    fn render(&mut self, ctx: &RenderContext, out: &mut StereoBuffer) {
        let sample_rate = ctx.sample_rate as f64;
        let total = (self.duration.as_secs_f64() * sample_rate).round() as u64;
        let release = ((self.release.as_secs_f64() * sample_rate).round() as u64).clamp(1, total.max(1));
        let increment = self.frequency / sample_rate;
        let alias_free = ctx.quality.alias_free_oscillators;

        for frame in out.frames_iter_mut().take(ctx.frames) {
            if self.position >= total {
                break;
            }
            let remaining = total - self.position;
            let envelope = if remaining < release { remaining as f32 / release as f32 } else { 1.0 };
            let sample = self.oscillate(increment, alias_free) as f32 * self.amplitude * envelope;
            frame[0] += sample;
            frame[1] += sample;
            self.phase = (self.phase + increment).fract();
            self.position += 1;
        }

        if self.position >= total {
            self.finished = true;
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn owner(&self) -> Option<WeakTrack> {
        self.track.clone()
    }

    fn audio_port(&self) -> Option<Arc<AudioPort>> {
        self.port.clone()
    }

    fn volume(&self) -> VolumeVector {
        self.volume
    }
}
