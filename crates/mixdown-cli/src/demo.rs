//! Built-in arrangement used by `render` and `play`

use std::f64::consts::TAU;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mixdown_core::{StereoBuffer, Track, TrackId, TrackRef, VolumeVector};
use mixdown_engine::{
    AudioPort, Instrument, InstrumentTrackHandle, Mixer, NotePlayHandle, PlayHandle, RenderContext,
    SamplePlayHandle, Waveform,
};
use tracing::{info, warn};

const ARP_KEYS: [u8; 8] = [60, 64, 67, 72, 76, 72, 67, 64];
const ARP_STEP: Duration = Duration::from_millis(125);
const ARP_DECAY_PER_SECOND: f64 = 12.0;
const BASS_KEY: u8 = 36;

/// Step sequencer voice cycling through a fixed key pattern
struct Arpeggiator {
    keys: Vec<u8>,
    step: Duration,
    position: u64,
    phase: f64,
}

impl Arpeggiator {
    fn new(keys: &[u8], step: Duration) -> Self {
        Self { keys: keys.to_vec(), step, position: 0, phase: 0.0 }
    }

    fn frequency(key: u8) -> f64 {
        440.0 * 2f64.powf((key as f64 - 69.0) / 12.0)
    }
}

impl Instrument for Arpeggiator {
    fn name(&self) -> &str {
        "arpeggiator"
    }

    fn play(&mut self, ctx: &RenderContext, out: &mut StereoBuffer) {
        if self.keys.is_empty() {
            return;
        }
        let sample_rate = ctx.sample_rate as f64;
        let step_frames = ((self.step.as_secs_f64() * sample_rate) as u64).max(1);

        for frame in out.frames_iter_mut().take(ctx.frames) {
            let step = self.position / step_frames;
            let key = self.keys[(step % self.keys.len() as u64) as usize];
            if self.position % step_frames == 0 {
                self.phase = 0.0;
            }
            let elapsed = (self.position % step_frames) as f64 / sample_rate;
            let envelope = (-ARP_DECAY_PER_SECOND * elapsed).exp();
            let sample = ((self.phase * TAU).sin() * envelope * 0.3) as f32;
            frame[0] += sample;
            frame[1] += sample;
            self.phase = (self.phase + Self::frequency(key) / sample_rate).fract();
            self.position += 1;
        }
    }
}

/// Tracks and ports kept alive for the length of a session
pub struct Arrangement {
    pub tracks: Vec<TrackRef>,
    pub ports: Vec<Arc<AudioPort>>,
}

/// Register the demo handles with `mixer`
pub fn populate(mixer: &Mixer, seconds: f64, sample: Option<&Path>) -> Result<Arrangement> {
    let arp_track = Track::new(TrackId(1), "arp");
    let bass_track = Track::new(TrackId(2), "bass");
    let arp_bus = AudioPort::new("arp-bus");
    arp_bus.set_volume(VolumeVector::from_volume_pan(0.8, -0.3));

    let arpeggiator = Arpeggiator::new(&ARP_KEYS, ARP_STEP);
    let arp =
        InstrumentTrackHandle::new(&arp_track, Box::new(arpeggiator)).with_port(arp_bus.clone());
    let bass = NotePlayHandle::from_key(BASS_KEY, 80, Duration::from_secs_f64(seconds.max(0.0)))
        .with_waveform(Waveform::Saw)
        .with_release(Duration::from_millis(200))
        .with_track(&bass_track)
        .with_volume(VolumeVector::from_volume_pan(0.4, 0.2));

    let mut guard = mixer.lock();
    let mut added = 0;
    for handle in [Box::new(arp) as Box<dyn PlayHandle>, Box::new(bass)] {
        match guard.add_play_handle(handle) {
            Some(_) => added += 1,
            None => warn!("Mixer refused a demo handle"),
        }
    }
    drop(guard);

    if let Some(path) = sample {
        let handle = SamplePlayHandle::load_wav(path)
            .with_context(|| format!("loading {}", path.display()))?;
        if mixer.add_play_handle(Box::new(handle)).is_some() {
            added += 1;
        }
    }

    info!(handles = added, "Demo arrangement loaded");
    Ok(Arrangement { tracks: vec![arp_track, bass_track], ports: vec![arp_bus] })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixdown_core::QualitySettings;

    fn ctx(frames: usize) -> RenderContext {
        RenderContext { frames, sample_rate: 1000, quality: QualitySettings::draft(), period: 1 }
    }

    fn test_mixer() -> Mixer {
        Mixer::new(&mixdown_core::EngineConfig { worker_threads: 1, ..Default::default() }).unwrap()
    }

    #[test]
    fn test_arpeggiator_restarts_each_step() {
        let mut arp = Arpeggiator::new(&[69, 81], Duration::from_millis(100));
        let mut out = StereoBuffer::stereo(200);
        arp.play(&ctx(200), &mut out);

        let samples = out.as_slice();
        assert_eq!(samples[0], 0.0);
        // Frame 100 starts the second step at zero phase
        assert_eq!(samples[200], 0.0);
        assert!(samples.iter().any(|s| s.abs() > 0.1));
        assert!(samples.iter().all(|s| s.abs() <= 0.3));
    }

    #[test]
    fn test_arpeggiator_decays_within_step() {
        let mut arp = Arpeggiator::new(&[69], Duration::from_secs(1));
        let mut out = StereoBuffer::stereo(1000);
        arp.play(&ctx(1000), &mut out);

        let peak = |range: std::ops::Range<usize>| {
            out.as_slice()[range.start * 2..range.end * 2]
                .iter()
                .fold(0.0f32, |m, s| m.max(s.abs()))
        };
        assert!(peak(0..100) > peak(900..1000) * 10.0);
    }

    #[test]
    fn test_populate_registers_handles_and_port() {
        let mixer = test_mixer();
        let arrangement = populate(&mixer, 1.0, None).unwrap();

        assert_eq!(mixer.play_handle_count(), 2);
        assert_eq!(arrangement.tracks.len(), 2);
        assert_eq!(mixer.lock().audio_port_count(), 1);
    }

    #[test]
    fn test_missing_sample_is_an_error() {
        let mixer = test_mixer();
        assert!(populate(&mixer, 1.0, Some(Path::new("/nonexistent/sample.wav"))).is_err());
    }
}
