//! Sample playback handle

use std::path::Path;
use std::sync::Arc;

use mixdown_core::{StereoBuffer, TrackRef, VolumeVector, WeakTrack};
use thiserror::Error;

use super::{PlayHandle, PlayHandleKind, RenderContext};
use crate::audio_port::AudioPort;

#[derive(Debug, Error)]
pub enum SampleLoadError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Unsupported channel count: {0}")]
    Channels(u16),
    #[error("Empty sample")]
    Empty,
}

/// Plays a stereo sample once (or looped), converting from the sample's rate
/// to the processing rate with linear interpolation.
pub struct SamplePlayHandle {
    data: Arc<StereoBuffer>,
    source_rate: u32,
    position: f64,
    looping: bool,
    finished: bool,
    kind: PlayHandleKind,
    track: Option<WeakTrack>,
    port: Option<Arc<AudioPort>>,
    volume: VolumeVector,
}

impl SamplePlayHandle {
    pub fn new(data: Arc<StereoBuffer>, source_rate: u32) -> Self {
        Self {
            data,
            source_rate,
            position: 0.0,
            looping: false,
            finished: false,
            kind: PlayHandleKind::SampleTrack,
            track: None,
            port: None,
            volume: VolumeVector::unity(),
        }
    }

    /// Load a WAV file, duplicating mono to both channels
    pub fn load_wav(path: impl AsRef<Path>) -> Result<Self, SampleLoadError> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let channels = spec.channels as usize;
        if channels == 0 || channels > 2 {
            return Err(SampleLoadError::Channels(spec.channels));
        }

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()?
            }
        };
        if samples.is_empty() {
            return Err(SampleLoadError::Empty);
        }

        let stereo = if channels == 1 {
            samples.iter().flat_map(|s| [*s, *s]).collect()
        } else {
            samples
        };
        let data = StereoBuffer::from_interleaved(stereo, 2).map_err(|_| SampleLoadError::Empty)?;
        Ok(Self::new(Arc::new(data), spec.sample_rate))
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Mark as a preview instead of sample-track playback
    pub fn as_preview(mut self) -> Self {
        self.kind = PlayHandleKind::PresetPreview;
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

    /// Position in source frames
    pub fn position(&self) -> f64 {
        self.position
    }
}

impl PlayHandle for SamplePlayHandle {
    fn kind(&self) -> PlayHandleKind {
        self.kind
    }

    fn render(&mut self, ctx: &RenderContext, out: &mut StereoBuffer) {
        let len = self.data.frames();
        if len == 0 {
            self.finished = true;
            return;
        }
        let step = self.source_rate as f64 / ctx.sample_rate as f64;

        for frame in out.frames_iter_mut().take(ctx.frames) {
            if self.position >= len as f64 {
                if !self.looping {
                    self.finished = true;
                    break;
                }
                self.position %= len as f64;
            }
            let index = self.position as usize;
            let frac = (self.position - index as f64) as f32;
            let current = self.data.frame(index);
            let next_index = if index + 1 < len {
                Some(index + 1)
            } else if self.looping {
                Some(0)
            } else {
                None
            };
            for ch in 0..2 {
                let next = next_index.map(|n| self.data.frame(n)[ch]).unwrap_or(0.0);
                frame[ch] += current[ch] + (next - current[ch]) * frac;
            }
            self.position += step;
        }

        if !self.looping && self.position >= len as f64 {
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

#[cfg(test)]
mod tests {
    use super::*;
    use mixdown_core::QualitySettings;

    fn ctx(frames: usize, sample_rate: u32) -> RenderContext {
        RenderContext { frames, sample_rate, quality: QualitySettings::draft(), period: 1 }
    }

    fn ramp(frames: usize) -> Arc<StereoBuffer> {
        let samples = (0..frames).flat_map(|i| [i as f32, -(i as f32)]).collect();
        Arc::new(StereoBuffer::from_interleaved(samples, 2).unwrap())
    }

    #[test]
    fn test_plays_once_at_equal_rate() {
        let mut handle = SamplePlayHandle::new(ramp(4), 48000);
        let mut buf = StereoBuffer::stereo(8);
        handle.render(&ctx(8, 48000), &mut buf);
        assert!(handle.is_finished());
        assert_eq!(&buf.as_slice()[..8], &[0.0, 0.0, 1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        assert!(buf.as_slice()[8..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_upsampling_interpolates() {
        let mut handle = SamplePlayHandle::new(ramp(4), 24000);
        let mut buf = StereoBuffer::stereo(4);
        handle.render(&ctx(4, 48000), &mut buf);
        let left: Vec<f32> = buf.frames_iter().map(|f| f[0]).collect();
        assert_eq!(left, vec![0.0, 0.5, 1.0, 1.5]);
        assert!(!handle.is_finished());
    }

    #[test]
    fn test_looping_never_finishes() {
        let mut handle = SamplePlayHandle::new(ramp(3), 48000).looping(true);
        let mut buf = StereoBuffer::stereo(7);
        handle.render(&ctx(7, 48000), &mut buf);
        assert!(!handle.is_finished());
        assert_eq!(buf.frame(6)[0], 0.0);
        assert_eq!(buf.frame(4)[0], 1.0);
    }

    #[test]
    fn test_load_wav_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for s in [0i16, 16384, -16384] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let handle = SamplePlayHandle::load_wav(&path).unwrap();
        assert_eq!(handle.source_rate, 22050);
        assert_eq!(handle.data.frames(), 3);
        assert_eq!(handle.data.frame(1), &[0.5, 0.5]);
    }
}
