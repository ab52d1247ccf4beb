//! Sample rate conversion between the processing rate and device rates

use std::collections::VecDeque;

use mixdown_core::Interpolation;
use rubato::{
    FastFixedIn, PolynomialDegree, ResampleError, Resampler, ResamplerConstructionError,
    SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConverterError {
    #[error("Invalid sample rate: {0}")]
    InvalidRate(u32),
    #[error("Invalid channel count: {0}")]
    InvalidChannels(usize),
    #[error("Resampler init error: {0}")]
    Construction(#[from] ResamplerConstructionError),
    #[error("Resample error: {0}")]
    Resample(#[from] ResampleError),
}

enum Engine {
    Linear(FastFixedIn<f32>),
    Sinc(Box<SincFixedIn<f32>>),
}

impl Engine {
    fn new(
        interpolation: Interpolation,
        ratio: f64,
        chunk: usize,
        channels: usize,
    ) -> Result<Self, ResamplerConstructionError> {
        let params = match interpolation {
            Interpolation::Linear => {
                let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Linear, chunk, channels)?;
                return Ok(Self::Linear(resampler));
            }
            Interpolation::SincFastest => SincInterpolationParameters {
                sinc_len: 64,
                f_cutoff: 0.915,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::Hann2,
            },
            Interpolation::SincMedium => SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.925,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            },
            Interpolation::SincBest => SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            },
        };
        let resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, chunk, channels)?;
        Ok(Self::Sinc(Box::new(resampler)))
    }

    fn input_frames_next(&self) -> usize {
        match self {
            Self::Linear(r) => r.input_frames_next(),
            Self::Sinc(r) => r.input_frames_next(),
        }
    }

    fn output_frames_max(&self) -> usize {
        match self {
            Self::Linear(r) => r.output_frames_max(),
            Self::Sinc(r) => r.output_frames_max(),
        }
    }

    fn process_into(&mut self, input: &[Vec<f32>], output: &mut [Vec<f32>]) -> Result<(usize, usize), ResampleError> {
        match self {
            Self::Linear(r) => r.process_into_buffer(input, output, None),
            Self::Sinc(r) => r.process_into_buffer(input, output, None),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Linear(r) => r.reset(),
            Self::Sinc(r) => r.reset(),
        }
    }
}

/// Streaming converter over interleaved frames.
///
/// Input of any length is staged until a whole chunk is available, converted,
/// and queued. Output is read back in whatever sizes the caller needs. Filter
/// history carries across calls, so the same input sequence always yields the
/// same output.
pub struct SampleRateConverter {
    engine: Option<Engine>,
    from_rate: u32,
    to_rate: u32,
    channels: usize,
    interpolation: Interpolation,
    staging: Vec<Vec<f32>>,
    scratch: Vec<Vec<f32>>,
    ready: VecDeque<f32>,
}

impl SampleRateConverter {
    /// `chunk_frames` is the input block size handed to the resampler
    pub fn new(
        from_rate: u32,
        to_rate: u32,
        channels: usize,
        interpolation: Interpolation,
        chunk_frames: usize,
    ) -> Result<Self, ConverterError> {
        if from_rate == 0 {
            return Err(ConverterError::InvalidRate(from_rate));
        }
        if to_rate == 0 {
            return Err(ConverterError::InvalidRate(to_rate));
        }
        if channels == 0 {
            return Err(ConverterError::InvalidChannels(channels));
        }

        let engine = if from_rate == to_rate {
            None
        } else {
            let ratio = to_rate as f64 / from_rate as f64;
            Some(Engine::new(interpolation, ratio, chunk_frames.max(1), channels)?)
        };
        let scratch_len = engine.as_ref().map(Engine::output_frames_max).unwrap_or(0);
        let staging_len = engine.as_ref().map(Engine::input_frames_next).unwrap_or(0);

        debug!(from_rate, to_rate, channels, ?interpolation, chunk_frames, "Created sample rate converter");

        Ok(Self {
            engine,
            from_rate,
            to_rate,
            channels,
            interpolation,
            staging: vec![Vec::with_capacity(staging_len); channels],
            scratch: vec![vec![0.0; scratch_len]; channels],
            ready: VecDeque::new(),
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn is_passthrough(&self) -> bool {
        self.engine.is_none()
    }

    /// Feed interleaved frames. Returns the number of output frames ready.
    pub fn process(&mut self, input: &[f32]) -> Result<usize, ConverterError> {
        let Some(engine) = self.engine.as_mut() else {
            self.ready.extend(input.chunks_exact(self.channels).flatten());
            return Ok(self.available_frames());
        };

        for frame in input.chunks_exact(self.channels) {
            for (lane, sample) in self.staging.iter_mut().zip(frame) {
                lane.push(*sample);
            }
            if self.staging[0].len() >= engine.input_frames_next() {
                let (_, produced) = engine.process_into(&self.staging, &mut self.scratch)?;
                for i in 0..produced {
                    for lane in &self.scratch {
                        self.ready.push_back(lane[i]);
                    }
                }
                for lane in &mut self.staging {
                    lane.clear();
                }
            }
        }
        Ok(self.available_frames())
    }

    pub fn available_frames(&self) -> usize {
        self.ready.len() / self.channels
    }

    /// Pop up to `out.len() / channels` frames. Returns frames written.
    pub fn read_frames(&mut self, out: &mut [f32]) -> usize {
        let frames = (out.len() / self.channels).min(self.available_frames());
        for (dst, src) in out.iter_mut().zip(self.ready.drain(..frames * self.channels)) {
            *dst = src;
        }
        frames
    }

    /// Fill `out` completely, padding with silence when not enough output is
    /// queued. Returns the number of converted frames used.
    pub fn read_exact_padded(&mut self, out: &mut [f32]) -> usize {
        let frames = self.read_frames(out);
        out[frames * self.channels..].fill(0.0);
        frames
    }

    /// Drop queued input/output and filter history
    pub fn reset(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.reset();
        }
        for lane in &mut self.staging {
            lane.clear();
        }
        self.ready.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn sine(freq: f32, rate: u32, frames: usize, amplitude: f32) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let s = (TAU * freq * i as f32 / rate as f32).sin() * amplitude;
                [s, s]
            })
            .collect()
    }

    fn convert_all(conv: &mut SampleRateConverter, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        for block in input.chunks(256 * 2) {
            conv.process(block).unwrap();
            let mut tmp = vec![0.0; conv.available_frames() * 2];
            conv.read_frames(&mut tmp);
            out.extend(tmp);
        }
        out
    }

    /// Frequency from rising zero crossings, amplitude from RMS
    fn measure(left: &[f32], rate: u32) -> (f32, f32) {
        let crossings: Vec<usize> = left
            .windows(2)
            .enumerate()
            .filter(|(_, w)| w[0] < 0.0 && w[1] >= 0.0)
            .map(|(i, _)| i)
            .collect();
        let first = crossings[0];
        let last = crossings[crossings.len() - 1];
        let periods = (crossings.len() - 1) as f32;
        let freq = periods * rate as f32 / (last - first) as f32;

        let span = &left[first..last];
        let rms = (span.iter().map(|s| s * s).sum::<f32>() / span.len() as f32).sqrt();
        (freq, rms * std::f32::consts::SQRT_2)
    }

    fn round_trip(interpolation: Interpolation) -> (f32, f32) {
        let input = sine(1000.0, 44100, 44100, 0.5);
        let mut up = SampleRateConverter::new(44100, 48000, 2, interpolation, 256).unwrap();
        let mut down = SampleRateConverter::new(48000, 44100, 2, interpolation, 256).unwrap();
        let mid = convert_all(&mut up, &input);
        let back = convert_all(&mut down, &mid);
        let left: Vec<f32> = back.chunks_exact(2).map(|f| f[0]).collect();
        // Skip filter warm-up and the tail
        let steady = &left[4096..left.len() - 4096];
        measure(steady, 44100)
    }

    #[test]
    fn test_passthrough_when_rates_match() {
        let mut conv = SampleRateConverter::new(44100, 44100, 2, Interpolation::SincBest, 256).unwrap();
        assert!(conv.is_passthrough());
        assert_eq!(conv.process(&[0.1, 0.2, 0.3, 0.4]).unwrap(), 2);
        let mut out = [0.0; 4];
        assert_eq!(conv.read_frames(&mut out), 2);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(matches!(
            SampleRateConverter::new(0, 44100, 2, Interpolation::Linear, 256),
            Err(ConverterError::InvalidRate(0))
        ));
        assert!(matches!(
            SampleRateConverter::new(44100, 48000, 0, Interpolation::Linear, 256),
            Err(ConverterError::InvalidChannels(0))
        ));
    }

    #[test]
    fn test_round_trip_sinc_best() {
        let (freq, amp) = round_trip(Interpolation::SincBest);
        assert!((freq - 1000.0).abs() < 5.0, "frequency drifted to {freq}");
        assert!((amp - 0.5).abs() < 0.01, "amplitude changed to {amp}");
    }

    #[test]
    fn test_round_trip_linear_looser() {
        let (freq, amp) = round_trip(Interpolation::Linear);
        assert!((freq - 1000.0).abs() < 10.0, "frequency drifted to {freq}");
        assert!((amp - 0.5).abs() < 0.05, "amplitude changed to {amp}");
    }

    #[test]
    fn test_decimation_output_rate() {
        let mut conv = SampleRateConverter::new(88200, 44100, 2, Interpolation::SincFastest, 512).unwrap();
        let input = sine(440.0, 88200, 512 * 8, 0.5);
        let mut produced = 0;
        for block in input.chunks(512 * 2) {
            conv.process(block).unwrap();
            let mut out = vec![0.0; 256 * 2];
            produced += conv.read_frames(&mut out);
        }
        assert!((produced as i64 - 256 * 8).abs() <= 2, "produced {produced}");
    }

    #[test]
    fn test_read_exact_padded_fills_silence() {
        let mut conv = SampleRateConverter::new(44100, 44100, 2, Interpolation::Linear, 64).unwrap();
        conv.process(&[0.5, 0.5]).unwrap();
        let mut out = [1.0; 6];
        assert_eq!(conv.read_exact_padded(&mut out), 1);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_deterministic_output() {
        let input = sine(300.0, 44100, 2048, 0.8);
        let run = || {
            let mut conv = SampleRateConverter::new(44100, 32000, 2, Interpolation::SincMedium, 256).unwrap();
            convert_all(&mut conv, &input)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_reset_drops_queued_output() {
        let mut conv = SampleRateConverter::new(44100, 22050, 2, Interpolation::Linear, 64).unwrap();
        conv.process(&sine(100.0, 44100, 256, 0.5)).unwrap();
        assert!(conv.available_frames() > 0);
        conv.reset();
        assert_eq!(conv.available_frames(), 0);
    }
}
