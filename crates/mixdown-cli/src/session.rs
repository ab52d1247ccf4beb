//! Offline render and live playback sessions

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::RecvTimeoutError;
use mixdown_core::EngineConfig;
use mixdown_engine::{default_candidates, Mixer, MixerEvent, WavFileDevice};
use serde::Serialize;
use tracing::{debug, info};

use crate::args::{PlayArgs, RenderArgs};
use crate::demo;

const STATUS_INTERVAL: Duration = Duration::from_millis(500);

/// Summary printed after an offline render
#[derive(Debug, Serialize)]
pub struct RenderReport {
    pub output: PathBuf,
    pub frames: u64,
    pub seconds: f64,
    pub sample_rate: u32,
    pub processing_rate: u32,
    pub channels: usize,
    pub quality: String,
    pub workers: usize,
    pub peak_left: f32,
    pub peak_right: f32,
    pub elapsed_ms: u64,
}

pub fn render(config: &EngineConfig, args: &RenderArgs) -> Result<RenderReport> {
    let mixer = Mixer::new(config).context("creating mixer")?;
    let request = mixer.device_request();
    let total_frames = (args.seconds.max(0.0) * request.sample_rate as f64).round() as u64;

    let _arrangement = demo::populate(&mixer, args.seconds, args.sample.as_deref())?;

    let device = WavFileDevice::new(&args.output, &request, total_frames);
    let completion = device.completion();
    let started = Instant::now();
    mixer
        .set_audio_device(Box::new(device), mixer.quality_settings(), false)
        .context("starting WAV writer")?;

    let frames = completion.recv().context("WAV writer exited without reporting")??;
    mixer.stop_processing();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let (peak_left, peak_right) = file_peaks(&args.output)?;
    let quality = mixer.quality_settings();
    Ok(RenderReport {
        output: args.output.clone(),
        frames,
        seconds: frames as f64 / request.sample_rate as f64,
        sample_rate: request.sample_rate,
        processing_rate: mixer.processing_sample_rate(),
        channels: request.channels,
        quality: quality.mode().map(|m| m.to_string()).unwrap_or_else(|| "custom".into()),
        workers: mixer.worker_count(),
        peak_left,
        peak_right,
        elapsed_ms,
    })
}

/// Largest absolute sample on the first two channels of a 16-bit WAV file
fn file_peaks(path: &Path) -> Result<(f32, f32)> {
    let mut reader = hound::WavReader::open(path).with_context(|| format!("reading back {}", path.display()))?;
    let channels = reader.spec().channels.max(1) as usize;
    let mut peaks = [0.0f32; 2];
    for (i, sample) in reader.samples::<i16>().enumerate() {
        let value = (sample? as f32 / i16::MAX as f32).abs();
        let ch = i % channels;
        if ch < 2 {
            peaks[ch] = peaks[ch].max(value);
        }
    }
    if channels == 1 {
        peaks[1] = peaks[0];
    }
    Ok((peaks[0], peaks[1]))
}

pub fn play(mut config: EngineConfig, args: &PlayArgs) -> Result<()> {
    if let Some(backend) = &args.backend {
        config.audio_backend = Some(backend.clone());
    }
    if args.no_fifo {
        config.fifo = false;
    }

    let mixer = Mixer::new(&config).context("creating mixer")?;
    let events = mixer.subscribe();
    mixer.init_devices(&default_candidates(), &[]).context("opening audio devices")?;
    let device = mixer.audio_device_name().unwrap_or_default();
    let midi = mixer.midi_client_name().unwrap_or_default();
    info!(%device, %midi, "Playback started");

    let _arrangement = demo::populate(&mixer, args.seconds, args.sample.as_deref())?;

    let deadline = Instant::now() + Duration::from_secs_f64(args.seconds.max(0.0));
    let mut next_status = Instant::now() + STATUS_INTERVAL;
    let mut periods = 0u64;
    while Instant::now() < deadline {
        match events.recv_timeout(STATUS_INTERVAL.min(deadline.saturating_duration_since(Instant::now()))) {
            Ok(MixerEvent::NextAudioBuffer { .. }) => periods += 1,
            Ok(event) => debug!(?event, "Mixer event"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if Instant::now() >= next_status {
            let (left, right) = mixer.peak_values();
            info!(
                load = mixer.cpu_load(),
                peak_left = left,
                peak_right = right,
                underruns = mixer.fifo_underruns(),
                periods,
                "Status"
            );
            next_status += STATUS_INTERVAL;
        }
        if !mixer.has_play_handles() {
            break;
        }
    }

    mixer.stop_processing();
    if mixer.is_clipping() {
        info!("Output clipped during playback");
    }
    // Let the device drain before the mixer is dropped
    thread::sleep(Duration::from_millis(50));
    Ok(())
}
