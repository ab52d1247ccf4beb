//! Offline render to a WAV file

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{error, info};

use super::{AudioDevice, DeviceError, DeviceRequest, PeriodSource};

/// Writes a fixed number of frames as 16-bit PCM as fast as the mixer renders
pub struct WavFileDevice {
    path: PathBuf,
    name: String,
    sample_rate: u32,
    channels: usize,
    total_frames: u64,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    done_tx: Sender<Result<u64, DeviceError>>,
    done_rx: Receiver<Result<u64, DeviceError>>,
}

impl WavFileDevice {
    pub fn new(path: impl AsRef<Path>, request: &DeviceRequest, total_frames: u64) -> Self {
        let path = path.as_ref().to_path_buf();
        let (done_tx, done_rx) = bounded(1);
        Self {
            name: format!("wav:{}", path.display()),
            path,
            sample_rate: request.sample_rate,
            channels: request.channels,
            total_frames,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            done_tx,
            done_rx,
        }
    }

    /// Receives the number of frames written once the file is finalized
    pub fn completion(&self) -> Receiver<Result<u64, DeviceError>> {
        self.done_rx.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn render(
        path: &Path,
        source: &PeriodSource,
        channels: usize,
        sample_rate: u32,
        total_frames: u64,
        running: &AtomicBool,
    ) -> Result<u64, DeviceError> {
        let spec = hound::WavSpec {
            channels: channels as u16,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        let mut written = 0u64;

        while written < total_frames && running.load(Ordering::Acquire) {
            let buffer = source.next_buffer();
            let frames = (buffer.frames() as u64).min(total_frames - written) as usize;
            for sample in buffer.to_i16().into_iter().take(frames * channels) {
                writer.write_sample(sample)?;
            }
            written += frames as u64;
        }

        writer.finalize()?;
        Ok(written)
    }
}

impl AudioDevice for WavFileDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn is_realtime(&self) -> bool {
        false
    }

    fn start(&mut self, source: PeriodSource) -> Result<(), DeviceError> {
        if self.thread.is_some() {
            return Err(DeviceError::AlreadyStarted);
        }
        self.running.store(true, Ordering::Release);

        let path = self.path.clone();
        let channels = source.channels();
        let sample_rate = self.sample_rate;
        let total_frames = self.total_frames;
        let running = self.running.clone();
        let done = self.done_tx.clone();

        let handle = thread::Builder::new()
            .name("mixdown-wav-writer".into())
            .spawn(move || {
                let result = Self::render(&path, &source, channels, sample_rate, total_frames, &running);
                match &result {
                    Ok(frames) => info!(path = %path.display(), frames, "WAV render finished"),
                    Err(e) => error!(path = %path.display(), error = %e, "WAV render failed"),
                }
                let _ = done.try_send(result);
            })?;

        self.thread = Some(handle);
        info!(path = %self.path.display(), frames = self.total_frames, "WAV file device started");
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WavFileDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
