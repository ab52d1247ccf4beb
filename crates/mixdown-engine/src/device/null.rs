//! Silent device that pulls periods at real-time pace

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::{AudioDevice, DeviceError, DeviceRequest, PeriodSource};

pub struct NullDevice {
    sample_rate: u32,
    channels: usize,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl NullDevice {
    pub const NAME: &'static str = "null";

    pub fn new(request: &DeviceRequest) -> Self {
        Self {
            sample_rate: request.sample_rate,
            channels: request.channels,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl AudioDevice for NullDevice {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn start(&mut self, source: PeriodSource) -> Result<(), DeviceError> {
        if self.thread.is_some() {
            return Err(DeviceError::AlreadyStarted);
        }
        let period = Duration::from_secs_f64(source.frames_per_period() as f64 / source.sample_rate() as f64);
        self.running.store(true, Ordering::Release);
        let running = self.running.clone();

        let handle = thread::Builder::new()
            .name("mixdown-null-device".into())
            .spawn(move || {
                let mut deadline = Instant::now();
                while running.load(Ordering::Acquire) {
                    let _ = source.next_buffer();
                    deadline += period;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    } else {
                        deadline = now;
                    }
                }
                debug!("Null device loop exited");
            })?;

        self.thread = Some(handle);
        info!(sample_rate = self.sample_rate, "Null audio device started");
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for NullDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
