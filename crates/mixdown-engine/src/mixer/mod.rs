//! Mixer: owns the render pipeline, the play-handle registry and the active device

mod events;
mod registry;
mod render;

pub use events::MixerEvent;
pub(crate) use render::MixerCore;

use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{bounded, Receiver};
use mixdown_core::{
    clip, AudioBuffer, EngineConfig, MixdownError, QualitySettings, StereoBuffer, SurroundBuffer, TrackId,
    VolumeVector, MAX_FRAMES_PER_PERIOD, MIN_FRAMES_PER_PERIOD,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio_port::AudioPort;
use crate::device::{AudioDevice, DeviceCandidate, DeviceError, DeviceRequest, NullDevice, PeriodSource};
use crate::fifo::{FifoBuffer, FifoWriter};
use crate::meter::LoadMonitor;
use crate::midi::{DummyMidiClient, MidiCandidate, MidiClient};
use crate::play_handle::{PlayHandle, PlayHandleId};
use crate::resampler::ConverterError;
use registry::Registry;
use render::{lock, Params};

const EVENT_QUEUE: usize = 256;

#[derive(Debug, Error)]
pub enum MixerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] MixdownError),
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
    #[error("Failed to spawn thread: {0}")]
    Thread(#[from] std::io::Error),
    #[error("Converter error: {0}")]
    Converter(#[from] ConverterError),
    #[error("Processing is running")]
    Running,
    #[error("No previous audio device")]
    NoPreviousDevice,
}

struct DeviceSlot {
    current: Option<Box<dyn AudioDevice>>,
    /// Replaced device and its FIFO setting, kept for `restore_audio_device`
    previous: Option<(Box<dyn AudioDevice>, bool)>,
    needs_fifo: bool,
    writer: Option<FifoWriter<SurroundBuffer>>,
    running: bool,
}

/// Critical section over the play-handle and audio-port sets.
///
/// Rendering waits while a guard is alive, so do not call `next_buffer` (or
/// anything that renders) while holding one.
pub struct MixerGuard<'a> {
    registry: MutexGuard<'a, Registry>,
    core: &'a MixerCore,
}

impl MixerGuard<'_> {
    /// Register a handle for rendering from the next period on. Under
    /// critical overrun the handle is dropped and `None` returned.
    pub fn add_play_handle(&mut self, handle: Box<dyn PlayHandle>) -> Option<PlayHandleId> {
        if self.core.critical_xruns() {
            warn!(kind = ?handle.kind(), load = self.core.load.load(), "Critical overrun, rejecting play handle");
            return None;
        }
        Some(self.registry.add(handle))
    }

    /// Deferred: the handle contributes nothing from now on and is dropped
    /// at the next period boundary
    pub fn remove_play_handle(&mut self, id: PlayHandleId) -> bool {
        self.registry.mark_removed(id)
    }

    pub fn remove_play_handles(&mut self, track: TrackId) -> usize {
        let removed = self.registry.mark_track_removed(track);
        debug!(track = track.0, removed, "Removed play handles of track");
        removed
    }

    pub fn clear(&mut self) -> usize {
        self.registry.mark_all_removed()
    }

    pub fn contains(&self, id: PlayHandleId) -> bool {
        self.registry.contains(id)
    }

    pub fn play_handle_count(&self) -> usize {
        self.registry.active_count()
    }

    pub fn add_audio_port(&mut self, port: Arc<AudioPort>) -> bool {
        self.registry.add_port(port)
    }

    pub fn remove_audio_port(&mut self, port: &Arc<AudioPort>) -> bool {
        self.registry.remove_port(port)
    }

    pub fn audio_port_count(&self) -> usize {
        self.registry.ports.len()
    }
}

/// Real-time mixing engine.
///
/// A device pulls periods through `next_buffer`. With the FIFO enabled a
/// writer thread renders ahead and `next_buffer` pops prebuffered periods.
pub struct Mixer {
    core: Arc<MixerCore>,
    devices: Mutex<DeviceSlot>,
    midi: Mutex<Option<Box<dyn MidiClient>>>,
    fifo_depth: usize,
    preferred_backend: Option<String>,
}

impl Mixer {
    pub fn new(config: &EngineConfig) -> Result<Self, MixerError> {
        config.validate()?;
        let params = Params {
            quality: config.quality_settings(),
            frames_per_period: config.frames_per_period,
            channels: config.channels,
            base_rate: config.sample_rate,
            output_rate: config.sample_rate,
            pool_depth: config.pool_depth,
        };
        let workers = config.resolved_worker_threads();
        let core = MixerCore::new(params, workers, config.master_gain)?;

        info!(
            frames = params.frames_per_period,
            channels = params.channels,
            sample_rate = params.base_rate,
            workers = core.worker_count(),
            fifo = config.fifo,
            "Mixer created"
        );

        Ok(Self {
            core: Arc::new(core),
            devices: Mutex::new(DeviceSlot {
                current: None,
                previous: None,
                needs_fifo: config.fifo,
                writer: None,
                running: false,
            }),
            midi: Mutex::new(None),
            fifo_depth: config.fifo_depth,
            preferred_backend: config.audio_backend.clone(),
        })
    }

    pub fn device_request(&self) -> DeviceRequest {
        let params = self.core.params();
        DeviceRequest {
            sample_rate: params.base_rate,
            channels: params.channels,
            frames_per_period: params.frames_per_period,
            quality: params.quality,
        }
    }

    /// Open the first working audio backend (preferred one first), falling
    /// back to the null device, and the first working MIDI client, falling
    /// back to the dummy client. Missing hardware is never an error.
    pub fn init_devices(&self, audio: &[DeviceCandidate], midi: &[MidiCandidate]) -> Result<(), MixerError> {
        let request = self.device_request();
        let preferred = self.preferred_backend.as_deref();
        let ordered = audio
            .iter()
            .filter(|c| Some(c.name()) == preferred)
            .chain(audio.iter().filter(|c| Some(c.name()) != preferred));

        let mut installed = false;
        for candidate in ordered {
            let device = match candidate.open(&request) {
                Ok(device) => device,
                Err(e) => {
                    warn!(backend = candidate.name(), error = %e, "Audio backend unavailable, trying next");
                    continue;
                }
            };
            match self.set_audio_device_keep_quality(device) {
                Ok(()) => {
                    installed = true;
                    break;
                }
                Err(e) => warn!(backend = candidate.name(), error = %e, "Audio backend failed to start, trying next"),
            }
        }
        if !installed {
            warn!("No audio backend available, using null device");
            self.set_audio_device_keep_quality(Box::new(NullDevice::new(&request)))?;
        }

        let client = midi
            .iter()
            .find_map(|candidate| match candidate.open() {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!(backend = candidate.name(), error = %e, "MIDI backend unavailable, trying next");
                    None
                }
            })
            .unwrap_or_else(|| Box::new(DummyMidiClient));
        info!(client = client.name(), "MIDI client selected");
        *lock(&self.midi) = Some(client);
        Ok(())
    }

    /// Stop processing, install `device` with `quality`, and restart
    pub fn set_audio_device(
        &self,
        device: Box<dyn AudioDevice>,
        quality: QualitySettings,
        needs_fifo: bool,
    ) -> Result<(), MixerError> {
        let mut slot = lock(&self.devices);
        self.stop_locked(&mut slot);
        if let Some(old) = slot.current.take() {
            slot.previous = Some((old, slot.needs_fifo));
        }
        self.install_locked(&mut slot, device, quality, needs_fifo)
    }

    pub fn set_audio_device_keep_quality(&self, device: Box<dyn AudioDevice>) -> Result<(), MixerError> {
        let needs_fifo = lock(&self.devices).needs_fifo;
        self.set_audio_device(device, self.quality_settings(), needs_fifo)
    }

    /// Reinstate the device replaced by the last `set_audio_device`
    pub fn restore_audio_device(&self) -> Result<(), MixerError> {
        let mut slot = lock(&self.devices);
        let (device, needs_fifo) = slot.previous.take().ok_or(MixerError::NoPreviousDevice)?;
        self.stop_locked(&mut slot);
        slot.current = None;
        let quality = self.quality_settings();
        self.install_locked(&mut slot, device, quality, needs_fifo)
    }

    fn install_locked(
        &self,
        slot: &mut DeviceSlot,
        device: Box<dyn AudioDevice>,
        quality: QualitySettings,
        needs_fifo: bool,
    ) -> Result<(), MixerError> {
        let name = device.name().to_string();
        self.apply_params(Params { quality, output_rate: device.sample_rate(), ..self.core.params() })?;
        self.core
            .realtime
            .store(device.is_realtime(), std::sync::atomic::Ordering::Relaxed);
        slot.needs_fifo = needs_fifo;
        slot.current = Some(device);
        info!(device = %name, fifo = needs_fifo, "Audio device installed");
        self.core.emit(MixerEvent::AudioDeviceChanged(name));
        if let Err(e) = self.start_locked(slot) {
            slot.current = None;
            return Err(e);
        }
        Ok(())
    }

    /// Rebuild the pipeline for `params` and announce what changed
    fn apply_params(&self, params: Params) -> Result<(), MixerError> {
        let old = self.core.params();
        self.core.reconfigure(params)?;
        if let Some(rate) = self.core.input.input_rate() {
            self.core.input.configure(
                rate,
                params.processing_rate(),
                params.quality.interpolation,
                params.frames_per_period,
            )?;
        }
        if old.quality != params.quality {
            self.core.emit(MixerEvent::QualitySettingsChanged(params.quality));
        }
        if old.processing_rate() != params.processing_rate() || old.output_rate != params.output_rate {
            self.core.emit(MixerEvent::SampleRateChanged {
                processing: params.processing_rate(),
                output: params.output_rate,
            });
        }
        Ok(())
    }

    fn start_locked(&self, slot: &mut DeviceSlot) -> Result<(), MixerError> {
        if slot.running {
            return Ok(());
        }
        let Some(device) = slot.current.as_mut() else {
            return Ok(());
        };

        if slot.needs_fifo {
            let fifo = Arc::new(FifoBuffer::new(self.fifo_depth));
            let core = self.core.clone();
            let writer = FifoWriter::spawn(fifo.clone(), move || core.render_next_buffer())?;
            self.core.set_fifo(Some(fifo));
            slot.writer = Some(writer);
        }

        if let Err(e) = device.start(PeriodSource::new(self.core.clone())) {
            if let Some(mut writer) = slot.writer.take() {
                writer.finish();
            }
            self.core.set_fifo(None);
            return Err(e.into());
        }

        slot.running = true;
        info!(device = device.name(), "Processing started");
        Ok(())
    }

    /// Device first, so nothing pulls from the FIFO once the writer is gone
    fn stop_locked(&self, slot: &mut DeviceSlot) {
        if !slot.running {
            return;
        }
        if let Some(device) = slot.current.as_mut() {
            device.stop();
        }
        if let Some(mut writer) = slot.writer.take() {
            writer.finish();
        }
        self.core.set_fifo(None);
        slot.running = false;
        info!("Processing stopped");
    }

    pub fn start_processing(&self) -> Result<(), MixerError> {
        let mut slot = lock(&self.devices);
        self.start_locked(&mut slot)
    }

    pub fn stop_processing(&self) {
        let mut slot = lock(&self.devices);
        self.stop_locked(&mut slot);
    }

    pub fn is_processing(&self) -> bool {
        lock(&self.devices).running
    }

    /// Swap quality settings and restart the device pipeline
    pub fn change_quality(&self, quality: QualitySettings) -> Result<(), MixerError> {
        let mut slot = lock(&self.devices);
        let was_running = slot.running;
        self.stop_locked(&mut slot);
        self.apply_params(Params { quality, ..self.core.params() })?;
        info!(?quality, "Quality settings changed");
        if was_running {
            self.start_locked(&mut slot)?;
        }
        Ok(())
    }

    /// Only allowed while processing is stopped
    pub fn set_frames_per_period(&self, frames: usize) -> Result<(), MixerError> {
        let slot = lock(&self.devices);
        if slot.running {
            return Err(MixerError::Running);
        }
        if !(MIN_FRAMES_PER_PERIOD..=MAX_FRAMES_PER_PERIOD).contains(&frames) {
            return Err(MixdownError::InvalidPeriod(frames).into());
        }
        self.apply_params(Params { frames_per_period: frames, ..self.core.params() })
    }

    /// Take the global lock for a batch of handle/port changes
    pub fn lock(&self) -> MixerGuard<'_> {
        MixerGuard { registry: self.core.registry(), core: &self.core }
    }

    pub fn add_play_handle(&self, handle: Box<dyn PlayHandle>) -> Option<PlayHandleId> {
        self.lock().add_play_handle(handle)
    }

    pub fn remove_play_handle(&self, id: PlayHandleId) -> bool {
        self.lock().remove_play_handle(id)
    }

    /// Remove every handle owned by `track`
    pub fn remove_play_handles(&self, track: TrackId) -> usize {
        self.lock().remove_play_handles(track)
    }

    pub fn clear(&self) -> usize {
        self.lock().clear()
    }

    pub fn add_audio_port(&self, port: Arc<AudioPort>) -> bool {
        self.lock().add_audio_port(port)
    }

    pub fn remove_audio_port(&self, port: &Arc<AudioPort>) -> bool {
        self.lock().remove_audio_port(port)
    }

    pub fn has_play_handles(&self) -> bool {
        self.play_handle_count() > 0
    }

    pub fn play_handle_count(&self) -> usize {
        self.lock().play_handle_count()
    }

    /// Next period, popped from the FIFO when one is active (blocking) or
    /// rendered in place
    pub fn next_buffer(&self) -> SurroundBuffer {
        self.core.next_buffer()
    }

    /// Render one period regardless of the FIFO
    pub fn render_next_buffer(&self) -> SurroundBuffer {
        self.core.render_next_buffer()
    }

    /// Append captured interleaved stereo frames
    pub fn push_input_frames(&self, frames: &[f32]) {
        self.core.input.push(frames);
    }

    /// Frames captured during the previous period
    pub fn input_buffer(&self) -> Vec<f32> {
        self.core.input.read()
    }

    pub fn input_buffer_frames(&self) -> usize {
        self.core.input.read_frames()
    }

    pub fn frames_per_period(&self) -> usize {
        self.core.params().frames_per_period
    }

    pub fn channels(&self) -> usize {
        self.core.params().channels
    }

    pub fn cpu_load(&self) -> f32 {
        self.core.load.load()
    }

    pub fn load_monitor(&self) -> &LoadMonitor {
        &self.core.load
    }

    /// Sustained overrun on a real-time device
    pub fn critical_xruns(&self) -> bool {
        self.core.critical_xruns()
    }

    pub fn quality_settings(&self) -> QualitySettings {
        self.core.params().quality
    }

    pub fn base_sample_rate(&self) -> u32 {
        self.core.params().base_rate
    }

    pub fn processing_sample_rate(&self) -> u32 {
        self.core.params().processing_rate()
    }

    pub fn output_sample_rate(&self) -> u32 {
        self.core.params().output_rate
    }

    pub fn input_sample_rate(&self) -> u32 {
        self.core.input.input_rate().unwrap_or_else(|| self.processing_sample_rate())
    }

    pub fn master_gain(&self) -> f32 {
        self.core.master_gain()
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.core.set_master_gain(gain);
    }

    /// Left and right peaks of the last period
    pub fn peak_values(&self) -> (f32, f32) {
        (self.core.meter.peak(0), self.core.meter.peak(1))
    }

    pub fn is_clipping(&self) -> bool {
        self.core.meter.is_clipped()
    }

    pub fn current_read_buffer(&self) -> SurroundBuffer {
        self.core.current_read_buffer()
    }

    pub fn analysis_buffer(&self) -> SurroundBuffer {
        self.core.analysis_buffer()
    }

    pub fn audio_device_name(&self) -> Option<String> {
        lock(&self.devices).current.as_ref().map(|d| d.name().to_string())
    }

    pub fn midi_client_name(&self) -> Option<String> {
        lock(&self.midi).as_ref().map(|c| c.name().to_string())
    }

    pub fn has_fifo_writer(&self) -> bool {
        lock(&self.devices).writer.is_some()
    }

    pub fn fifo_underruns(&self) -> u64 {
        self.core.fifo_underruns()
    }

    pub fn worker_count(&self) -> usize {
        self.core.worker_count()
    }

    pub fn subscribe(&self) -> Receiver<MixerEvent> {
        let (tx, rx) = bounded(EVENT_QUEUE);
        self.core.subscribe(tx);
        rx
    }

    pub fn clip(sample: f32) -> f32 {
        clip(sample)
    }

    pub fn clear_audio_buffer(buffer: &mut AudioBuffer, frames: usize, offset: usize) {
        buffer.clear_range(frames, offset);
    }

    pub fn peak_value_left(buffer: &AudioBuffer) -> f32 {
        buffer.peak(0)
    }

    pub fn peak_value_right(buffer: &AudioBuffer) -> f32 {
        buffer.peak(1)
    }

    /// Mix `frames` frames of `buffer` into `port` at `offset`
    pub fn buffer_to_port(
        buffer: &StereoBuffer,
        frames: usize,
        offset: usize,
        volume: &VolumeVector,
        port: &AudioPort,
    ) {
        port.mix_in(buffer, frames, offset, volume);
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        self.stop_processing();
    }
}
