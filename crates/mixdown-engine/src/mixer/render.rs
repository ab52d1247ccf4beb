//! Per-period render pipeline

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use crossbeam_channel::Sender;
use mixdown_core::{clip, QualitySettings, StereoBuffer, SurroundBuffer, VolumeVector};
use tracing::{debug, trace};

use super::events::MixerEvent;
use super::registry::{lock_slot, Registry, SharedSlot};
use crate::audio_port::AudioPort;
use crate::buffer_pool::BufferPool;
use crate::fifo::FifoBuffer;
use crate::input::InputFrames;
use crate::meter::{LoadMonitor, PeakMeter};
use crate::play_handle::RenderContext;
use crate::resampler::{ConverterError, SampleRateConverter};
use crate::worker_pool::{Job, WorkerPool};

/// Engine shape, changed only while processing is stopped
#[derive(Debug, Clone, Copy)]
pub(crate) struct Params {
    pub quality: QualitySettings,
    pub frames_per_period: usize,
    pub channels: usize,
    pub base_rate: u32,
    pub output_rate: u32,
    pub pool_depth: usize,
}

impl Params {
    pub fn processing_rate(&self) -> u32 {
        self.base_rate * self.quality.sample_rate_multiplier() as u32
    }

    pub fn working_frames(&self) -> usize {
        self.frames_per_period * self.quality.sample_rate_multiplier()
    }
}

/// Buffers owned by whichever thread is rendering
struct RenderState {
    params: Params,
    pool: BufferPool,
    /// Master bus at the processing rate
    work: SurroundBuffer,
    decimator: Option<SampleRateConverter>,
    period: u64,
}

impl RenderState {
    fn new(params: Params) -> Result<Self, ConverterError> {
        let multiplier = params.quality.sample_rate_multiplier();
        let decimator = if multiplier > 1 {
            Some(SampleRateConverter::new(
                params.processing_rate(),
                params.base_rate,
                params.channels,
                params.quality.interpolation,
                params.working_frames(),
            )?)
        } else {
            None
        };
        Ok(Self {
            params,
            pool: BufferPool::new(params.pool_depth, params.frames_per_period, params.channels),
            work: SurroundBuffer::new(params.working_frames(), params.channels),
            decimator,
            period: 0,
        })
    }
}

/// Add stereo `src` into `dst`, output channel `c` taking source channel `c % 2`
pub(crate) fn mix_stereo_into(dst: &mut SurroundBuffer, src: &StereoBuffer, frames: usize, volume: &VolumeVector) {
    for (out, input) in dst.frames_iter_mut().zip(src.frames_iter()).take(frames) {
        for (channel, sample) in out.iter_mut().enumerate() {
            *sample += input[channel % 2] * volume.gain(channel);
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// State shared between the mixer, its device and the FIFO writer
pub(crate) struct MixerCore {
    params: RwLock<Params>,
    pub registry: Mutex<Registry>,
    render: Mutex<RenderState>,
    workers: Option<WorkerPool>,
    pub input: InputFrames,
    pub load: LoadMonitor,
    pub meter: PeakMeter,
    master_gain: AtomicU32,
    pub realtime: AtomicBool,
    fifo: RwLock<Option<Arc<FifoBuffer<SurroundBuffer>>>>,
    subscribers: Mutex<Vec<Sender<MixerEvent>>>,
}

impl MixerCore {
    pub fn new(params: Params, workers: usize, master_gain: f32) -> Result<Self, super::MixerError> {
        let workers = if workers > 1 { Some(WorkerPool::new(workers)?) } else { None };
        Ok(Self {
            render: Mutex::new(RenderState::new(params)?),
            params: RwLock::new(params),
            registry: Mutex::new(Registry::new()),
            workers,
            input: InputFrames::new(),
            load: LoadMonitor::new(),
            meter: PeakMeter::new(),
            master_gain: AtomicU32::new(master_gain.to_bits()),
            realtime: AtomicBool::new(true),
            fifo: RwLock::new(None),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn params(&self) -> Params {
        match self.params.read() {
            Ok(p) => *p,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Rebuild the render pipeline. Caller guarantees processing is stopped.
    pub fn reconfigure(&self, params: Params) -> Result<(), ConverterError> {
        let state = RenderState::new(params)?;
        *lock(&self.render) = state;
        match self.params.write() {
            Ok(mut p) => *p = params,
            Err(poisoned) => *poisoned.into_inner() = params,
        }
        debug!(
            frames = params.frames_per_period,
            channels = params.channels,
            processing_rate = params.processing_rate(),
            output_rate = params.output_rate,
            "Render pipeline rebuilt"
        );
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.as_ref().map(WorkerPool::size).unwrap_or(0)
    }

    pub fn registry(&self) -> MutexGuard<'_, Registry> {
        lock(&self.registry)
    }

    pub fn master_gain(&self) -> f32 {
        f32::from_bits(self.master_gain.load(Ordering::Relaxed))
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.master_gain.store(gain.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn critical_xruns(&self) -> bool {
        self.load.is_critical() && self.realtime.load(Ordering::Relaxed)
    }

    pub fn set_fifo(&self, fifo: Option<Arc<FifoBuffer<SurroundBuffer>>>) {
        match self.fifo.write() {
            Ok(mut f) => *f = fifo,
            Err(poisoned) => *poisoned.into_inner() = fifo,
        }
    }

    fn fifo(&self) -> Option<Arc<FifoBuffer<SurroundBuffer>>> {
        match self.fifo.read() {
            Ok(f) => f.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn fifo_underruns(&self) -> u64 {
        self.fifo().map(|f| f.underruns()).unwrap_or(0)
    }

    pub fn subscribe(&self, tx: Sender<MixerEvent>) {
        lock(&self.subscribers).push(tx);
    }

    pub fn emit(&self, event: MixerEvent) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => true,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        });
    }

    /// Pop the next prebuffered period, or render one in place
    pub fn next_buffer(&self) -> SurroundBuffer {
        match self.fifo() {
            Some(fifo) => fifo.read().unwrap_or_else(|| {
                let params = self.params();
                SurroundBuffer::new(params.frames_per_period, params.channels)
            }),
            None => self.render_next_buffer(),
        }
    }

    pub fn current_read_buffer(&self) -> SurroundBuffer {
        lock(&self.render).pool.read().clone()
    }

    pub fn analysis_buffer(&self) -> SurroundBuffer {
        lock(&self.render).pool.analysis().clone()
    }

    /// Render one period and return the read buffer
    pub fn render_next_buffer(&self) -> SurroundBuffer {
        let started = Instant::now();
        let mut guard = lock(&self.render);
        let state = &mut *guard;
        let params = state.params;
        let frames = params.working_frames();

        state.pool.advance();
        self.input.swap();
        state.period += 1;
        let ctx = RenderContext {
            frames,
            sample_rate: params.processing_rate(),
            quality: params.quality,
            period: state.period,
        };

        // Ports registered after this point are not cleared for the period
        // and stay out of routing until the next one
        let (snapshot, prepared): (Arc<[SharedSlot]>, Vec<Arc<AudioPort>>) = {
            let mut registry = self.registry();
            registry.apply_removals();
            for port in &registry.ports {
                port.prepare(frames);
            }
            (registry.entries.iter().map(|e| e.slot.clone()).collect(), registry.ports.clone())
        };
        let is_prepared = |port: &Arc<AudioPort>| prepared.iter().any(|p| Arc::ptr_eq(p, port));

        match &self.workers {
            Some(pool) if snapshot.len() > 1 => {
                let slots = snapshot.clone();
                let job: Job = Arc::new(move |worker, count| {
                    for slot in slots.iter().skip(worker).step_by(count.max(1)) {
                        lock_slot(slot).render(&ctx);
                    }
                });
                pool.run(&job);
            }
            _ => {
                for slot in snapshot.iter() {
                    lock_slot(slot).render(&ctx);
                }
            }
        }

        state.work.resize_frames(frames);
        state.work.clear();
        {
            let mut registry = self.registry();
            for entry in &registry.entries {
                if registry.pending_removal.contains(&entry.id) || entry.is_silenced() {
                    continue;
                }
                let slot = lock_slot(&entry.slot);
                if slot.faulted || slot.rendered_period != Some(ctx.period) {
                    continue;
                }
                let volume = slot.handle.volume();
                match &entry.port {
                    Some(port) if registry.has_port(port) && is_prepared(port) => {
                        port.mix_in(&slot.scratch, frames, 0, &volume)
                    }
                    _ => mix_stereo_into(&mut state.work, &slot.scratch, frames, &volume),
                }
            }
            registry.retire();

            for port in registry.ports.iter().filter(|p| p.is_enabled() && is_prepared(*p)) {
                let volume = port.volume();
                port.with_buffer(|buf| mix_stereo_into(&mut state.work, buf, frames, &volume));
            }
        }

        let gain = self.master_gain();
        if gain != 1.0 {
            state.work.as_mut_slice().iter_mut().for_each(|s| *s *= gain);
        }

        let out = state.pool.write_mut();
        match state.decimator.as_mut() {
            Some(decimator) => {
                if let Err(e) = decimator.process(state.work.as_slice()) {
                    debug!(error = %e, "Decimation failed, emitting silence");
                }
                decimator.read_exact_padded(out.as_mut_slice());
            }
            None => out.as_mut_slice().copy_from_slice(state.work.as_slice()),
        }
        self.meter.update(out.as_slice(), params.channels);
        out.as_mut_slice().iter_mut().for_each(|s| *s = clip(*s));

        let period_secs = params.frames_per_period as f64 / params.base_rate as f64;
        let percent = started.elapsed().as_secs_f64() / period_secs * 100.0;
        self.load.record(percent as f32);
        trace!(period = ctx.period, handles = snapshot.len(), load = self.load.load(), "Rendered period");

        let period = state.period;
        let read = state.pool.read().clone();
        drop(guard);
        self.emit(MixerEvent::NextAudioBuffer { period });
        read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_stereo_into_surround() {
        let mut dst = SurroundBuffer::new(2, 4);
        let src = StereoBuffer::from_interleaved(vec![0.25, 0.5, 0.25, 0.5], 2).unwrap();
        mix_stereo_into(&mut dst, &src, 2, &VolumeVector::unity());
        assert_eq!(dst.frame(0), &[0.25, 0.5, 0.25, 0.5]);

        mix_stereo_into(&mut dst, &src, 1, &VolumeVector::uniform(2.0));
        assert_eq!(dst.frame(0), &[0.75, 1.5, 0.75, 1.5]);
        assert_eq!(dst.frame(1), &[0.25, 0.5, 0.25, 0.5]);
    }

    #[test]
    fn test_params_rates() {
        let params = Params {
            quality: QualitySettings::high_quality(),
            frames_per_period: 128,
            channels: 2,
            base_rate: 44100,
            output_rate: 48000,
            pool_depth: 3,
        };
        assert_eq!(params.processing_rate(), 88200);
        assert_eq!(params.working_frames(), 256);
    }
}
