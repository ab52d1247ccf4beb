//! Output metering and CPU load tracking

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use mixdown_core::MAX_CHANNELS;

/// Load at or above this percentage counts as an overrun period
pub const CRITICAL_LOAD: f32 = 99.0;
/// Consecutive overrun periods before the engine starts shedding work
pub const CRITICAL_PERIODS: u32 = 8;
const SMOOTHING: f32 = 0.9;

/// Per-channel peaks of the last period (lock-free reads)
pub struct PeakMeter {
    peaks: [AtomicU32; MAX_CHANNELS],
    clipped: AtomicBool,
}

impl PeakMeter {
    pub fn new() -> Self {
        Self {
            peaks: std::array::from_fn(|_| AtomicU32::new(0)),
            clipped: AtomicBool::new(false),
        }
    }

    /// Peak of the last period, 0.0 for channels the buffer does not have
    pub fn peak(&self, channel: usize) -> f32 {
        self.peaks
            .get(channel)
            .map(|p| f32::from_bits(p.load(Ordering::Relaxed)))
            .unwrap_or(0.0)
    }

    pub fn is_clipped(&self) -> bool {
        self.clipped.load(Ordering::Relaxed)
    }

    pub fn clear_clip(&self) {
        self.clipped.store(false, Ordering::Relaxed);
    }

    /// Store peaks from an interleaved buffer measured before clipping
    pub(crate) fn update(&self, samples: &[f32], channels: usize) {
        let mut peaks = [0.0f32; MAX_CHANNELS];
        for frame in samples.chunks_exact(channels) {
            for (peak, sample) in peaks.iter_mut().zip(frame) {
                *peak = peak.max(sample.abs());
            }
        }
        for (slot, peak) in self.peaks.iter().zip(peaks) {
            slot.store(peak.to_bits(), Ordering::Relaxed);
        }
        if peaks.iter().any(|p| *p > 1.0) {
            self.clipped.store(true, Ordering::Relaxed);
        }
    }
}

impl Default for PeakMeter {
    fn default() -> Self {
        Self::new()
    }
}

struct LoadState {
    load: f32,
    overruns: u32,
}

/// Smoothed render time as a percentage of the period duration
pub struct LoadMonitor {
    state: Mutex<LoadState>,
    load_bits: AtomicU32,
    critical: AtomicBool,
}

impl LoadMonitor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LoadState { load: 0.0, overruns: 0 }),
            load_bits: AtomicU32::new(0),
            critical: AtomicBool::new(false),
        }
    }

    /// Smoothed load, 0..=100
    pub fn load(&self) -> f32 {
        f32::from_bits(self.load_bits.load(Ordering::Relaxed))
    }

    /// True after `CRITICAL_PERIODS` consecutive periods at or above `CRITICAL_LOAD`
    pub fn is_critical(&self) -> bool {
        self.critical.load(Ordering::Relaxed)
    }

    /// Feed one period's measurement (render time / period time * 100)
    pub fn record(&self, percent: f32) {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let sample = if percent.is_finite() { percent.clamp(0.0, 100.0) } else { 100.0 };
        state.load = (SMOOTHING * state.load + (1.0 - SMOOTHING) * sample).clamp(0.0, 100.0);
        if state.load >= CRITICAL_LOAD {
            state.overruns = state.overruns.saturating_add(1);
        } else {
            state.overruns = 0;
        }
        self.load_bits.store(state.load.to_bits(), Ordering::Relaxed);
        self.critical.store(state.overruns >= CRITICAL_PERIODS, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.load = 0.0;
        state.overruns = 0;
        self.load_bits.store(0, Ordering::Relaxed);
        self.critical.store(false, Ordering::Relaxed);
    }
}

impl Default for LoadMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peaks_per_channel() {
        let meter = PeakMeter::new();
        meter.update(&[0.1, -0.7, -0.3, 0.2], 2);
        assert_eq!(meter.peak(0), 0.3);
        assert_eq!(meter.peak(1), 0.7);
        assert_eq!(meter.peak(2), 0.0);
        assert_eq!(meter.peak(9), 0.0);
        assert!(!meter.is_clipped());

        meter.update(&[1.5, 0.0], 2);
        assert!(meter.is_clipped());
        meter.clear_clip();
        assert!(!meter.is_clipped());
    }

    #[test]
    fn test_load_smoothing() {
        let monitor = LoadMonitor::new();
        monitor.record(100.0);
        assert!((monitor.load() - 10.0).abs() < 1e-4);
        monitor.record(100.0);
        assert!((monitor.load() - 19.0).abs() < 1e-4);
    }

    #[test]
    fn test_load_stays_in_range() {
        let monitor = LoadMonitor::new();
        for _ in 0..500 {
            monitor.record(1000.0);
        }
        assert!(monitor.load() <= 100.0);
        monitor.record(f32::NAN);
        assert!(monitor.load() <= 100.0);
        for _ in 0..500 {
            monitor.record(-50.0);
        }
        assert!(monitor.load() >= 0.0);
    }

    #[test]
    fn test_critical_after_consecutive_overruns() {
        let monitor = LoadMonitor::new();
        // Converge to full load
        for _ in 0..200 {
            monitor.record(100.0);
        }
        assert!(monitor.is_critical());

        monitor.record(0.0);
        assert!(!monitor.is_critical());

        monitor.reset();
        assert_eq!(monitor.load(), 0.0);
        assert!(!monitor.is_critical());
    }

    #[test]
    fn test_not_critical_below_window() {
        let monitor = LoadMonitor::new();
        for _ in 0..200 {
            monitor.record(100.0);
        }
        monitor.record(0.0);
        for _ in 0..CRITICAL_PERIODS {
            monitor.record(100.0);
            assert!(!monitor.is_critical());
        }
        for _ in 0..100 {
            monitor.record(100.0);
        }
        assert!(monitor.is_critical());
    }
}
