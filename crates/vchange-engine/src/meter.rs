//! Block loudness metering.
//!
//! The meter reports raw RMS in i16 sample units. Observers that want a
//! bounded display value divide by [`LEVEL_FULL_SCALE`] and clamp to [0, 1].

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// RMS of a full-scale square wave; the reference for display normalisation.
pub const LEVEL_FULL_SCALE: f32 = 32768.0;

/// Non-negative loudness of one block.
pub type LevelSample = f32;

/// Called from the audio worker once per block. Must return quickly and must
/// not panic; hand the value off to another thread if real work is needed.
pub type LevelObserver = Arc<dyn Fn(LevelSample) + Send + Sync>;

pub struct LevelMeter {
    last: AtomicU32,
    observers: RwLock<Arc<Vec<LevelObserver>>>,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self {
            last: AtomicU32::new(0f32.to_bits()),
            observers: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Root-mean-square over the raw samples.
    pub fn sample(block: &[i16]) -> LevelSample {
        if block.is_empty() {
            return 0.0;
        }
        let sum: f64 = block.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / block.len() as f64).sqrt() as f32
    }

    pub fn register(&self, observer: LevelObserver) {
        let mut slot = self.observers.write();
        let mut next = Vec::with_capacity(slot.len() + 1);
        next.extend(slot.iter().cloned());
        next.push(observer);
        *slot = Arc::new(next);
    }

    /// Store `level` and deliver it to every observer.
    pub fn report(&self, level: LevelSample) {
        let level = level.max(0.0);
        self.last.store(level.to_bits(), Ordering::Relaxed);
        let observers = self.observers.read().clone();
        for obs in observers.iter() {
            obs(level);
        }
    }

    /// Report silence; used whenever the engine leaves Running.
    pub fn reset(&self) {
        self.report(0.0);
    }

    pub fn level(&self) -> LevelSample {
        f32::from_bits(self.last.load(Ordering::Relaxed))
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(LevelMeter::sample(&[0; 1024]), 0.0);
        assert_eq!(LevelMeter::sample(&[]), 0.0);
    }

    #[test]
    fn rms_of_square_wave_is_its_amplitude() {
        let block: Vec<i16> = (0..1024).map(|i| if i % 2 == 0 { 1000 } else { -1000 }).collect();
        assert!((LevelMeter::sample(&block) - 1000.0).abs() < 1e-3);
    }

    #[test]
    fn full_scale_is_not_capped() {
        let block = vec![i16::MIN; 16];
        assert_eq!(LevelMeter::sample(&block), LEVEL_FULL_SCALE);
    }

    #[test]
    fn observers_receive_reports() {
        let meter = LevelMeter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        meter.register(Arc::new(move |l| sink.lock().push(l)));
        meter.report(12.5);
        meter.reset();
        assert_eq!(*seen.lock(), vec![12.5, 0.0]);
        assert_eq!(meter.level(), 0.0);
    }
}
