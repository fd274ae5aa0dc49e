//! Time sources for the quantizer and the orchestrator.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Trait representing a monotonic time source.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// Default time source backed by `Instant::now`.
#[derive(Default)]
pub struct SystemTimeSource {
    _unit: (),
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests and offline analysis.
///
/// Time only moves when [`ManualTimeSource::advance`] is called, so a file
/// can be analysed faster than real time with the same timing semantics.
pub struct ManualTimeSource {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, step: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset += step;
        }
    }

    pub fn advance_ms(&self, ms: f64) {
        self.advance(Duration::from_secs_f64(ms.max(0.0) / 1000.0));
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().map(|o| *o).unwrap_or_default();
        self.origin + offset
    }
}

/// Milliseconds elapsed from `earlier` to `later`, as a float.
pub fn elapsed_ms(earlier: Instant, later: Instant) -> f64 {
    later.saturating_duration_since(earlier).as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let clock = ManualTimeSource::new();
        let start = clock.now();
        assert_eq!(clock.now(), start);

        clock.advance_ms(20.0);
        assert!((elapsed_ms(start, clock.now()) - 20.0).abs() < 1e-6);

        clock.advance(Duration::from_millis(5));
        assert!((elapsed_ms(start, clock.now()) - 25.0).abs() < 1e-6);
    }

    #[test]
    fn elapsed_saturates_backwards() {
        let clock = ManualTimeSource::new();
        let start = clock.now();
        clock.advance_ms(10.0);
        assert_eq!(elapsed_ms(clock.now(), start), 0.0);
    }
}
