//! Refresh statistics
//!
//! One [`StatSample`] is recorded per recognition cycle and kept for a
//! rolling window (one second by default). Aggregates are recomputed over
//! the retained samples after each pruning.

use std::collections::VecDeque;
use std::time::Instant;

use serde::Serialize;

use crate::clock::elapsed_ms;

/// Measurements taken at the end of one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatSample {
    pub time: Instant,
    /// Time since the previous cycle, in milliseconds
    pub refresh_ms: f64,
    /// Smallest quantizer window depth across channels
    pub min_stored: usize,
    /// Samples waiting in the capture queue before the drain
    pub backlog: usize,
}

/// Aggregates over the retained window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RefreshAggregates {
    pub min_refresh_ms: f64,
    pub max_refresh_ms: f64,
    pub avg_refresh_ms: f64,
    /// `max_refresh_ms - min_refresh_ms`
    pub jitter_ms: f64,
    pub min_backlog: usize,
    pub max_backlog: usize,
    pub sample_count: usize,
}

pub struct RefreshStats {
    window_ms: f64,
    /// Newest first
    samples: VecDeque<StatSample>,
    aggregates: RefreshAggregates,
}

impl RefreshStats {
    pub fn new(window_ms: f64) -> Self {
        Self {
            window_ms: window_ms.max(0.0),
            samples: VecDeque::new(),
            aggregates: RefreshAggregates::default(),
        }
    }

    /// Record a sample, drop everything older than the window and refresh
    /// the aggregates.
    pub fn record(&mut self, sample: StatSample) {
        let now = sample.time;
        self.samples.push_front(sample);
        while self
            .samples
            .back()
            .is_some_and(|oldest| elapsed_ms(oldest.time, now) > self.window_ms)
        {
            self.samples.pop_back();
        }
        self.recompute();
    }

    fn recompute(&mut self) {
        let count = self.samples.len();
        if count == 0 {
            self.aggregates = RefreshAggregates::default();
            return;
        }

        let mut aggregates = RefreshAggregates {
            min_refresh_ms: f64::MAX,
            max_refresh_ms: f64::MIN,
            min_backlog: usize::MAX,
            sample_count: count,
            ..RefreshAggregates::default()
        };
        let mut sum = 0.0;
        for sample in &self.samples {
            aggregates.min_refresh_ms = aggregates.min_refresh_ms.min(sample.refresh_ms);
            aggregates.max_refresh_ms = aggregates.max_refresh_ms.max(sample.refresh_ms);
            aggregates.min_backlog = aggregates.min_backlog.min(sample.backlog);
            aggregates.max_backlog = aggregates.max_backlog.max(sample.backlog);
            sum += sample.refresh_ms;
        }
        aggregates.avg_refresh_ms = sum / count as f64;
        aggregates.jitter_ms = aggregates.max_refresh_ms - aggregates.min_refresh_ms;
        self.aggregates = aggregates;
    }

    pub fn aggregates(&self) -> RefreshAggregates {
        self.aggregates
    }

    pub fn latest(&self) -> Option<&StatSample> {
        self.samples.front()
    }

    /// Retained samples, newest first.
    pub fn samples(&self) -> impl Iterator<Item = &StatSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.aggregates = RefreshAggregates::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(origin: Instant, at_ms: u64, refresh_ms: f64, backlog: usize) -> StatSample {
        StatSample {
            time: origin + Duration::from_millis(at_ms),
            refresh_ms,
            min_stored: 0,
            backlog,
        }
    }

    #[test]
    fn test_pruning_keeps_only_the_last_second() {
        let origin = Instant::now();
        let mut stats = RefreshStats::new(1000.0);
        for i in 0..=150u64 {
            stats.record(sample(origin, i * 20, 20.0, 0));
        }

        let newest = stats.latest().unwrap().time;
        assert!(stats
            .samples()
            .all(|s| newest.duration_since(s.time) <= Duration::from_millis(1000)));
        // 3000 ms back to 2000 ms inclusive
        assert_eq!(stats.len(), 51);
    }

    #[test]
    fn test_aggregates_and_jitter() {
        let origin = Instant::now();
        let mut stats = RefreshStats::new(1000.0);
        stats.record(sample(origin, 0, 18.0, 100));
        stats.record(sample(origin, 20, 22.0, 300));
        stats.record(sample(origin, 40, 20.0, 200));

        let aggregates = stats.aggregates();
        assert_eq!(aggregates.sample_count, 3);
        assert_eq!(aggregates.min_refresh_ms, 18.0);
        assert_eq!(aggregates.max_refresh_ms, 22.0);
        assert!((aggregates.avg_refresh_ms - 20.0).abs() < 1e-9);
        assert!((aggregates.jitter_ms - 4.0).abs() < 1e-9);
        assert_eq!((aggregates.min_backlog, aggregates.max_backlog), (100, 300));
    }

    #[test]
    fn test_old_outliers_leave_the_window() {
        let origin = Instant::now();
        let mut stats = RefreshStats::new(1000.0);
        stats.record(sample(origin, 0, 250.0, 0));
        stats.record(sample(origin, 1500, 20.0, 0));
        assert_eq!(stats.len(), 1);
        assert_eq!(stats.aggregates().jitter_ms, 0.0);
    }
}
