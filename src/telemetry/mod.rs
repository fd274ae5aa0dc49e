//! Recognition telemetry
//!
//! A process-wide hub receives refresh timings, queue backlog, note lifecycle
//! and capture lifecycle reports from the capture thread and the
//! orchestrator. Events are kept in a bounded history and broadcast to live
//! subscribers (the CLI summary, tests).

use std::collections::{HashMap, VecDeque};
use std::sync::{LockResult, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub mod events;

pub use events::{CapturePhase, DiagnosticError, MetricEvent, NotePhase};

static HUB: Lazy<TelemetryHub> = Lazy::new(TelemetryHub::default);

/// Process-wide telemetry hub.
pub fn hub() -> &'static TelemetryHub {
    &HUB
}

// Telemetry stays usable after a panicking reporter.
fn relock<'a, T>(result: LockResult<MutexGuard<'a, T>>) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

/// Point-in-time view of the collector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Oldest first
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    /// Events pushed out of the bounded history
    pub evicted_events: u64,
    pub notes_started: u64,
    pub notes_finished: u64,
    pub errors: u64,
}

#[derive(Default)]
struct CollectorState {
    history: VecDeque<MetricEvent>,
    total: u64,
    evicted: u64,
    notes_started: u64,
    notes_finished: u64,
    errors: u64,
}

impl CollectorState {
    fn count(&mut self, event: &MetricEvent) {
        self.total += 1;
        match event {
            MetricEvent::Note {
                phase: NotePhase::Started,
                ..
            } => self.notes_started += 1,
            MetricEvent::Note {
                phase: NotePhase::Finished,
                ..
            } => self.notes_finished += 1,
            MetricEvent::Error { .. } => self.errors += 1,
            _ => {}
        }
    }
}

/// Bounded event history plus a broadcast stream.
pub struct TelemetryCollector {
    tx: broadcast::Sender<MetricEvent>,
    state: Mutex<CollectorState>,
    capacity: usize,
}

impl TelemetryCollector {
    pub fn new(channel_capacity: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            tx,
            state: Mutex::new(CollectorState::default()),
            capacity: history_capacity.max(1),
        }
    }

    pub fn publish(&self, event: MetricEvent) {
        {
            let mut state = relock(self.state.lock());
            state.count(&event);
            if state.history.len() >= self.capacity {
                state.history.pop_front();
                state.evicted += 1;
            }
            state.history.push_back(event.clone());
        }
        // Nobody listening is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let state = relock(self.state.lock());
        TelemetrySnapshot {
            recent: state.history.iter().cloned().collect(),
            total_events: state.total,
            evicted_events: state.evicted,
            notes_started: state.notes_started,
            notes_finished: state.notes_finished,
            errors: state.errors,
        }
    }
}

/// Fixed-size ring of refresh periods with a running sum.
struct RefreshWindow {
    periods: VecDeque<f32>,
    size: usize,
    sum: f32,
    /// Periods observed since the last publication
    pending: usize,
}

impl RefreshWindow {
    fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            periods: VecDeque::with_capacity(size),
            size,
            sum: 0.0,
            pending: 0,
        }
    }

    /// Add one period; returns the window aggregate once per full window.
    fn push(&mut self, period_ms: f32) -> Option<MetricEvent> {
        let period_ms = period_ms.max(0.0);
        if self.periods.len() == self.size {
            if let Some(oldest) = self.periods.pop_front() {
                self.sum -= oldest;
            }
        }
        self.periods.push_back(period_ms);
        self.sum += period_ms;
        self.pending += 1;
        if self.pending < self.size {
            return None;
        }
        self.pending = 0;

        let (min, max) = self
            .periods
            .iter()
            .fold((f32::MAX, 0.0_f32), |(lo, hi), &p| (lo.min(p), hi.max(p)));
        Some(MetricEvent::RefreshLatency {
            avg_ms: self.sum / self.periods.len() as f32,
            max_ms: max,
            jitter_ms: max - min,
            sample_count: self.periods.len(),
        })
    }
}

/// Collector plus the derived refresh and backlog gauges.
pub struct TelemetryHub {
    collector: TelemetryCollector,
    refresh: Mutex<RefreshWindow>,
    /// Last published backlog per queue
    backlog: Mutex<HashMap<&'static str, usize>>,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, history_capacity: usize, refresh_window: usize) -> Self {
        Self {
            collector: TelemetryCollector::new(channel_capacity, history_capacity),
            refresh: Mutex::new(RefreshWindow::new(refresh_window)),
            backlog: Mutex::new(HashMap::new()),
        }
    }

    pub fn collector(&self) -> &TelemetryCollector {
        &self.collector
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.collector.snapshot()
    }

    /// Feed the period of one recognition cycle. One aggregate is published
    /// per full window.
    pub fn record_refresh(&self, period_ms: f32) {
        let aggregate = relock(self.refresh.lock()).push(period_ms);
        if let Some(event) = aggregate {
            self.collector.publish(event);
        }
    }

    /// Report a queue backlog. Published on the first report, on a change
    /// above 10% and when the queue empties.
    pub fn record_backlog(&self, queue: &'static str, samples: usize) {
        let mut backlog = relock(self.backlog.lock());
        let publish = match backlog.get(queue) {
            None => true,
            Some(&last) if samples == 0 => last != 0,
            Some(&last) => last.abs_diff(samples) * 10 > last.max(1),
        };
        if publish {
            backlog.insert(queue, samples);
            drop(backlog);
            self.collector.publish(MetricEvent::Backlog {
                channel: queue.to_string(),
                samples,
            });
        }
    }

    pub fn record_note(&self, phase: NotePhase, semitone: i32, tag: u64) {
        self.collector.publish(MetricEvent::Note {
            phase,
            semitone,
            tag,
        });
    }

    pub fn record_capture_phase(&self, phase: CapturePhase) {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        self.collector
            .publish(MetricEvent::CaptureLifecycle { phase, timestamp_ms });
    }

    pub fn record_error(&self, code: DiagnosticError, context: impl Into<String>) {
        self.collector.publish(MetricEvent::Error {
            code,
            context: context.into(),
        });
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        // 50 cycles is one second at the default refresh rate
        Self::new(256, 128, 50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(phase: NotePhase, tag: u64) -> MetricEvent {
        MetricEvent::Note {
            phase,
            semitone: -24,
            tag,
        }
    }

    #[test]
    fn test_history_is_bounded_and_counts_survive_eviction() {
        let collector = TelemetryCollector::new(8, 2);
        collector.publish(note(NotePhase::Started, 1));
        collector.publish(note(NotePhase::Finished, 1));
        collector.publish(MetricEvent::Error {
            code: DiagnosticError::Consistency,
            context: "note_finished".to_string(),
        });

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.evicted_events, 1);
        assert_eq!(snapshot.total_events, 3);
        assert_eq!((snapshot.notes_started, snapshot.notes_finished), (1, 1));
        assert_eq!(snapshot.errors, 1);
        assert!(matches!(
            snapshot.recent[0],
            MetricEvent::Note {
                phase: NotePhase::Finished,
                ..
            }
        ));
    }

    #[test]
    fn test_refresh_aggregate_once_per_window() {
        let hub = TelemetryHub::new(8, 8, 4);
        for period in [20.0, 18.0, 22.0, 20.0, 40.0] {
            hub.record_refresh(period);
        }

        let aggregates: Vec<_> = hub
            .snapshot()
            .recent
            .into_iter()
            .filter(|event| matches!(event, MetricEvent::RefreshLatency { .. }))
            .collect();
        assert_eq!(aggregates.len(), 1);
        match &aggregates[0] {
            MetricEvent::RefreshLatency {
                avg_ms,
                max_ms,
                jitter_ms,
                sample_count,
            } => {
                assert!((avg_ms - 20.0).abs() < 1e-4);
                assert_eq!(*max_ms, 22.0);
                assert_eq!(*jitter_ms, 4.0);
                assert_eq!(*sample_count, 4);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_backlog_ignores_small_moves() {
        let hub = TelemetryHub::new(8, 8, 4);
        for samples in [882, 900, 1764, 0, 0] {
            hub.record_backlog("capture_queue", samples);
        }

        let published: Vec<usize> = hub
            .snapshot()
            .recent
            .iter()
            .filter_map(|event| match event {
                MetricEvent::Backlog { samples, .. } => Some(*samples),
                _ => None,
            })
            .collect();
        assert_eq!(published, vec![882, 1764, 0]);
    }

    #[test]
    fn test_subscribers_see_capture_lifecycle() {
        let hub = TelemetryHub::new(8, 8, 4);
        let mut rx = hub.collector().subscribe();
        hub.record_capture_phase(CapturePhase::Failed);
        hub.record_error(DiagnosticError::Transport, "device unplugged");

        assert!(matches!(
            rx.try_recv(),
            Ok(MetricEvent::CaptureLifecycle {
                phase: CapturePhase::Failed,
                ..
            })
        ));
        assert!(matches!(
            rx.try_recv(),
            Ok(MetricEvent::Error {
                code: DiagnosticError::Transport,
                ..
            })
        ));
    }
}
