// Recognition orchestrator
//
// One `recognize()` call is one refresh cycle: drain the capture queue into
// the analysis window, run the active estimator when new samples arrived,
// turn its fundamental into an activation vector, quantize it, then record
// statistics and fold them into the notes still sounding.
//
// The orchestrator is ticked from a single consumer context. Only the sample
// queue and the settings registry are shared with other threads.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::capture::{CaptureEvent, CaptureThread, SampleQueue};
use crate::clock::{elapsed_ms, SystemTimeSource, TimeSource};
use crate::config::{AppConfig, EstimatorConfig, QuantizerConfig};
use crate::error::{log_capture_error, log_consistency_warning, CaptureError, ConfigError, ConsistencyError};
use crate::music::{note_name, NoteNotation};
use crate::settings::{SettingsChange, SettingsRegistry};
use crate::telemetry::{self, DiagnosticError, NotePhase};

use super::estimators::{Estimator, EstimatorKind, PitchEstimator};
use super::history::{NoteDescription, NoteHistory};
use super::quantizer::{NoteEvent, NoteTag, Quantizer, QuantizerListener};
use super::stats::{RefreshAggregates, RefreshStats, StatSample};

/// External note sink
pub type NoteSink = Box<dyn QuantizerListener + Send>;

/// Outcome of one refresh cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    /// Samples drained from the capture queue this cycle
    pub new_samples: usize,
    /// Queue length before the drain
    pub backlog: usize,
    /// Recognized fundamental, rounded to the nearest semitone
    pub semitone: Option<i32>,
    pub wave_length: Option<f64>,
    /// Time since the previous cycle in milliseconds
    pub refresh_ms: f64,
    /// Note events emitted during the cycle
    pub events: Vec<NoteEvent>,
}

/// Fans quantizer callbacks out to the history, the sinks and subscribers.
struct CycleDispatch<'a> {
    now: Instant,
    origin: Instant,
    forgotten_ms: f64,
    notation: NoteNotation,
    tonality: i32,
    history: &'a mut NoteHistory,
    stats: &'a RefreshStats,
    sinks: &'a mut [NoteSink],
    events_tx: &'a broadcast::Sender<NoteEvent>,
    events: &'a mut Vec<NoteEvent>,
}

impl CycleDispatch<'_> {
    fn emit(&mut self, event: NoteEvent) {
        // No subscriber is not an error
        let _ = self.events_tx.send(event.clone());
        self.events.push(event);
    }

    fn label(&self, semitone: i32) -> String {
        note_name(semitone, self.notation, self.tonality)
    }
}

impl QuantizerListener for CycleDispatch<'_> {
    fn note_started(&mut self, tag: NoteTag, semitone: i32, offset_ms: f64) {
        let start = self
            .now
            .checked_sub(Duration::from_secs_f64(offset_ms.abs() / 1000.0))
            .unwrap_or(self.now);
        let start_ms = (elapsed_ms(self.origin, start) - self.forgotten_ms).max(0.0);

        let mut note = NoteDescription::new(tag, semitone, start, start_ms);
        // Cycles between the back-dated onset and its confirmation
        let mut backlog: Vec<StatSample> = self
            .stats
            .samples()
            .filter(|sample| sample.time >= start)
            .copied()
            .collect();
        backlog.reverse();
        note.stats = backlog;
        self.history.start(note);

        tracing::info!(
            "[Recognizer] note started: {} (semitone {}, tag {}, {:.0} ms)",
            self.label(semitone),
            semitone,
            tag,
            offset_ms
        );
        telemetry::hub().record_note(NotePhase::Started, semitone, tag);
        for sink in self.sinks.iter_mut() {
            sink.note_started(tag, semitone, offset_ms);
        }
        self.emit(NoteEvent::Started {
            tag,
            semitone,
            offset_ms,
        });
    }

    fn note_finished(&mut self, tag: NoteTag, semitone: i32, offset_ms: f64) {
        let end = self
            .now
            .checked_sub(Duration::from_secs_f64(offset_ms.abs() / 1000.0))
            .unwrap_or(self.now);
        let duration_ms = self
            .history
            .front(semitone)
            .map(|note| elapsed_ms(note.start, end))
            .unwrap_or(0.0);
        match self.history.finish(semitone, duration_ms) {
            Ok(finished) if finished != tag => {
                tracing::warn!(
                    "[Recognizer] finished tag {} but history front of semitone {} is {}",
                    tag,
                    semitone,
                    finished
                );
            }
            Ok(_) => {}
            Err(err) => {
                log_consistency_warning(&err, "note_finished");
                telemetry::hub().record_error(DiagnosticError::Consistency, err.to_string());
            }
        }

        tracing::info!(
            "[Recognizer] note finished: {} (tag {}, {:.0} ms)",
            self.label(semitone),
            tag,
            duration_ms
        );
        telemetry::hub().record_note(NotePhase::Finished, semitone, tag);
        for sink in self.sinks.iter_mut() {
            sink.note_finished(tag, semitone, offset_ms);
        }
        self.emit(NoteEvent::Finished {
            tag,
            semitone,
            offset_ms,
        });
    }

    fn note_played(&mut self, semitone: i32, duration_ms: f64, offset_ms: f64) {
        for sink in self.sinks.iter_mut() {
            sink.note_played(semitone, duration_ms, offset_ms);
        }
        self.emit(NoteEvent::Played {
            semitone,
            duration_ms,
            offset_ms,
        });
    }
}

/// Drives refresh cycles and keeps the derived statistics and note history.
pub struct Recognizer {
    settings: Arc<SettingsRegistry>,
    settings_rx: broadcast::Receiver<SettingsChange>,
    capture: CaptureThread,
    capture_rx: broadcast::Receiver<CaptureEvent>,
    estimator_config: EstimatorConfig,
    quantizer_config: QuantizerConfig,
    estimator: Arc<Mutex<Estimator>>,
    quantizer: Quantizer,
    /// Analysis window, newest first
    window: VecDeque<f32>,
    time_source: Arc<dyn TimeSource>,
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    forgotten_ms: f64,
    last_cycle: Option<Instant>,
    stats: RefreshStats,
    history: NoteHistory,
    sinks: Vec<NoteSink>,
    events_tx: broadcast::Sender<NoteEvent>,
    notation: NoteNotation,
    tonality: i32,
}

impl Recognizer {
    /// Build a recognizer around an existing capture thread and settings.
    pub fn new(
        config: &AppConfig,
        settings: Arc<SettingsRegistry>,
        capture: CaptureThread,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let snapshot = settings.snapshot();
        let estimator = Arc::new(Mutex::new(Estimator::new(
            config.estimator.kind,
            &config.estimator,
            snapshot,
        )));
        settings.add_listener(&estimator);

        let quantizer = Quantizer::new(
            &config.quantizer,
            snapshot.semitone_min,
            snapshot.semitone_max,
            time_source.clone(),
        );
        let (events_tx, _) = broadcast::channel(256);

        tracing::info!(
            "[Recognizer] {} estimator over semitones [{}, {}]",
            config.estimator.kind,
            snapshot.semitone_min,
            snapshot.semitone_max
        );

        Self {
            settings_rx: settings.subscribe(),
            capture_rx: capture.subscribe(),
            settings,
            capture,
            estimator_config: config.estimator.clone(),
            quantizer_config: config.quantizer.clone(),
            estimator,
            quantizer,
            window: VecDeque::new(),
            time_source,
            started_at: None,
            paused_at: None,
            forgotten_ms: 0.0,
            last_cycle: None,
            stats: RefreshStats::new(config.recognition.stats_window_ms),
            history: NoteHistory::new(config.recognition.max_notes_per_semitone),
            sinks: Vec::new(),
            events_tx,
            notation: config.settings.notation,
            tonality: config.settings.tonality,
        }
    }

    /// Build everything from configuration: settings, queue, default
    /// transports and the system clock.
    pub fn from_config(config: &AppConfig) -> Self {
        let settings = SettingsRegistry::new(config.settings.to_settings());
        let queue = Arc::new(SampleQueue::new());
        let capture = CaptureThread::with_default_transports(queue, &config.capture);
        Self::new(config, settings, capture, Arc::new(SystemTimeSource::default()))
    }

    /// Select the active estimator, replacing the current one.
    pub fn init(&mut self, kind: EstimatorKind) {
        let estimator = Arc::new(Mutex::new(Estimator::new(
            kind,
            &self.estimator_config,
            self.settings.snapshot(),
        )));
        self.settings.add_listener(&estimator);
        self.estimator = estimator;
        self.window.clear();
        tracing::info!("[Recognizer] estimator set to {}", kind);
    }

    /// Begin recognition and start the selected transport, if any.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        let now = self.time_source.now();
        self.started_at = Some(now);
        self.paused_at = None;
        self.forgotten_ms = 0.0;
        self.last_cycle = None;

        if self.capture.current_transport().is_none() {
            tracing::warn!("[Recognizer] no transport selected, reading the sample queue only");
            return Ok(());
        }
        self.capture.start_capture().inspect_err(|err| {
            log_capture_error(err, "Recognizer::start");
        })
    }

    /// Pause or resume. Resuming discards whatever was queued meanwhile.
    pub fn pause(&mut self, paused: bool) {
        let now = self.time_source.now();
        match (paused, self.paused_at) {
            (true, None) => {
                self.paused_at = Some(now);
                self.capture.toggle_pause(true);
                tracing::info!("[Recognizer] paused");
            }
            (false, Some(since)) => {
                self.forgotten_ms += elapsed_ms(since, now);
                self.paused_at = None;
                self.last_cycle = None;
                self.capture.queue().clear();
                self.capture.toggle_pause(false);
                tracing::info!("[Recognizer] resumed after {:.0} ms", elapsed_ms(since, now));
            }
            _ => {}
        }
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Running time excluding pauses, in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        let Some(started) = self.started_at else {
            return 0.0;
        };
        let until = self.paused_at.unwrap_or_else(|| self.time_source.now());
        (elapsed_ms(started, until) - self.forgotten_ms).max(0.0)
    }

    /// Stop capture and flush every sounding note.
    pub fn cut_all(&mut self) -> Vec<NoteEvent> {
        self.capture.stop_capture();
        let events = self.flush_notes();
        self.window.clear();
        self.started_at = None;
        self.paused_at = None;
        self.last_cycle = None;
        events
    }

    /// Run one refresh cycle.
    pub fn recognize(&mut self) -> CycleReport {
        self.process_notifications();
        if self.started_at.is_none() || self.paused_at.is_some() {
            return CycleReport::default();
        }

        let now = self.time_source.now();
        let refresh_ms = self.last_cycle.map(|last| elapsed_ms(last, now)).unwrap_or(0.0);
        self.last_cycle = Some(now);

        // 1. drain
        let queue = self.capture.queue().clone();
        let backlog = queue.len();
        let fresh = queue.drain();
        let new_samples = fresh.len();
        for &sample in fresh.iter().rev() {
            self.window.push_front(sample);
        }

        // 2. estimate
        let fundamental = match self.estimator.lock() {
            Ok(mut estimator) => {
                let capacity = estimator.sample_latency().max(new_samples);
                self.window.truncate(capacity);
                if new_samples > 0 {
                    estimator.apply(self.window.make_contiguous());
                    estimator.estimate().fundamental
                } else {
                    None
                }
            }
            Err(_) => {
                tracing::error!("[Recognizer] estimator lock poisoned, skipping cycle");
                telemetry::hub().record_error(DiagnosticError::Estimator, "estimator lock poisoned");
                None
            }
        };

        // 3. activation vector
        let settings = self.settings.snapshot();
        let mut active = vec![false; settings.semitone_count()];
        let mut semitone = None;
        if let Some(fundamental) = fundamental {
            let nearest = fundamental.nearest_semitone();
            match settings.semitone_index(nearest) {
                Some(index) => {
                    active[index] = true;
                    semitone = Some(nearest);
                }
                None => log_consistency_warning(
                    &ConsistencyError::SemitoneOutOfRange {
                        semitone: nearest,
                        min: settings.semitone_min,
                        max: settings.semitone_max,
                    },
                    "Recognizer::recognize",
                ),
            }
        }

        // 4. quantize
        let mut events = Vec::new();
        {
            let mut dispatch = CycleDispatch {
                now,
                origin: self.started_at.unwrap_or(now),
                forgotten_ms: self.forgotten_ms,
                notation: self.notation,
                tonality: self.tonality,
                history: &mut self.history,
                stats: &self.stats,
                sinks: &mut self.sinks,
                events_tx: &self.events_tx,
                events: &mut events,
            };
            self.quantizer
                .quantize(&active, settings.semitone_min, &mut dispatch);
        }

        // 5-7. statistics
        let sample = StatSample {
            time: now,
            refresh_ms,
            min_stored: self.quantizer.min_stored(),
            backlog,
        };
        self.stats.record(sample);
        if refresh_ms > 0.0 {
            telemetry::hub().record_refresh(refresh_ms as f32);
        }
        telemetry::hub().record_backlog("capture_queue", backlog);

        // 8. reliability of sounding notes
        if let Some(current) = semitone {
            let reliability = self.quantizer.channel(current).map(|c| c.reliability());
            if let (Some(note), Some(reliability)) = (self.history.front_mut(current), reliability) {
                if !note.is_finished() {
                    note.observe(reliability, sample);
                }
            }
        }

        CycleReport {
            new_samples,
            backlog,
            semitone,
            wave_length: fundamental.map(|f| f.wave_length),
            refresh_ms,
            events,
        }
    }

    fn process_notifications(&mut self) {
        loop {
            match self.capture_rx.try_recv() {
                Ok(event) => self.on_capture_event(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("[Recognizer] missed {} capture notifications", skipped);
                }
                Err(_) => break,
            }
        }
        loop {
            match self.settings_rx.try_recv() {
                Ok(change) => self.on_settings_change(change),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("[Recognizer] missed {} settings notifications", skipped);
                    self.rebuild_quantizer();
                    self.window.clear();
                }
                Err(_) => break,
            }
        }
    }

    fn on_capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::SamplingRateChanged { rate } => {
                if let Some(hz) = rate.hz() {
                    if self.settings.sampling_rate() != Some(hz) {
                        if let Err(err) = self.settings.set_sampling_rate(Some(hz)) {
                            tracing::warn!("[Recognizer] rejected sampling rate {}: {}", hz, err);
                        }
                    }
                }
            }
            CaptureEvent::ErrorRaised { code, message } => {
                tracing::warn!("[Recognizer] capture error {}: {}", code, message);
            }
            CaptureEvent::CaptureStopped => {
                tracing::debug!("[Recognizer] capture stopped");
            }
            other => tracing::trace!("[Recognizer] capture event {:?}", other),
        }
    }

    fn on_settings_change(&mut self, change: SettingsChange) {
        match change {
            SettingsChange::SemitoneBounds { .. } => self.rebuild_quantizer(),
            SettingsChange::SamplingRate(_) => self.window.clear(),
            SettingsChange::TuningFrequency(_) => {}
        }
    }

    /// Close every open note and resize the quantizer to the current bounds.
    fn rebuild_quantizer(&mut self) {
        self.flush_notes();
        let (min, max) = self.settings.semitone_bounds();
        self.quantizer.resize(min, max);
        tracing::debug!("[Recognizer] quantizer resized to [{}, {}]", min, max);
    }

    fn flush_notes(&mut self) -> Vec<NoteEvent> {
        let now = self.time_source.now();
        let mut events = Vec::new();
        let mut dispatch = CycleDispatch {
            now,
            origin: self.started_at.unwrap_or(now),
            forgotten_ms: self.forgotten_ms,
            notation: self.notation,
            tonality: self.tonality,
            history: &mut self.history,
            stats: &self.stats,
            sinks: &mut self.sinks,
            events_tx: &self.events_tx,
            events: &mut events,
        };
        self.quantizer.cut_all(&mut dispatch);
        events
    }

    pub fn add_sink(&mut self, sink: NoteSink) {
        self.sinks.push(sink);
    }

    /// Note events of every later cycle.
    pub fn subscribe(&self) -> broadcast::Receiver<NoteEvent> {
        self.events_tx.subscribe()
    }

    pub fn settings(&self) -> &Arc<SettingsRegistry> {
        &self.settings
    }

    pub fn capture(&self) -> &CaptureThread {
        &self.capture
    }

    pub fn queue(&self) -> &Arc<SampleQueue> {
        self.capture.queue()
    }

    pub fn estimator_kind(&self) -> EstimatorKind {
        self.estimator
            .lock()
            .map(|e| e.kind())
            .unwrap_or(self.estimator_config.kind)
    }

    /// Estimator window plus quantizer confirmation delay, in milliseconds.
    pub fn latency_ms(&self) -> f64 {
        let estimator = self.estimator.lock().map(|e| e.latency_ms()).unwrap_or(0.0);
        estimator + self.quantizer.tolerance_ms()
    }

    pub fn quantizer(&self) -> &Quantizer {
        &self.quantizer
    }

    pub fn history(&self) -> &NoteHistory {
        &self.history
    }

    pub fn statistics(&self) -> &RefreshStats {
        &self.stats
    }

    pub fn aggregates(&self) -> RefreshAggregates {
        self.stats.aggregates()
    }

    /// Refresh time of the latest cycle in milliseconds.
    pub fn refresh_ms(&self) -> f64 {
        self.stats.latest().map(|s| s.refresh_ms).unwrap_or(0.0)
    }

    pub fn avg_refresh_ms(&self) -> f64 {
        self.stats.aggregates().avg_refresh_ms
    }

    pub fn jitter_ms(&self) -> f64 {
        self.stats.aggregates().jitter_ms
    }

    /// Smallest and largest capture backlog over the statistics window.
    pub fn backlog_bounds(&self) -> (usize, usize) {
        let aggregates = self.stats.aggregates();
        (aggregates.min_backlog, aggregates.max_backlog)
    }

    /// Change the semitone range; open notes are flushed on the next cycle.
    pub fn set_semitone_bounds(&self, min: i32, max: i32) -> Result<(), ConfigError> {
        self.settings.set_semitone_bounds(min, max)
    }
}
