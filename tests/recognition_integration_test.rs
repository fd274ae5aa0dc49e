//! End-to-end recognition tests
//!
//! These tests drive the public API the way a refresh timer would: samples
//! are pushed into the capture queue in 20 ms packets, a manual clock is
//! advanced by one refresh period, and `recognize()` runs one cycle.

use std::sync::{Arc, Mutex};

use pitch_recognizer::analysis::{NoteEvent, QuantizerListener};
use pitch_recognizer::capture::{SignalGenerator, SyntheticSpec};
use pitch_recognizer::{
    AppConfig, CaptureThread, EstimatorKind, ManualTimeSource, Recognizer, SampleQueue,
    SettingsRegistry,
};

const RATE: u32 = 44_100;
const CYCLE_MS: f64 = 20.0;
const PACKET: usize = 882;

fn build(kind: EstimatorKind) -> (Recognizer, Arc<ManualTimeSource>) {
    let mut config = AppConfig::default();
    config.settings.sampling_rate = Some(RATE);
    config.settings.tuning_frequency = 440.0;
    config.settings.semitone_min = -48;
    config.settings.semitone_max = 48;
    config.estimator.kind = kind;

    let clock = Arc::new(ManualTimeSource::new());
    let settings = SettingsRegistry::new(config.settings.to_settings());
    let capture = CaptureThread::new(Arc::new(SampleQueue::new()));
    let mut recognizer = Recognizer::new(&config, settings, capture, clock.clone());
    recognizer.start().expect("start without transport");
    (recognizer, clock)
}

/// Push `cycles` packets of `generator` output (or silence) and collect events.
fn run(
    recognizer: &mut Recognizer,
    clock: &ManualTimeSource,
    generator: Option<&mut SignalGenerator>,
    cycles: usize,
) -> Vec<NoteEvent> {
    let mut events = Vec::new();
    let mut generator = generator;
    for _ in 0..cycles {
        clock.advance_ms(CYCLE_MS);
        let packet = match generator.as_deref_mut() {
            Some(generator) => generator.take(PACKET),
            None => vec![0.0; PACKET],
        };
        recognizer.queue().push_packet(&packet).unwrap();
        events.extend(recognizer.recognize().events);
    }
    events
}

fn started(events: &[NoteEvent]) -> Vec<&NoteEvent> {
    events
        .iter()
        .filter(|e| matches!(e, NoteEvent::Started { .. }))
        .collect()
}

#[test]
fn test_110_hz_sine_yields_one_note_at_a2() {
    let (mut recognizer, clock) = build(EstimatorKind::MultiCorrelation);
    let mut generator = SignalGenerator::new(SyntheticSpec::sine(110.0, 0.5), RATE);

    // 500 ms of signal
    let sounding = run(&mut recognizer, &clock, Some(&mut generator), 25);
    let notes = started(&sounding);
    assert_eq!(notes.len(), 1, "events: {:?}", sounding);
    assert!((notes[0].semitone() + 24).abs() <= 1);
    match notes[0] {
        NoteEvent::Started { offset_ms, .. } => {
            // back-dated by the confirmation delay
            assert!(*offset_ms <= -100.0 && *offset_ms > -200.0, "offset {}", offset_ms);
        }
        _ => unreachable!(),
    }

    let silence = run(&mut recognizer, &clock, None, 25);
    assert!(started(&silence).is_empty(), "events: {:?}", silence);
    let finished: Vec<_> = silence
        .iter()
        .filter(|e| matches!(e, NoteEvent::Finished { .. }))
        .collect();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].semitone(), notes[0].semitone());

    let note = recognizer.history().front(notes[0].semitone()).unwrap();
    assert!(note.is_finished());
    let duration = note.duration_ms.unwrap();
    assert!(duration > 200.0 && duration < 600.0, "duration {}", duration);
}

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<NoteEvent>>>);

impl QuantizerListener for SharedSink {
    fn note_started(&mut self, tag: u64, semitone: i32, offset_ms: f64) {
        self.0.lock().unwrap().note_started(tag, semitone, offset_ms);
    }

    fn note_finished(&mut self, tag: u64, semitone: i32, offset_ms: f64) {
        self.0.lock().unwrap().note_finished(tag, semitone, offset_ms);
    }

    fn note_played(&mut self, semitone: i32, duration_ms: f64, offset_ms: f64) {
        self.0.lock().unwrap().note_played(semitone, duration_ms, offset_ms);
    }
}

#[test]
fn test_sinks_and_subscribers_see_the_same_events() {
    let (mut recognizer, clock) = build(EstimatorKind::MultiCorrelation);
    let sink = SharedSink::default();
    recognizer.add_sink(Box::new(sink.clone()));
    let mut rx = recognizer.subscribe();

    let mut generator = SignalGenerator::new(SyntheticSpec::sine(220.0, 0.5), RATE);
    let mut events = run(&mut recognizer, &clock, Some(&mut generator), 20);
    events.extend(recognizer.cut_all());

    let mut broadcast = Vec::new();
    while let Ok(event) = rx.try_recv() {
        broadcast.push(event);
    }
    let sunk = sink.0.lock().unwrap().clone();

    assert!(!events.is_empty());
    assert_eq!(sunk, events);
    assert_eq!(broadcast, events);
    assert!(matches!(events.last(), Some(NoteEvent::Played { semitone: -12, .. })));
}

#[test]
fn test_silence_produces_no_notes() {
    let (mut recognizer, clock) = build(EstimatorKind::MultiCorrelation);
    let events = run(&mut recognizer, &clock, None, 50);
    assert!(events.is_empty());
    assert!(recognizer.history().is_empty());
    assert_eq!(recognizer.statistics().len(), 50);
}

#[test]
fn test_every_estimator_tracks_a_steady_tone() {
    for kind in EstimatorKind::ALL {
        let (mut recognizer, clock) = build(kind);
        let mut generator = SignalGenerator::new(SyntheticSpec::sine(220.0, 0.5), RATE);
        let events = run(&mut recognizer, &clock, Some(&mut generator), 30);
        let notes = started(&events);
        assert!(!notes.is_empty(), "{} produced no note", kind);
        assert!(
            (notes[0].semitone() + 12).abs() <= 1,
            "{} recognized semitone {}",
            kind,
            notes[0].semitone()
        );
    }
}
