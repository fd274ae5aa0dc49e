use super::*;

use std::sync::atomic::AtomicUsize;

/// Scripted backend for driving the capture thread in tests.
struct MockTransport {
    name: &'static str,
    available: bool,
    fail_after: Option<usize>,
    options: TransportOptions,
    sessions: Arc<AtomicUsize>,
}

impl MockTransport {
    fn new(name: &'static str, available: bool) -> Self {
        Self {
            name,
            available,
            fail_after: None,
            options: TransportOptions::default(),
            sessions: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl CaptureTransport for MockTransport {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "scripted test transport"
    }

    fn probe(&mut self) -> Result<(), CaptureError> {
        if self.available {
            Ok(())
        } else {
            Err(CaptureError::BackendUnavailable {
                backend: self.name.to_string(),
                reason: "not installed".to_string(),
            })
        }
    }

    fn options(&self) -> &TransportOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut TransportOptions {
        &mut self.options
    }

    fn capture_init(&mut self) -> Result<(), CaptureError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn capture_loop(&mut self, ctx: &CaptureContext<'_>) -> Result<(), CaptureError> {
        ctx.report_sampling_rate(8000);
        let mut packets = 0;
        while ctx.should_continue() {
            ctx.deliver(&[0.1; 32])?;
            packets += 1;
            if self.fail_after.is_some_and(|limit| packets >= limit) {
                return Err(CaptureError::StreamFailure {
                    reason: "device unplugged".to_string(),
                });
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

fn drain_events(rx: &mut broadcast::Receiver<CaptureEvent>) -> Vec<CaptureEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn capture_with(transports: Vec<MockTransport>) -> CaptureThread {
    let capture = CaptureThread::new(Arc::new(SampleQueue::new()));
    for transport in transports {
        capture.register(Box::new(transport));
    }
    capture
}

#[test]
fn test_list_transports_reports_lazy_status() {
    let capture = capture_with(vec![
        MockTransport::new("JACK", false),
        MockTransport::new("ALSA", true),
    ]);
    let listing = capture.list_transports();
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].name, "JACK");
    assert!(listing[0].status.contains("not installed"));
    assert_eq!(listing[1].status, "available");
}

#[test]
fn test_select_unknown_transport_is_rejected() {
    let capture = capture_with(vec![MockTransport::new("ALSA", true)]);
    assert_eq!(
        capture.select_transport("OSS"),
        Err(ConfigError::UnknownTransport {
            name: "OSS".to_string()
        })
    );
    assert_eq!(capture.current_transport(), None);
}

#[test]
fn test_auto_detect_picks_first_available_and_notifies_once() {
    let capture = capture_with(vec![
        MockTransport::new("JACK", false),
        MockTransport::new("ALSA", true),
        MockTransport::new("SYNTH", true),
    ]);
    let mut rx = capture.subscribe();

    assert_eq!(capture.auto_detect_transport().unwrap(), Some("ALSA".to_string()));
    assert_eq!(capture.auto_detect_transport().unwrap(), Some("ALSA".to_string()));

    let changes: Vec<_> = drain_events(&mut rx)
        .into_iter()
        .filter(|event| matches!(event, CaptureEvent::TransportChanged { .. }))
        .collect();
    assert_eq!(
        changes,
        vec![CaptureEvent::TransportChanged {
            name: "ALSA".to_string()
        }]
    );
}

#[test]
fn test_auto_detect_without_available_transport_clears_selection() {
    let capture = capture_with(vec![MockTransport::new("JACK", false)]);
    assert_eq!(capture.auto_detect_transport().unwrap(), None);
    assert_eq!(capture.current_transport(), None);
}

#[test]
fn test_start_without_transport_is_noop() {
    let capture = capture_with(vec![]);
    assert!(capture.start_capture().is_ok());
    assert!(!capture.is_running());
    capture.stop_capture();
}

#[test]
fn test_stop_guarantees_no_further_writes() {
    let capture = capture_with(vec![MockTransport::new("ALSA", true)]);
    capture.select_transport("ALSA").unwrap();
    capture.start_capture().unwrap();
    assert!(wait_until(|| capture.queue().len() >= 64));
    assert!(capture.is_capturing());
    assert_eq!(capture.packet_size(), 32);

    capture.stop_capture();
    assert!(!capture.is_capturing());
    capture.queue().clear();
    std::thread::sleep(Duration::from_millis(30));
    assert!(
        capture.queue().is_empty(),
        "queue must not grow after stop_capture returns"
    );

    capture.stop_capture();
}

#[test]
fn test_start_stop_emit_lifecycle_events() {
    let capture = capture_with(vec![MockTransport::new("ALSA", true)]);
    capture.select_transport("ALSA").unwrap();
    let mut rx = capture.subscribe();

    capture.start_capture().unwrap();
    assert!(wait_until(|| capture.is_capturing()));
    capture.stop_capture();

    let events = drain_events(&mut rx);
    assert!(events.contains(&CaptureEvent::CaptureStarted));
    assert!(events.contains(&CaptureEvent::CaptureToggled { capturing: true }));
    assert!(events.contains(&CaptureEvent::SamplingRateChanged {
        rate: SamplingRate::Hz(8000)
    }));
    assert_eq!(
        events.last(),
        Some(&CaptureEvent::CaptureToggled { capturing: false })
    );
}

#[test]
fn test_pause_discards_samples_but_keeps_capturing() {
    let capture = capture_with(vec![MockTransport::new("ALSA", true)]);
    capture.select_transport("ALSA").unwrap();
    capture.toggle_pause(true);
    capture.start_capture().unwrap();
    assert!(wait_until(|| capture.packet_size() == 32));
    std::thread::sleep(Duration::from_millis(20));

    assert!(capture.is_capturing());
    assert!(capture.queue().is_empty());

    capture.toggle_pause(false);
    assert!(wait_until(|| !capture.queue().is_empty()));
    capture.stop_capture();
}

#[test]
fn test_setters_require_a_transport() {
    let capture = capture_with(vec![MockTransport::new("ALSA", true)]);
    assert!(matches!(
        capture.set_port_name("mic"),
        Err(ConfigError::NoTransportSelected { .. })
    ));
    assert!(matches!(
        capture.set_sampling_rate(SamplingRate::Hz(48000)),
        Err(ConfigError::NoTransportSelected { .. })
    ));
}

#[test]
fn test_setter_emits_only_on_change_and_restarts_capture() {
    let transport = MockTransport::new("ALSA", true);
    let sessions = Arc::clone(&transport.sessions);
    let capture = capture_with(vec![transport]);
    capture.select_transport("ALSA").unwrap();
    capture.start_capture().unwrap();
    assert!(wait_until(|| capture.is_capturing()));
    let mut rx = capture.subscribe();

    capture.set_source("hw:1").unwrap();
    capture.set_source("hw:1").unwrap();
    assert!(wait_until(|| sessions.load(Ordering::SeqCst) == 2));
    assert!(capture.is_running());
    assert_eq!(capture.current_options().unwrap().source, "hw:1");

    let changes: Vec<_> = drain_events(&mut rx)
        .into_iter()
        .filter(|event| matches!(event, CaptureEvent::SourceChanged { .. }))
        .collect();
    assert_eq!(changes.len(), 1);
    capture.stop_capture();
}

#[test]
fn test_backend_failure_becomes_notification_and_stops_loop() {
    let mut transport = MockTransport::new("ALSA", true);
    transport.fail_after = Some(3);
    let capture = capture_with(vec![transport]);
    capture.select_transport("ALSA").unwrap();
    let mut rx = capture.subscribe();

    capture.start_capture().unwrap();
    assert!(wait_until(|| !capture.is_running() && !capture.is_capturing()));
    capture.stop_capture();

    let events = drain_events(&mut rx);
    assert!(events.iter().any(|event| matches!(
        event,
        CaptureEvent::ErrorRaised { code, message }
            if *code == crate::error::CaptureErrorCodes::STREAM_FAILURE
                && message.contains("unplugged")
    )));
}
