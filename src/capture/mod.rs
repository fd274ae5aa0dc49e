//! Capture transport layer
//!
//! A [`CaptureThread`] owns a registry of [`CaptureTransport`] backends and
//! one background thread that runs the selected backend and fills the shared
//! [`SampleQueue`]. The consumer never blocks on audio: it drains the queue
//! whenever it is ticked.
//!
//! Lifecycle of the background loop:
//! - spawned once, on the first `start_capture`
//! - idle (polling every 10ms) until capture is requested
//! - capturing: `capture_init` then `capture_loop` of the current backend
//! - paused: the backend keeps running, delivered samples are discarded
//!
//! `stop_capture` clears the loop flag and waits until the session has
//! returned, so the queue receives nothing after it returns.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::config::CaptureConfig;
use crate::error::{log_capture_error, CaptureError, ConfigError, ErrorCode};
use crate::telemetry::{self, CapturePhase, DiagnosticError};

pub mod buffer_pool;
pub mod cpal_transport;
pub mod events;
pub mod queue;
pub mod synthetic;
pub mod transport;
pub mod wav_file;

pub use cpal_transport::CpalTransport;
pub use events::CaptureEvent;
pub use queue::SampleQueue;
pub use synthetic::{SignalGenerator, SyntheticPattern, SyntheticSpec, SyntheticTransport};
pub use transport::{CaptureTransport, SamplingRate, TransportInfo, TransportOptions};
pub use wav_file::WavFileTransport;

/// Poll period of the idle loop and of `stop_capture`
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// `stop_capture` logs a warning each time it has waited this long
const STOP_WARN_AFTER: Duration = Duration::from_secs(2);

struct TransportEntry {
    name: String,
    description: String,
    transport: Mutex<Box<dyn CaptureTransport>>,
    /// Mirror of the transport options, readable while the backend is busy
    options: Mutex<TransportOptions>,
    /// Lazily computed probe result
    status: Mutex<Option<String>>,
}

impl TransportEntry {
    fn new(transport: Box<dyn CaptureTransport>) -> Self {
        Self {
            name: transport.name().to_string(),
            description: transport.description().to_string(),
            options: Mutex::new(transport.options().clone()),
            transport: Mutex::new(transport),
            status: Mutex::new(None),
        }
    }

    fn lock_transport(&self) -> Result<MutexGuard<'_, Box<dyn CaptureTransport>>, ConfigError> {
        self.transport.lock().map_err(|_| ConfigError::LockPoisoned {
            component: format!("transport {}", self.name),
        })
    }

    fn options(&self) -> TransportOptions {
        self.options
            .lock()
            .map(|options| options.clone())
            .unwrap_or_default()
    }

    fn probe(&self) -> Result<(), CaptureError> {
        let result = match self.transport.lock() {
            Ok(mut transport) => transport.probe(),
            Err(_) => Err(CaptureError::LockPoisoned {
                component: format!("transport {}", self.name),
            }),
        };
        self.store_status(&result);
        result
    }

    fn store_status(&self, result: &Result<(), CaptureError>) {
        if let Ok(mut status) = self.status.lock() {
            *status = Some(match result {
                Ok(()) => "available".to_string(),
                Err(err) => err.message(),
            });
        }
    }

    fn status(&self) -> String {
        if let Some(status) = self.status.lock().ok().and_then(|s| s.clone()) {
            return status;
        }
        match self.transport.try_lock() {
            Ok(mut transport) => {
                let result = transport.probe();
                drop(transport);
                self.store_status(&result);
                match result {
                    Ok(()) => "available".to_string(),
                    Err(err) => err.message(),
                }
            }
            Err(TryLockError::WouldBlock) => "in use".to_string(),
            Err(TryLockError::Poisoned(_)) => "unavailable (poisoned)".to_string(),
        }
    }

    fn clear_status(&self) {
        if let Ok(mut status) = self.status.lock() {
            *status = None;
        }
    }
}

struct CaptureShared {
    alive: AtomicBool,
    looping: AtomicBool,
    in_run: AtomicBool,
    capturing: AtomicBool,
    paused: AtomicBool,
    packet_size: AtomicUsize,
    reported_rate: AtomicU32,
    current: Mutex<Option<Arc<TransportEntry>>>,
    queue: Arc<SampleQueue>,
    events: broadcast::Sender<CaptureEvent>,
}

impl CaptureShared {
    fn emit(&self, event: CaptureEvent) {
        let _ = self.events.send(event);
    }

    fn current(&self) -> Option<Arc<TransportEntry>> {
        self.current.lock().ok().and_then(|current| current.clone())
    }
}

/// Handle given to a backend while it captures.
pub struct CaptureContext<'a> {
    shared: &'a CaptureShared,
}

impl CaptureContext<'_> {
    /// False once `stop_capture` was requested.
    pub fn should_continue(&self) -> bool {
        self.shared.looping.load(Ordering::SeqCst) && self.shared.alive.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Relaxed)
    }

    /// Hand a packet of normalized mono samples to the consumer.
    pub fn deliver(&self, packet: &[f32]) -> Result<(), CaptureError> {
        self.shared
            .packet_size
            .store(packet.len(), Ordering::Relaxed);
        if self.is_paused() {
            return Ok(());
        }
        self.shared.queue.push_packet(packet)
    }

    /// Publish the rate the backend actually runs at.
    pub fn report_sampling_rate(&self, rate: u32) {
        if self.shared.reported_rate.swap(rate, Ordering::SeqCst) != rate {
            tracing::info!("[Capture] negotiated sampling rate {} Hz", rate);
            self.shared.emit(CaptureEvent::SamplingRateChanged {
                rate: SamplingRate::Hz(rate),
            });
        }
    }
}

/// Registry of capture backends plus the background capture loop.
pub struct CaptureThread {
    shared: Arc<CaptureShared>,
    transports: RwLock<Vec<Arc<TransportEntry>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureThread {
    pub fn new(queue: Arc<SampleQueue>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(CaptureShared {
                alive: AtomicBool::new(true),
                looping: AtomicBool::new(false),
                in_run: AtomicBool::new(false),
                capturing: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                packet_size: AtomicUsize::new(0),
                reported_rate: AtomicU32::new(0),
                current: Mutex::new(None),
                queue,
                events,
            }),
            transports: RwLock::new(Vec::new()),
            worker: Mutex::new(None),
        }
    }

    /// Build a capture thread with the platform backends registered, in
    /// probing order: every cpal host, the WAV file reader, and the
    /// synthetic generator when enabled.
    pub fn with_default_transports(queue: Arc<SampleQueue>, config: &CaptureConfig) -> Self {
        let capture = Self::new(queue);
        for transport in cpal_transport::CpalTransport::available(config) {
            capture.register(Box::new(transport));
        }
        capture.register(Box::new(WavFileTransport::with_path(&config.source)));
        if config.enable_synthetic {
            capture.register(Box::new(SyntheticTransport::new(config.synthetic.clone())));
        }
        capture
    }

    /// Register a backend. Registration order is the auto-detect order.
    pub fn register(&self, transport: Box<dyn CaptureTransport>) {
        let entry = Arc::new(TransportEntry::new(transport));
        tracing::debug!("[Capture] registered transport {}", entry.name);
        if let Ok(mut transports) = self.transports.write() {
            transports.push(entry);
        }
    }

    pub fn queue(&self) -> &Arc<SampleQueue> {
        &self.shared.queue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.shared.events.subscribe()
    }

    /// Registered transports with their (lazily probed) status.
    pub fn list_transports(&self) -> Vec<TransportInfo> {
        self.entries()
            .iter()
            .map(|entry| TransportInfo {
                name: entry.name.clone(),
                description: entry.description.clone(),
                status: entry.status(),
            })
            .collect()
    }

    /// Forget cached statuses so the next listing probes again.
    pub fn refresh_status(&self) {
        for entry in self.entries() {
            entry.clear_status();
        }
    }

    pub fn current_transport(&self) -> Option<String> {
        self.shared.current().map(|entry| entry.name.clone())
    }

    /// Options of the selected transport.
    pub fn current_options(&self) -> Option<TransportOptions> {
        self.shared.current().map(|entry| entry.options())
    }

    pub fn is_capturing(&self) -> bool {
        self.shared.capturing.load(Ordering::SeqCst)
    }

    /// Capture requested (the loop may still be opening the backend).
    pub fn is_running(&self) -> bool {
        self.shared.looping.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Relaxed)
    }

    /// Samples per read of the most recent packet.
    pub fn packet_size(&self) -> usize {
        self.shared.packet_size.load(Ordering::Relaxed)
    }

    /// Select the first transport whose probe succeeds.
    ///
    /// Capture is stopped around the switch and restarted if it was running.
    /// Returns the selected name, or `None` if nothing is available.
    pub fn auto_detect_transport(&self) -> Result<Option<String>, CaptureError> {
        let was_running = self.is_running();
        if was_running {
            self.stop_capture();
        }

        let mut selected = None;
        for entry in self.entries() {
            match entry.probe() {
                Ok(()) => {
                    tracing::info!("[Capture] auto-detected transport {}", entry.name);
                    selected = Some(entry);
                    break;
                }
                Err(err) => {
                    tracing::debug!("[Capture] {} unavailable: {}", entry.name, err.message());
                }
            }
        }

        let name = selected.as_ref().map(|entry| entry.name.clone());
        self.set_current(selected);

        if name.is_none() {
            tracing::warn!("[Capture] no capture transport available");
        } else if was_running {
            self.start_capture()?;
        }
        Ok(name)
    }

    /// Select a transport by name.
    pub fn select_transport(&self, name: &str) -> Result<(), ConfigError> {
        let entry = self
            .entries()
            .into_iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownTransport {
                name: name.to_string(),
            })?;

        if self
            .shared
            .current()
            .is_some_and(|current| Arc::ptr_eq(&current, &entry))
        {
            return Ok(());
        }

        let was_running = self.is_running();
        if was_running {
            self.stop_capture();
        }
        self.set_current(Some(entry));
        if was_running {
            if let Err(err) = self.start_capture() {
                log_capture_error(&err, "select_transport");
            }
        }
        Ok(())
    }

    /// Request capture. Returns immediately; a no-op without a transport.
    pub fn start_capture(&self) -> Result<(), CaptureError> {
        if self.shared.current().is_none() {
            tracing::warn!("[Capture] start requested with no transport selected");
            return Ok(());
        }
        self.shared.looping.store(true, Ordering::SeqCst);
        self.ensure_worker()
    }

    /// Stop capturing and wait until the backend has returned.
    ///
    /// Safe to call when capture is already stopped.
    pub fn stop_capture(&self) {
        self.shared.looping.store(false, Ordering::SeqCst);

        let started = Instant::now();
        let mut next_warning = STOP_WARN_AFTER;
        while self.shared.in_run.load(Ordering::SeqCst) {
            std::thread::sleep(POLL_INTERVAL);
            if started.elapsed() >= next_warning {
                tracing::warn!(
                    "[Capture] still waiting for the capture loop to stop ({:?})",
                    started.elapsed()
                );
                next_warning += STOP_WARN_AFTER;
            }
        }
    }

    /// Pause keeps the backend running but discards its samples.
    pub fn toggle_pause(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Relaxed);
        tracing::debug!("[Capture] paused={}", paused);
    }

    pub fn set_sampling_rate(&self, rate: SamplingRate) -> Result<(), ConfigError> {
        let changed = self.reconfigure(
            "set the sampling rate",
            |options| options.sampling_rate == rate,
            |transport| transport.set_sampling_rate(rate),
        )?;
        if changed {
            self.shared.emit(CaptureEvent::SamplingRateChanged { rate });
        }
        Ok(())
    }

    pub fn set_port_name(&self, name: &str) -> Result<(), ConfigError> {
        let changed = self.reconfigure(
            "set the port name",
            |options| options.port_name == name,
            |transport| transport.set_port_name(name),
        )?;
        if changed {
            self.shared.emit(CaptureEvent::PortNameChanged {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn set_source(&self, source: &str) -> Result<(), ConfigError> {
        let changed = self.reconfigure(
            "set the source",
            |options| options.source == source,
            |transport| transport.set_source(source),
        )?;
        if changed {
            self.shared.emit(CaptureEvent::SourceChanged {
                source: source.to_string(),
            });
        }
        Ok(())
    }

    fn entries(&self) -> Vec<Arc<TransportEntry>> {
        self.transports
            .read()
            .map(|transports| transports.clone())
            .unwrap_or_default()
    }

    fn set_current(&self, entry: Option<Arc<TransportEntry>>) {
        let changed = match self.shared.current.lock() {
            Ok(mut current) => {
                let same = match (current.as_ref(), entry.as_ref()) {
                    (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                    (None, None) => true,
                    _ => false,
                };
                *current = entry.clone();
                !same
            }
            Err(_) => false,
        };

        if changed {
            let name = entry.map(|entry| entry.name.clone()).unwrap_or_default();
            tracing::info!("[Capture] transport changed to '{}'", name);
            self.shared.reported_rate.store(0, Ordering::SeqCst);
            self.shared.emit(CaptureEvent::TransportChanged { name });
        }
    }

    /// Apply an option change to the selected transport, restarting capture
    /// around it. Returns whether the value actually changed.
    fn reconfigure(
        &self,
        operation: &str,
        unchanged: impl Fn(&TransportOptions) -> bool,
        apply: impl FnOnce(&mut dyn CaptureTransport) -> Result<(), CaptureError>,
    ) -> Result<bool, ConfigError> {
        let entry = self
            .shared
            .current()
            .ok_or_else(|| ConfigError::NoTransportSelected {
                operation: operation.to_string(),
            })?;

        if unchanged(&entry.options()) {
            return Ok(false);
        }

        let was_running = self.is_running();
        if was_running {
            self.stop_capture();
        }

        let result = {
            let mut transport = entry.lock_transport()?;
            let result = apply(transport.as_mut());
            if let Ok(mut mirror) = entry.options.lock() {
                *mirror = transport.options().clone();
            }
            result
        };
        entry.clear_status();

        if was_running {
            if let Err(err) = self.start_capture() {
                log_capture_error(&err, "reconfigure");
            }
        }

        result.map_err(|err| ConfigError::TransportRejected {
            transport: entry.name.clone(),
            reason: err.message(),
        })?;
        Ok(true)
    }

    fn ensure_worker(&self) -> Result<(), CaptureError> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| CaptureError::LockPoisoned {
                component: "capture_worker".to_string(),
            })?;
        if worker.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || run_capture_loop(shared))
            .map_err(|err| CaptureError::ThreadSpawnFailed {
                reason: err.to_string(),
            })?;
        *worker = Some(handle);
        Ok(())
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.shared.alive.store(false, Ordering::SeqCst);
        self.stop_capture();
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}

fn run_capture_loop(shared: Arc<CaptureShared>) {
    tracing::debug!("[Capture] capture thread started");
    while shared.alive.load(Ordering::SeqCst) {
        shared.in_run.store(true, Ordering::SeqCst);
        if !shared.looping.load(Ordering::SeqCst) {
            shared.in_run.store(false, Ordering::SeqCst);
            std::thread::sleep(POLL_INTERVAL);
            continue;
        }

        match shared.current() {
            Some(entry) => run_session(&shared, &entry),
            None => shared.looping.store(false, Ordering::SeqCst),
        }
        shared.in_run.store(false, Ordering::SeqCst);
    }
    tracing::debug!("[Capture] capture thread exiting");
}

fn run_session(shared: &CaptureShared, entry: &TransportEntry) {
    let mut transport = match entry.transport.lock() {
        Ok(transport) => transport,
        Err(_) => {
            shared.looping.store(false, Ordering::SeqCst);
            report_failure(
                shared,
                &CaptureError::LockPoisoned {
                    component: format!("transport {}", entry.name),
                },
            );
            return;
        }
    };

    let ctx = CaptureContext { shared };
    let result = transport.capture_init().and_then(|()| {
        shared.capturing.store(true, Ordering::SeqCst);
        tracing::info!("[Capture] capture started on {}", entry.name);
        telemetry::hub().record_capture_phase(CapturePhase::Started);
        shared.emit(CaptureEvent::CaptureStarted);
        shared.emit(CaptureEvent::CaptureToggled { capturing: true });
        transport.capture_loop(&ctx)
    });

    // The session is over whether the backend was stopped, ran dry or failed.
    shared.looping.store(false, Ordering::SeqCst);
    if let Err(err) = &result {
        report_failure(shared, err);
    }
    transport.capture_finished();

    if shared.capturing.swap(false, Ordering::SeqCst) {
        tracing::info!("[Capture] capture stopped on {}", entry.name);
        telemetry::hub().record_capture_phase(CapturePhase::Stopped);
        shared.emit(CaptureEvent::CaptureStopped);
        shared.emit(CaptureEvent::CaptureToggled { capturing: false });
    }
}

fn report_failure(shared: &CaptureShared, err: &CaptureError) {
    log_capture_error(err, "capture loop");
    telemetry::hub().record_capture_phase(CapturePhase::Failed);
    telemetry::hub().record_error(DiagnosticError::Transport, err.message());
    shared.emit(CaptureEvent::ErrorRaised {
        code: err.code(),
        message: err.message(),
    });
}

#[cfg(test)]
mod tests;
