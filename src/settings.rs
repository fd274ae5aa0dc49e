//! Settings registry
//!
//! Holds the tunables every analysis component depends on (sampling rate,
//! tuning reference, semitone range) and fans each change out to registered
//! listeners. The registry is an explicit context object shared through an
//! `Arc`; nothing here is process-global.
//!
//! Listeners are held weakly and invoked synchronously, in registration
//! order, from the thread that performed the change. A change raised from
//! inside a listener callback is queued and delivered once the current round
//! has reached every listener, so each listener always observes changes in
//! the order they were made.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ConfigError;
use crate::music::{semitone_to_frequency, DEFAULT_TUNING_FREQUENCY};

/// Lowest frequency a semitone bound may map to, in Hz
pub const LOWEST_FREQUENCY: f64 = 16.0;
/// Highest frequency a semitone bound may map to, in Hz
pub const HIGHEST_FREQUENCY: f64 = 24_000.0;

/// Check that `[min, max]` is ordered and maps inside
/// [`LOWEST_FREQUENCY`, `HIGHEST_FREQUENCY`] for `tuning_frequency`.
pub fn validate_semitone_bounds(min: i32, max: i32, tuning_frequency: f64) -> Result<(), ConfigError> {
    if min >= max {
        return Err(ConfigError::InvalidSemitoneBounds { min, max });
    }
    let lowest = semitone_to_frequency(min as f64, tuning_frequency);
    if !(lowest >= LOWEST_FREQUENCY) {
        return Err(ConfigError::FrequencyOutOfRange {
            semitone: min,
            frequency: lowest,
        });
    }
    let highest = semitone_to_frequency(max as f64, tuning_frequency);
    if !(highest <= HIGHEST_FREQUENCY) {
        return Err(ConfigError::FrequencyOutOfRange {
            semitone: max,
            frequency: highest,
        });
    }
    Ok(())
}

/// Snapshot of the analysis tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Sampling rate in Hz, `None` until a transport reports one
    pub sampling_rate: Option<u32>,
    /// Frequency of semitone 0 in Hz
    pub tuning_frequency: f64,
    pub semitone_min: i32,
    pub semitone_max: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sampling_rate: None,
            tuning_frequency: DEFAULT_TUNING_FREQUENCY,
            semitone_min: -48,
            semitone_max: 48,
        }
    }
}

impl Settings {
    /// Number of semitones in `[semitone_min, semitone_max]`.
    pub fn semitone_count(&self) -> usize {
        (self.semitone_max - self.semitone_min + 1).max(0) as usize
    }

    /// Zero-based index of `semitone` in the configured range.
    pub fn semitone_index(&self, semitone: i32) -> Option<usize> {
        if semitone < self.semitone_min || semitone > self.semitone_max {
            None
        } else {
            Some((semitone - self.semitone_min) as usize)
        }
    }

    /// Sampling rate usable for analysis (known and non-zero).
    pub fn analysis_rate(&self) -> Option<u32> {
        self.sampling_rate.filter(|rate| *rate > 0)
    }
}

/// Which tunable changed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SettingsChange {
    SamplingRate(Option<u32>),
    TuningFrequency(f64),
    SemitoneBounds { min: i32, max: i32 },
}

/// Component reacting to settings changes.
pub trait SettingsListener: Send {
    fn settings_changed(&mut self, change: SettingsChange, settings: &Settings);
}

type ListenerHandle = Weak<Mutex<dyn SettingsListener>>;

/// Shared registry of analysis settings with listener fan-out.
pub struct SettingsRegistry {
    values: RwLock<Settings>,
    listeners: Mutex<Vec<ListenerHandle>>,
    pending: Mutex<VecDeque<SettingsChange>>,
    dispatching: AtomicBool,
    changes_tx: broadcast::Sender<SettingsChange>,
}

impl SettingsRegistry {
    pub fn new(initial: Settings) -> Arc<Self> {
        let (changes_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            values: RwLock::new(initial),
            listeners: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            dispatching: AtomicBool::new(false),
            changes_tx,
        })
    }

    /// Current values.
    pub fn snapshot(&self) -> Settings {
        match self.values.read() {
            Ok(values) => *values,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn sampling_rate(&self) -> Option<u32> {
        self.snapshot().sampling_rate
    }

    pub fn tuning_frequency(&self) -> f64 {
        self.snapshot().tuning_frequency
    }

    pub fn semitone_bounds(&self) -> (i32, i32) {
        let settings = self.snapshot();
        (settings.semitone_min, settings.semitone_max)
    }

    /// Register a listener. It is kept until its last strong reference drops.
    pub fn add_listener<L>(&self, listener: &Arc<Mutex<L>>)
    where
        L: SettingsListener + 'static,
    {
        let dyn_listener: Arc<Mutex<dyn SettingsListener>> = listener.clone();
        let weak = Arc::downgrade(&dyn_listener);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(weak);
        }
    }

    /// Subscribe to changes from another thread.
    pub fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
        self.changes_tx.subscribe()
    }

    pub fn set_sampling_rate(&self, rate: Option<u32>) -> Result<(), ConfigError> {
        let changed = self.update(|values| {
            if values.sampling_rate == rate {
                return false;
            }
            values.sampling_rate = rate;
            true
        })?;
        if changed {
            log::info!("[Settings] sampling rate -> {:?}", rate);
            self.notify(SettingsChange::SamplingRate(rate));
        }
        Ok(())
    }

    pub fn set_tuning_frequency(&self, frequency: f64) -> Result<(), ConfigError> {
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(ConfigError::InvalidTuningFrequency { frequency });
        }
        let (min, max) = self.semitone_bounds();
        validate_semitone_bounds(min, max, frequency)?;
        let changed = self.update(|values| {
            if values.tuning_frequency == frequency {
                return false;
            }
            values.tuning_frequency = frequency;
            true
        })?;
        if changed {
            log::info!("[Settings] tuning frequency -> {} Hz", frequency);
            self.notify(SettingsChange::TuningFrequency(frequency));
        }
        Ok(())
    }

    pub fn set_semitone_bounds(&self, min: i32, max: i32) -> Result<(), ConfigError> {
        validate_semitone_bounds(min, max, self.tuning_frequency())?;
        let changed = self.update(|values| {
            if values.semitone_min == min && values.semitone_max == max {
                return false;
            }
            values.semitone_min = min;
            values.semitone_max = max;
            true
        })?;
        if changed {
            log::info!("[Settings] semitone bounds -> [{}, {}]", min, max);
            self.notify(SettingsChange::SemitoneBounds { min, max });
        }
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut Settings) -> bool) -> Result<bool, ConfigError> {
        let mut values = self.values.write().map_err(|_| ConfigError::LockPoisoned {
            component: "settings".to_string(),
        })?;
        Ok(apply(&mut values))
    }

    fn notify(&self, change: SettingsChange) {
        let _ = self.changes_tx.send(change);

        if let Ok(mut pending) = self.pending.lock() {
            pending.push_back(change);
        }

        loop {
            if self.dispatching.swap(true, Ordering::SeqCst) {
                // Another frame is delivering; it will pick up the queued change.
                return;
            }

            while let Some(next) = self.pop_pending() {
                self.deliver(next);
            }

            self.dispatching.store(false, Ordering::SeqCst);

            let more = self
                .pending
                .lock()
                .map(|pending| !pending.is_empty())
                .unwrap_or(false);
            if !more {
                return;
            }
        }
    }

    fn pop_pending(&self) -> Option<SettingsChange> {
        self.pending.lock().ok().and_then(|mut p| p.pop_front())
    }

    fn deliver(&self, change: SettingsChange) {
        let listeners: Vec<Arc<Mutex<dyn SettingsListener>>> = match self.listeners.lock() {
            Ok(mut listeners) => {
                listeners.retain(|weak| weak.strong_count() > 0);
                listeners.iter().filter_map(Weak::upgrade).collect()
            }
            Err(_) => return,
        };

        let settings = self.snapshot();
        for listener in listeners {
            match listener.lock() {
                Ok(mut listener) => listener.settings_changed(change, &settings),
                Err(_) => log::warn!("[Settings] skipping poisoned listener for {:?}", change),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        id: usize,
        log: Arc<Mutex<Vec<(usize, SettingsChange)>>>,
    }

    impl SettingsListener for Recorder {
        fn settings_changed(&mut self, change: SettingsChange, _settings: &Settings) {
            self.log.lock().unwrap().push((self.id, change));
        }
    }

    /// Raises a tuning change the first time it sees a rate change.
    struct Chained {
        registry: Weak<SettingsRegistry>,
        log: Arc<Mutex<Vec<(usize, SettingsChange)>>>,
    }

    impl SettingsListener for Chained {
        fn settings_changed(&mut self, change: SettingsChange, _settings: &Settings) {
            self.log.lock().unwrap().push((0, change));
            if let SettingsChange::SamplingRate(_) = change {
                if let Some(registry) = self.registry.upgrade() {
                    registry.set_tuning_frequency(442.0).unwrap();
                }
            }
        }
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.sampling_rate, None);
        assert_eq!(settings.tuning_frequency, 440.0);
        assert_eq!(settings.semitone_count(), 97);
        assert_eq!(settings.semitone_index(-48), Some(0));
        assert_eq!(settings.semitone_index(48), Some(96));
        assert_eq!(settings.semitone_index(49), None);
    }

    #[test]
    fn test_rejects_invalid_values_without_state_change() {
        let registry = SettingsRegistry::new(Settings::default());
        assert_eq!(
            registry.set_semitone_bounds(5, 5),
            Err(ConfigError::InvalidSemitoneBounds { min: 5, max: 5 })
        );
        assert!(registry.set_tuning_frequency(0.0).is_err());
        assert!(registry.set_tuning_frequency(f64::NAN).is_err());
        assert_eq!(registry.snapshot(), Settings::default());
    }

    #[test]
    fn test_rejects_bounds_outside_audible_range() {
        let registry = SettingsRegistry::new(Settings::default());
        let mut rx = registry.subscribe();

        // 440 Hz * 2^(-1000/12) is effectively 0 Hz
        assert!(matches!(
            registry.set_semitone_bounds(-1000, 0),
            Err(ConfigError::FrequencyOutOfRange { semitone: -1000, .. })
        ));
        assert!(matches!(
            registry.set_semitone_bounds(i32::MIN, i32::MAX),
            Err(ConfigError::FrequencyOutOfRange { semitone: i32::MIN, .. })
        ));
        // 440 Hz * 2^(60/12) = 14080 Hz is fine, 72 gives 28160 Hz
        assert!(registry.set_semitone_bounds(-12, 60).is_ok());
        assert!(matches!(
            registry.set_semitone_bounds(-12, 72),
            Err(ConfigError::FrequencyOutOfRange { semitone: 72, .. })
        ));
        // -48 at 440 Hz is 27.5 Hz; a 200 Hz reference drops it below the floor
        registry.set_semitone_bounds(-48, 48).unwrap();
        assert!(matches!(
            registry.set_tuning_frequency(200.0),
            Err(ConfigError::FrequencyOutOfRange { semitone: -48, .. })
        ));

        assert_eq!(registry.snapshot(), Settings::default());
        let mut accepted = Vec::new();
        while let Ok(change) = rx.try_recv() {
            accepted.push(change);
        }
        assert_eq!(accepted.len(), 2);
    }

    #[test]
    fn test_listeners_notified_in_registration_order_only_on_change() {
        let registry = SettingsRegistry::new(Settings::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::new(Mutex::new(Recorder {
            id: 1,
            log: log.clone(),
        }));
        let second = Arc::new(Mutex::new(Recorder {
            id: 2,
            log: log.clone(),
        }));
        registry.add_listener(&first);
        registry.add_listener(&second);

        registry.set_sampling_rate(Some(44100)).unwrap();
        registry.set_sampling_rate(Some(44100)).unwrap();
        registry.set_semitone_bounds(-24, 24).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                (1, SettingsChange::SamplingRate(Some(44100))),
                (2, SettingsChange::SamplingRate(Some(44100))),
                (1, SettingsChange::SemitoneBounds { min: -24, max: 24 }),
                (2, SettingsChange::SemitoneBounds { min: -24, max: 24 }),
            ]
        );
    }

    #[test]
    fn test_dropped_listener_is_forgotten() {
        let registry = SettingsRegistry::new(Settings::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let transient = Arc::new(Mutex::new(Recorder {
                id: 9,
                log: log.clone(),
            }));
            registry.add_listener(&transient);
        }
        registry.set_sampling_rate(Some(48000)).unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_change_raised_inside_callback_is_delivered_after_current_round() {
        let registry = SettingsRegistry::new(Settings::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let chained = Arc::new(Mutex::new(Chained {
            registry: Arc::downgrade(&registry),
            log: log.clone(),
        }));
        let recorder = Arc::new(Mutex::new(Recorder {
            id: 1,
            log: log.clone(),
        }));
        registry.add_listener(&chained);
        registry.add_listener(&recorder);

        registry.set_sampling_rate(Some(8000)).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                (0, SettingsChange::SamplingRate(Some(8000))),
                (1, SettingsChange::SamplingRate(Some(8000))),
                (0, SettingsChange::TuningFrequency(442.0)),
                (1, SettingsChange::TuningFrequency(442.0)),
            ]
        );
        assert_eq!(registry.tuning_frequency(), 442.0);
    }

    #[test]
    fn test_broadcast_subscribers_see_changes() {
        let registry = SettingsRegistry::new(Settings::default());
        let mut rx = registry.subscribe();
        registry.set_tuning_frequency(415.0).unwrap();
        assert_eq!(rx.try_recv().unwrap(), SettingsChange::TuningFrequency(415.0));
    }
}
