//! Quantizer - debounced note events from per-cycle activations
//!
//! Each semitone has its own channel running a three-state hysteresis:
//! - Idle -> Starting as soon as the activation density rises above `min_density`
//! - Starting -> Playing once the density stayed high for `tolerance_ms`
//!   (fires note-started, back-dated by the confirmation lag)
//! - Playing -> Idle once the density stayed low for `tolerance_ms`
//!   (fires note-finished then note-played)
//!
//! Densities are computed over the activations received during the last
//! `tolerance_ms`. Time comes from an injected [`TimeSource`] so the
//! behaviour can be driven deterministically.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::clock::{elapsed_ms, TimeSource};
use crate::config::QuantizerConfig;

/// Unique identifier of a note, allocated when it starts.
pub type NoteTag = u64;

/// Hysteresis state of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Idle,
    Starting,
    Playing,
}

/// Receiver of quantized note events.
///
/// Offsets are negative millisecond deltas relative to the detection time:
/// the note actually started (or stopped) `-offset_ms` ago.
pub trait QuantizerListener {
    fn note_started(&mut self, tag: NoteTag, semitone: i32, offset_ms: f64);
    fn note_finished(&mut self, tag: NoteTag, semitone: i32, offset_ms: f64);
    fn note_played(&mut self, semitone: i32, duration_ms: f64, offset_ms: f64);
}

/// Serializable form of the listener callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NoteEvent {
    Started {
        tag: NoteTag,
        semitone: i32,
        offset_ms: f64,
    },
    Finished {
        tag: NoteTag,
        semitone: i32,
        offset_ms: f64,
    },
    Played {
        semitone: i32,
        duration_ms: f64,
        offset_ms: f64,
    },
}

impl NoteEvent {
    pub fn semitone(&self) -> i32 {
        match self {
            NoteEvent::Started { semitone, .. }
            | NoteEvent::Finished { semitone, .. }
            | NoteEvent::Played { semitone, .. } => *semitone,
        }
    }
}

impl QuantizerListener for Vec<NoteEvent> {
    fn note_started(&mut self, tag: NoteTag, semitone: i32, offset_ms: f64) {
        self.push(NoteEvent::Started {
            tag,
            semitone,
            offset_ms,
        });
    }

    fn note_finished(&mut self, tag: NoteTag, semitone: i32, offset_ms: f64) {
        self.push(NoteEvent::Finished {
            tag,
            semitone,
            offset_ms,
        });
    }

    fn note_played(&mut self, semitone: i32, duration_ms: f64, offset_ms: f64) {
        self.push(NoteEvent::Played {
            semitone,
            duration_ms,
            offset_ms,
        });
    }
}

/// Per-semitone debounce channel
#[derive(Debug, Clone)]
pub struct Channel {
    semitone: i32,
    /// (time, active), newest first
    samples: VecDeque<(Instant, bool)>,
    state: ChannelState,
    lag_start: Instant,
    duration_start: Instant,
    reliability: f64,
    tag: Option<NoteTag>,
}

impl Channel {
    fn new(semitone: i32, now: Instant) -> Self {
        Self {
            semitone,
            samples: VecDeque::new(),
            state: ChannelState::Idle,
            lag_start: now,
            duration_start: now,
            reliability: 0.0,
            tag: None,
        }
    }

    pub fn semitone(&self) -> i32 {
        self.semitone
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Fraction of active samples at the last update.
    pub fn reliability(&self) -> f64 {
        self.reliability
    }

    /// Tag of the note currently (or last) played on this channel.
    pub fn tag(&self) -> Option<NoteTag> {
        self.tag
    }

    /// Number of activations currently inside the tolerance window.
    pub fn window_len(&self) -> usize {
        self.samples.len()
    }

    fn finish(&mut self, now: Instant, listener: &mut impl QuantizerListener) {
        self.state = ChannelState::Idle;
        let lag = elapsed_ms(self.lag_start, now);
        let duration = elapsed_ms(self.duration_start, now);
        if let Some(tag) = self.tag.take() {
            listener.note_finished(tag, self.semitone, -lag);
        }
        listener.note_played(self.semitone, duration - lag, -lag - duration);
    }
}

/// Note quantizer over a contiguous semitone range
pub struct Quantizer {
    channels: Vec<Channel>,
    semitone_min: i32,
    tolerance_ms: f64,
    min_density: f64,
    time_source: Arc<dyn TimeSource>,
    next_tag: NoteTag,
    min_stored: usize,
}

impl Quantizer {
    pub fn new(
        config: &QuantizerConfig,
        semitone_min: i32,
        semitone_max: i32,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let now = time_source.now();
        let channels = (semitone_min..=semitone_max)
            .map(|semitone| Channel::new(semitone, now))
            .collect();
        Self {
            channels,
            semitone_min,
            tolerance_ms: config.tolerance_ms.max(0.0),
            min_density: config.min_density,
            time_source,
            next_tag: 1,
            min_stored: 0,
        }
    }

    /// Rebuild the channels for a new semitone range. Playing notes must be
    /// flushed first. Tag allocation continues where it left off.
    pub fn resize(&mut self, semitone_min: i32, semitone_max: i32) {
        let now = self.time_source.now();
        self.channels = (semitone_min..=semitone_max)
            .map(|semitone| Channel::new(semitone, now))
            .collect();
        self.semitone_min = semitone_min;
        self.min_stored = 0;
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, semitone: i32) -> Option<&Channel> {
        let index = semitone.checked_sub(self.semitone_min)?;
        self.channels.get(usize::try_from(index).ok()?)
    }

    pub fn semitone_min(&self) -> i32 {
        self.semitone_min
    }

    pub fn tolerance_ms(&self) -> f64 {
        self.tolerance_ms
    }

    /// Smallest window depth across channels after the last cycle.
    pub fn min_stored(&self) -> usize {
        self.min_stored
    }

    /// Feed one activation per semitone, starting at `min_semitone`.
    ///
    /// Must be called once per refresh cycle.
    pub fn quantize(&mut self, active: &[bool], min_semitone: i32, listener: &mut impl QuantizerListener) {
        let now = self.time_source.now();
        let mut min_stored = usize::MAX;

        for (offset, &is_active) in active.iter().enumerate() {
            let semitone = min_semitone + offset as i32;
            let Some(index) = semitone
                .checked_sub(self.semitone_min)
                .and_then(|i| usize::try_from(i).ok())
                .filter(|i| *i < self.channels.len())
            else {
                continue;
            };

            self.channels[index].samples.push_front((now, is_active));
            self.update(index, now, listener);

            let tolerance = self.tolerance_ms;
            let channel = &mut self.channels[index];
            while channel
                .samples
                .back()
                .is_some_and(|(time, _)| elapsed_ms(*time, now) > tolerance)
            {
                channel.samples.pop_back();
            }
            min_stored = min_stored.min(channel.samples.len());
        }

        self.min_stored = if min_stored == usize::MAX { 0 } else { min_stored };
    }

    fn update(&mut self, index: usize, now: Instant, listener: &mut impl QuantizerListener) {
        let tolerance = self.tolerance_ms;
        let min_density = self.min_density;
        let channel = &mut self.channels[index];
        if channel.samples.is_empty() {
            return;
        }

        let active = channel.samples.iter().filter(|(_, on)| *on).count();
        channel.reliability = active as f64 / channel.samples.len() as f64;

        if channel.reliability > min_density {
            if channel.state == ChannelState::Idle {
                channel.state = ChannelState::Starting;
                channel.duration_start = now;
                channel.lag_start = now;
            }

            if channel.state == ChannelState::Starting {
                let lag = elapsed_ms(channel.lag_start, now);
                if lag >= tolerance {
                    channel.state = ChannelState::Playing;
                    let tag = self.next_tag;
                    self.next_tag += 1;
                    channel.tag = Some(tag);
                    listener.note_started(tag, channel.semitone, -lag);
                }
            }

            if channel.state == ChannelState::Playing {
                channel.lag_start = now;
            }
        } else {
            match channel.state {
                ChannelState::Starting => channel.state = ChannelState::Idle,
                ChannelState::Playing if elapsed_ms(channel.lag_start, now) >= tolerance => {
                    channel.finish(now, listener);
                }
                _ => {}
            }
        }
    }

    /// Empty every window and return every channel to Idle, flushing the
    /// finished/played events of notes still playing.
    pub fn cut_all(&mut self, listener: &mut impl QuantizerListener) {
        let now = self.time_source.now();
        self.min_stored = 0;
        for channel in &mut self.channels {
            channel.samples.clear();
            channel.reliability = 0.0;
            match channel.state {
                ChannelState::Playing => channel.finish(now, listener),
                ChannelState::Starting => channel.state = ChannelState::Idle,
                ChannelState::Idle => {}
            }
        }
    }
}
