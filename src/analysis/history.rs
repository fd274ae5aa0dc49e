//! Note history
//!
//! Notes are indexed by tag and listed per semitone, newest first. Only the
//! newest note of a semitone can be unfinished. Finished notes beyond the
//! per-semitone cap are evicted oldest first, together with their attached
//! statistics.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use serde::Serialize;

use crate::error::ConsistencyError;

use super::quantizer::NoteTag;
use super::stats::StatSample;

#[derive(Debug, Clone, Serialize)]
pub struct NoteDescription {
    pub tag: NoteTag,
    pub semitone: i32,
    /// Back-dated onset
    #[serde(skip)]
    pub start: Instant,
    /// Onset relative to the recognizer start, in milliseconds
    pub start_ms: f64,
    /// Set when the note finishes
    pub duration_ms: Option<f64>,
    /// Running average of the channel reliability while the note sounded
    pub reliability: f64,
    /// Cycles folded into `reliability`
    pub cycles: usize,
    #[serde(skip)]
    pub stats: Vec<StatSample>,
}

impl NoteDescription {
    pub fn new(tag: NoteTag, semitone: i32, start: Instant, start_ms: f64) -> Self {
        Self {
            tag,
            semitone,
            start,
            start_ms,
            duration_ms: None,
            reliability: 0.0,
            cycles: 0,
            stats: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.duration_ms.is_some()
    }

    /// Fold one cycle's channel reliability and statistics into the note.
    pub fn observe(&mut self, channel_reliability: f64, sample: StatSample) {
        self.reliability =
            (self.reliability * self.cycles as f64 + channel_reliability) / (self.cycles + 1) as f64;
        self.cycles += 1;
        self.stats.push(sample);
    }
}

pub struct NoteHistory {
    notes: HashMap<NoteTag, NoteDescription>,
    by_semitone: HashMap<i32, VecDeque<NoteTag>>,
    max_finished_per_semitone: usize,
}

impl NoteHistory {
    pub fn new(max_finished_per_semitone: usize) -> Self {
        Self {
            notes: HashMap::new(),
            by_semitone: HashMap::new(),
            max_finished_per_semitone: max_finished_per_semitone.max(1),
        }
    }

    pub fn start(&mut self, note: NoteDescription) {
        self.by_semitone
            .entry(note.semitone)
            .or_default()
            .push_front(note.tag);
        self.notes.insert(note.tag, note);
    }

    /// Finish the newest note of `semitone`.
    pub fn finish(&mut self, semitone: i32, duration_ms: f64) -> Result<NoteTag, ConsistencyError> {
        let note = self
            .front_mut(semitone)
            .ok_or(ConsistencyError::MissingNote { semitone })?;
        if note.is_finished() {
            return Err(ConsistencyError::NoteAlreadyFinished { semitone });
        }
        note.duration_ms = Some(duration_ms.max(0.0));
        let tag = note.tag;
        self.evict(semitone);
        Ok(tag)
    }

    /// Newest note of `semitone`.
    pub fn front(&self, semitone: i32) -> Option<&NoteDescription> {
        let tag = self.by_semitone.get(&semitone)?.front()?;
        self.notes.get(tag)
    }

    pub fn front_mut(&mut self, semitone: i32) -> Option<&mut NoteDescription> {
        let tag = self.by_semitone.get(&semitone)?.front()?;
        self.notes.get_mut(tag)
    }

    pub fn get(&self, tag: NoteTag) -> Option<&NoteDescription> {
        self.notes.get(&tag)
    }

    /// Notes of `semitone`, newest first.
    pub fn notes_for(&self, semitone: i32) -> impl Iterator<Item = &NoteDescription> {
        self.by_semitone
            .get(&semitone)
            .into_iter()
            .flat_map(|tags| tags.iter())
            .filter_map(|tag| self.notes.get(tag))
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn clear(&mut self) {
        self.notes.clear();
        self.by_semitone.clear();
    }

    fn evict(&mut self, semitone: i32) {
        let Some(tags) = self.by_semitone.get_mut(&semitone) else {
            return;
        };
        let mut finished = tags
            .iter()
            .filter(|tag| self.notes.get(*tag).is_some_and(NoteDescription::is_finished))
            .count();
        while finished > self.max_finished_per_semitone {
            let Some(oldest) = tags.pop_back() else {
                break;
            };
            if self.notes.remove(&oldest).is_some_and(|note| note.is_finished()) {
                finished -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stat(time: Instant) -> StatSample {
        StatSample {
            time,
            refresh_ms: 20.0,
            min_stored: 5,
            backlog: 0,
        }
    }

    #[test]
    fn test_start_and_finish() {
        let now = Instant::now();
        let mut history = NoteHistory::new(4);
        history.start(NoteDescription::new(1, -24, now, 0.0));

        assert!(!history.front(-24).unwrap().is_finished());
        assert_eq!(history.finish(-24, 250.0).unwrap(), 1);
        assert_eq!(history.get(1).unwrap().duration_ms, Some(250.0));
    }

    #[test]
    fn test_double_finish_is_reported() {
        let now = Instant::now();
        let mut history = NoteHistory::new(4);
        history.start(NoteDescription::new(1, 3, now, 0.0));
        history.finish(3, 100.0).unwrap();

        assert!(matches!(
            history.finish(3, 120.0),
            Err(ConsistencyError::NoteAlreadyFinished { semitone: 3 })
        ));
        assert_eq!(history.get(1).unwrap().duration_ms, Some(100.0));
        assert!(matches!(
            history.finish(7, 10.0),
            Err(ConsistencyError::MissingNote { semitone: 7 })
        ));
    }

    #[test]
    fn test_retention_evicts_oldest_finished_notes() {
        let now = Instant::now();
        let mut history = NoteHistory::new(2);
        for tag in 1..=4 {
            history.start(NoteDescription::new(tag, 0, now, tag as f64));
            history.finish(0, 10.0).unwrap();
        }
        history.start(NoteDescription::new(5, 0, now, 5.0));

        let tags: Vec<NoteTag> = history.notes_for(0).map(|n| n.tag).collect();
        assert_eq!(tags, vec![5, 4, 3]);
        assert!(history.get(1).is_none());
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_reliability_is_a_running_average() {
        let now = Instant::now();
        let mut note = NoteDescription::new(1, 0, now, 0.0);
        note.observe(1.0, stat(now));
        note.observe(0.5, stat(now + Duration::from_millis(20)));
        note.observe(0.6, stat(now + Duration::from_millis(40)));

        assert_eq!(note.cycles, 3);
        assert!((note.reliability - 0.7).abs() < 1e-9);
        assert_eq!(note.stats.len(), 3);
    }
}
