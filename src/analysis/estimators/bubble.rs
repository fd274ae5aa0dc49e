// Bubble estimator
//
// Every candidate period s in [min_length, max_length) is a "bubble" that
// accumulates a matching error one comparison at a time. A min-heap keyed
// by average error always advances the most promising bubble next.
//
// A bubble finishes once it has made `length(s)` comparisons (the smallest
// multiple of s reaching `min_evidence`). It is dropped when it has been
// marked redundant, when two consecutive sign checks disagree, or when its
// average error exceeds the threshold. A finish marks its multiples (and
// their +/-1 neighbours) redundant and votes for each of its divisors;
// divisors falling behind the number of finishes are marked redundant too.
//
// The result is the common divisor of the finishes whose error stays close to
// the best one.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::config::BubbleConfig;
use crate::music::{frequency_to_semitone, gcd, semitone_to_frequency};
use crate::settings::Settings;

use super::{peak_amplitude, PitchEstimate, PitchEstimator};

/// Average error usable as a heap key.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Score(f64);

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Default)]
struct Bubble {
    count: usize,
    length: usize,
    error: f64,
    redundant: bool,
    divisor_count: usize,
}

impl Bubble {
    fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.error / self.count as f64
        }
    }
}

pub struct BubbleEstimator {
    settings: Settings,
    volume_threshold: f32,
    error_threshold: f64,
    consensus_tolerance: f64,
    min_evidence: usize,
    min_length: usize,
    max_length: usize,
    latency: usize,
    /// Indexed by `s - min_length`
    bubbles: Vec<Bubble>,
    estimate: PitchEstimate,
}

fn same_sign(a: f32, b: f32) -> bool {
    (a >= 0.0) == (b >= 0.0)
}

impl BubbleEstimator {
    pub fn new(volume_threshold: f32, config: &BubbleConfig, settings: Settings) -> Self {
        let mut estimator = Self {
            settings,
            volume_threshold,
            error_threshold: config.error_threshold,
            consensus_tolerance: config.consensus_tolerance,
            min_evidence: config.min_evidence.max(1),
            min_length: 0,
            max_length: 0,
            latency: 0,
            bubbles: Vec::new(),
            estimate: PitchEstimate::default(),
        };
        estimator.configure(settings);
        estimator
    }

    pub fn configure(&mut self, settings: Settings) {
        self.settings = settings;
        self.estimate.reset(settings.semitone_count());

        let Some(rate) = settings.analysis_rate() else {
            self.min_length = 0;
            self.max_length = 0;
            self.latency = 0;
            self.bubbles.clear();
            return;
        };

        let rate = rate as f64;
        let highest = semitone_to_frequency(settings.semitone_max as f64, settings.tuning_frequency);
        let lowest = semitone_to_frequency(settings.semitone_min as f64, settings.tuning_frequency);
        self.min_length = ((rate / highest) as usize).max(2);
        self.max_length = ((rate / lowest) as usize).max(self.min_length + 1);

        self.bubbles = vec![Bubble::default(); self.max_length - self.min_length];
        self.latency = 0;
        for s in self.min_length..self.max_length {
            let length = self.evidence_length(s);
            self.bubbles[s - self.min_length].length = length;
            // w[c + s + 1] is read for every comparison c < length
            self.latency = self.latency.max(s + length + 2);
        }

        tracing::debug!(
            "[Estimator] bubble lengths [{}; {}), latency {}",
            self.min_length,
            self.max_length,
            self.latency
        );
    }

    /// Smallest multiple of `s` reaching the minimum evidence.
    fn evidence_length(&self, s: usize) -> usize {
        self.min_evidence.div_ceil(s).max(1) * s
    }

    fn bubble_mut(&mut self, s: usize) -> Option<&mut Bubble> {
        if s >= self.min_length && s < self.max_length {
            self.bubbles.get_mut(s - self.min_length)
        } else {
            None
        }
    }

    fn mark_redundant(&mut self, s: usize) {
        if let Some(bubble) = self.bubble_mut(s) {
            bubble.redundant = true;
        }
    }

    fn consistent(window: &[f32], s: usize, c: usize) -> bool {
        same_sign(window[c + s], window[c]) || same_sign(window[c + s + 1], window[c + 1])
    }

    /// Book-keeping after `s` finished as the `finished`-th success.
    fn on_finish(&mut self, s: usize, finished: usize) {
        self.mark_redundant(s - 1);
        self.mark_redundant(s + 1);
        let mut multiple = 2 * s;
        while multiple < self.max_length + 1 {
            self.mark_redundant(multiple - 1);
            self.mark_redundant(multiple);
            self.mark_redundant(multiple + 1);
            multiple += s;
        }

        if let Some(bubble) = self.bubble_mut(s) {
            bubble.divisor_count += 1;
        }
        let mut d = 2;
        while s / d >= self.min_length {
            let divisor = s / d;
            for candidate in [divisor, divisor + 1] {
                if let Some(bubble) = self.bubble_mut(candidate) {
                    bubble.divisor_count += 1;
                    if bubble.divisor_count < finished {
                        bubble.redundant = true;
                    }
                }
            }
            d += 1;
        }
    }

    /// Run the search; returns the finished periods in finishing order.
    fn search(&mut self, window: &[f32], threshold: f64) -> Vec<usize> {
        let mut heap = BinaryHeap::new();
        let mut seq = 0u64;

        for s in self.min_length..self.max_length {
            let bubble = &mut self.bubbles[s - self.min_length];
            bubble.count = 0;
            bubble.error = 0.0;
            bubble.redundant = false;
            bubble.divisor_count = 0;

            if Self::consistent(window, s, 0) {
                bubble.error = (window[s] - window[0]).abs() as f64;
                bubble.count = 1;
                if bubble.error < threshold {
                    heap.push(Reverse((Score(bubble.error), seq, s)));
                    seq += 1;
                }
            }
        }

        let max_finishes = self.max_length / self.min_length;
        let mut finishes = Vec::new();
        while let Some(Reverse((_, _, s))) = heap.pop() {
            let bubble = &mut self.bubbles[s - self.min_length];
            if bubble.redundant || !Self::consistent(window, s, bubble.count) {
                continue;
            }

            let c = bubble.count;
            bubble.error += (window[c + s] - window[c]).abs() as f64;
            bubble.count += 1;
            let average = bubble.average();
            if average > threshold {
                continue;
            }

            if bubble.count >= bubble.length {
                finishes.push(s);
                self.on_finish(s, finishes.len());
                if finishes.len() > max_finishes {
                    break;
                }
            } else {
                heap.push(Reverse((Score(average), seq, s)));
                seq += 1;
            }
        }
        finishes
    }

    /// Period explaining every accepted finish.
    fn consensus(&self, accepted: &[usize], best: usize) -> f64 {
        let exact = accepted.iter().copied().fold(0, gcd);
        if exact >= self.min_length {
            return exact as f64;
        }

        for &base in accepted {
            let mut total = 0usize;
            let mut multiples = 0usize;
            let fits = accepted.iter().all(|&s| {
                let m = ((s as f64 / base as f64).round() as usize).max(1);
                total += s;
                multiples += m;
                (s as f64 - (m * base) as f64).abs() <= 1.0 + 0.5 * m as f64
            });
            if fits {
                return total as f64 / multiples as f64;
            }
        }
        best as f64
    }

    fn fill_components(&mut self, finishes: &[usize], threshold: f64) {
        let Some(rate) = self.settings.analysis_rate() else {
            return;
        };
        for &s in finishes {
            let average = self.bubbles[s - self.min_length].average();
            let semitone = frequency_to_semitone(rate as f64 / s as f64, self.settings.tuning_frequency);
            if let Some(index) = self.settings.semitone_index(semitone) {
                let evidence = (1.0 - average / threshold).clamp(0.0, 1.0);
                let slot = &mut self.estimate.components[index];
                *slot = slot.max(evidence);
            }
        }
    }
}

impl PitchEstimator for BubbleEstimator {
    fn apply(&mut self, window: &[f32]) {
        self.estimate.reset(self.settings.semitone_count());

        if self.latency == 0 || window.len() < self.latency {
            return;
        }
        let max_volume = peak_amplitude(window, self.max_length);
        if max_volume <= self.volume_threshold {
            return;
        }
        let threshold = self.error_threshold * max_volume as f64;

        let finishes = self.search(window, threshold);
        if finishes.is_empty() {
            return;
        }
        self.fill_components(&finishes, threshold);

        let average = |s: &usize| self.bubbles[*s - self.min_length].average();
        let Some(best) = finishes
            .iter()
            .copied()
            .min_by(|a, b| average(a).total_cmp(&average(b)))
        else {
            return;
        };
        let cutoff = average(&best) + self.consensus_tolerance * threshold;
        let mut accepted: Vec<usize> = finishes.iter().copied().filter(|s| average(s) <= cutoff).collect();
        accepted.sort_unstable();

        let wave_length = self.consensus(&accepted, best);
        tracing::trace!(
            "[Estimator] bubble finishes={} accepted={:?} wave length={:.2}",
            finishes.len(),
            accepted,
            wave_length
        );
        let settings = self.settings;
        self.estimate.set_from_wave_length(&settings, wave_length);
    }

    fn estimate(&self) -> &PitchEstimate {
        &self.estimate
    }

    fn sample_latency(&self) -> usize {
        self.latency
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }
}
