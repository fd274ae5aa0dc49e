//! Equal-temperament conversions shared by every subsystem.
//!
//! Semitones are integer (or fractional) offsets from the tuning reference,
//! which is semitone 0 and named A3. Frequencies are in Hz and periods in
//! samples.

use serde::{Deserialize, Serialize};

/// Sentinel used where an integer semitone is required but no note exists.
pub const UNDEFINED_SEMITONE: i32 = -1000;

/// Default tuning reference (Hz)
pub const DEFAULT_TUNING_FREQUENCY: f64 = 440.0;

/// Note naming convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NoteNotation {
    /// A, A#, B, C, ...
    #[default]
    Anglo,
    /// La, La#, Si, Do, ...
    Latin,
}

const ANGLO_NAMES: [&str; 12] = [
    "A", "A#", "B", "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#",
];
const LATIN_NAMES: [&str; 12] = [
    "La", "La#", "Si", "Do", "Do#", "Re", "Re#", "Mi", "Fa", "Fa#", "Sol", "Sol#",
];

/// Fractional number of semitones between `frequency` and the tuning reference.
pub fn frequency_to_semitone_f(frequency: f64, tuning_frequency: f64) -> f64 {
    12.0 * (frequency / tuning_frequency).log2()
}

/// Nearest semitone to `frequency`, rounding halves away from zero.
pub fn frequency_to_semitone(frequency: f64, tuning_frequency: f64) -> i32 {
    frequency_to_semitone_f(frequency, tuning_frequency).round() as i32
}

/// Frequency of a (possibly fractional) semitone.
pub fn semitone_to_frequency(semitone: f64, tuning_frequency: f64) -> f64 {
    tuning_frequency * 2f64.powf(semitone / 12.0)
}

/// Period of `semitone` in samples at `sampling_rate`.
pub fn period_in_samples(semitone: i32, sampling_rate: u32, tuning_frequency: f64) -> f64 {
    sampling_rate as f64 / semitone_to_frequency(semitone as f64, tuning_frequency)
}

/// Label of a semitone, e.g. `A3`, `C#4`, `Sol1`.
///
/// `tonality` transposes the label (not the pitch). Octaves change on C and
/// skip zero, so the octave below 1 is -1.
pub fn note_name(semitone: i32, notation: NoteNotation, tonality: i32) -> String {
    let shifted = semitone + tonality;
    let degree = shifted.rem_euclid(12);
    let mut octave = 3 + shifted.div_euclid(12);
    if degree > 2 {
        octave += 1;
    }
    if octave <= 0 {
        octave -= 1;
    }

    let names = match notation {
        NoteNotation::Anglo => &ANGLO_NAMES,
        NoteNotation::Latin => &LATIN_NAMES,
    };
    format!("{}{}", names[degree as usize], octave)
}

pub fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_is_semitone_zero() {
        assert_eq!(frequency_to_semitone(440.0, 440.0), 0);
        assert!((semitone_to_frequency(0.0, 440.0) - 440.0).abs() < 1e-9);
        assert!((semitone_to_frequency(12.0, 440.0) - 880.0).abs() < 1e-9);
        assert!((semitone_to_frequency(-24.0, 440.0) - 110.0).abs() < 1e-9);
    }

    #[test]
    fn test_frequency_round_trip_within_range() {
        for tuning in [415.0, 440.0, 442.0] {
            let mut f = 30.0;
            while f < 7000.0 {
                let back = semitone_to_frequency(frequency_to_semitone_f(f, tuning), tuning);
                assert!(
                    (back - f).abs() / f < 1e-9,
                    "round trip drifted for {} Hz at tuning {}",
                    f,
                    tuning
                );
                f *= 1.37;
            }
        }
    }

    #[test]
    fn test_rounding_is_half_away_from_zero() {
        let half_up = semitone_to_frequency(0.5, 440.0);
        let half_down = semitone_to_frequency(-0.5, 440.0);
        assert_eq!(frequency_to_semitone(half_up * 1.000_001, 440.0), 1);
        assert_eq!(frequency_to_semitone(half_down / 1.000_001, 440.0), -1);
        assert_eq!(frequency_to_semitone(116.0, 440.0), -23);
    }

    #[test]
    fn test_tuning_shifts_semitones() {
        assert_eq!(frequency_to_semitone(432.0, 432.0), 0);
        assert_eq!(frequency_to_semitone(440.0, 415.3), 1);
    }

    #[test]
    fn test_period_in_samples() {
        let period = period_in_samples(-24, 44100, 440.0);
        assert!((period - 400.909).abs() < 1e-3);
    }

    #[test]
    fn test_note_names() {
        assert_eq!(note_name(0, NoteNotation::Anglo, 0), "A3");
        assert_eq!(note_name(3, NoteNotation::Anglo, 0), "C4");
        assert_eq!(note_name(2, NoteNotation::Anglo, 0), "B3");
        assert_eq!(note_name(-24, NoteNotation::Anglo, 0), "A1");
        assert_eq!(note_name(-36, NoteNotation::Anglo, 0), "A-1");
        assert_eq!(note_name(10, NoteNotation::Latin, 0), "Sol4");
        assert_eq!(note_name(0, NoteNotation::Latin, 3), "Do4");
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(120, 360), 120);
        assert_eq!(gcd(240, 360), 120);
        assert_eq!(gcd(7, 0), 7);
        assert_eq!(gcd(9, 28), 1);
    }
}
