//! # Musical Tuning Module
//!
//! This module provides the equal-tempered note calculations used by the tuner.
//! It handles note name conversions, frequency/MIDI conversions, cent deviation
//! measurements and the reference tunings (string sets) of common instruments.
//!
//! ## Features
//! - Full MIDI chromatic table (C-1 to G9) anchored at A4 = 440 Hz
//! - Nearest-note lookup with cents normalised into (-50, 50]
//! - Configurable concert pitch for every conversion
//! - Standard string tunings for guitar, bass and ukulele

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Frequency of A4 in the static note table.
pub const A4_FREQUENCY: f32 = 440.0;

/// MIDI note number of A4.
pub const A4_MIDI: i32 = 69;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Represents a single musical note of the chromatic table.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteReference {
    /// Note name (e.g., "A4", "C#3")
    pub name: String,
    /// MIDI note number (A4 = 69)
    pub midi: i32,
    /// Frequency in Hz
    pub frequency: f32,
}

/// Statically computed notes for the whole MIDI range (C-1 to G9).
///
/// Frequencies use equal temperament with A4 = 440 Hz and are computed
/// once on first access.
static NOTES: Lazy<Vec<NoteReference>> = Lazy::new(|| {
    (0..128)
        .map(|midi| NoteReference {
            name: note_name(midi),
            midi,
            frequency: midi_to_frequency(midi, A4_FREQUENCY),
        })
        .collect()
});

/// Returns the static chromatic table.
#[cfg(test)]
fn notes() -> &'static [NoteReference] {
    &NOTES
}

/// The nearest equal-tempered note to a measured frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteMatch {
    pub name: String,
    pub midi: i32,
    /// Exact frequency of the matched note.
    pub frequency: f32,
    /// Deviation of the measured frequency from the note, in (-50, 50].
    pub cents: f32,
}

/// Converts a frequency to a fractional MIDI note number.
///
/// `12 * log2(f / a4) + 69`
pub fn frequency_to_midi(freq: f32, concert_pitch: f32) -> f64 {
    12.0 * (freq as f64 / concert_pitch as f64).log2() + A4_MIDI as f64
}

/// Returns the equal-tempered frequency of a MIDI note.
pub fn midi_to_frequency(midi: i32, concert_pitch: f32) -> f32 {
    (concert_pitch as f64 * 2.0_f64.powf((midi - A4_MIDI) as f64 / 12.0)) as f32
}

/// Builds the scientific pitch name of a MIDI note (60 -> "C4").
pub fn note_name(midi: i32) -> String {
    let pitch_class = midi.rem_euclid(12) as usize;
    let octave = midi.div_euclid(12) - 1;
    format!("{}{}", NOTE_NAMES[pitch_class], octave)
}

/// Parses a note name such as "E2", "C#3", "Bb2" or "C-1" into a MIDI number.
pub fn parse_note_name(name: &str) -> Option<i32> {
    let mut chars = name.trim().chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let base = match letter {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let rest = chars.as_str();
    let (accidental, octave_str) = if let Some(stripped) = rest.strip_prefix('#') {
        (1, stripped)
    } else if let Some(stripped) = rest.strip_prefix('b') {
        (-1, stripped)
    } else {
        (0, rest)
    };

    let octave: i32 = octave_str.parse().ok()?;
    let midi = (octave + 1) * 12 + base + accidental;
    (0..128).contains(&midi).then_some(midi)
}

/// Looks up a note of the static table by name.
pub fn note_by_name(name: &str) -> Option<&'static NoteReference> {
    parse_note_name(name).map(|midi| &NOTES[midi as usize])
}

/// Finds the closest equal-tempered note to a given frequency.
///
/// # Arguments
/// * `freq` - Input frequency in Hz
/// * `concert_pitch` - Frequency of A4 in Hz
///
/// # Returns
/// * `Some(NoteMatch)` - Closest note and the deviation from it in cents
/// * `None` - The frequency is zero, negative or not finite
pub fn find_nearest_note(freq: f32, concert_pitch: f32) -> Option<NoteMatch> {
    if !(freq.is_finite() && freq > 0.0) {
        return None;
    }

    let exact = frequency_to_midi(freq, concert_pitch);
    let mut midi = exact.round() as i32;
    let mut cents = ((exact - midi as f64) * 100.0) as f32;
    // round() sends x.5 away from zero; keep the deviation in (-50, 50]
    if cents <= -50.0 {
        midi -= 1;
        cents += 100.0;
    }

    let name = usize::try_from(midi)
        .ok()
        .and_then(|i| NOTES.get(i))
        .map_or_else(|| note_name(midi), |note| note.name.clone());
    Some(NoteMatch {
        name,
        midi,
        frequency: midi_to_frequency(midi, concert_pitch),
        cents,
    })
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
///
/// # Arguments
/// * `freq` - Measured frequency in Hz
/// * `target_freq` - Target frequency in Hz
///
/// # Returns
/// * Cent deviation (positive = sharp, negative = flat)
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// A single open string of an instrument tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringReference {
    /// Note name of the open string (e.g., "E2")
    pub name: String,
    /// Target frequency in Hz
    pub frequency: f32,
}

/// The distance from a measured frequency to one string of a tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct StringMatch {
    pub name: String,
    pub frequency: f32,
    pub cents: f32,
}

/// A named set of reference strings, e.g. standard guitar tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceTuning {
    pub name: String,
    pub strings: Vec<StringReference>,
}

/// Names of the built-in tunings, with their strings in playing order.
///
/// `bass-standard` reaches down to E1 (41.2 Hz), below the default detection
/// floor; select it through [`EngineConfig::fit_to_tuning`](crate::EngineConfig::fit_to_tuning)
/// or lower `min_frequency` and `hum_cutoff_hz` by hand.
pub const PRESETS: [(&str, &[&str]); 4] = [
    ("guitar-standard", &["E2", "A2", "D3", "G3", "B3", "E4"]),
    ("guitar-drop-d", &["D2", "A2", "D3", "G3", "B3", "E4"]),
    ("bass-standard", &["E1", "A1", "D2", "G2"]),
    ("ukulele-standard", &["G4", "C4", "E4", "A4"]),
];

impl ReferenceTuning {
    /// Builds a tuning from note names, pricing every string at `concert_pitch`.
    ///
    /// Returns `None` if any name cannot be parsed.
    pub fn from_note_names<S: AsRef<str>>(
        name: &str,
        strings: &[S],
        concert_pitch: f32,
    ) -> Option<Self> {
        let strings = strings
            .iter()
            .map(|s| {
                let note = note_by_name(s.as_ref())?;
                Some(StringReference {
                    name: note.name.clone(),
                    frequency: midi_to_frequency(note.midi, concert_pitch),
                })
            })
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            name: name.to_string(),
            strings,
        })
    }

    /// Looks up one of the built-in [`PRESETS`].
    pub fn preset(name: &str, concert_pitch: f32) -> Option<Self> {
        PRESETS
            .iter()
            .find(|(preset, _)| *preset == name)
            .and_then(|&(preset, strings)| Self::from_note_names(preset, strings, concert_pitch))
    }

    /// Standard six-string guitar tuning (E2 A2 D3 G3 B3 E4) at A4 = 440 Hz.
    pub fn guitar_standard() -> Self {
        Self::preset("guitar-standard", A4_FREQUENCY).unwrap_or_else(|| Self {
            name: "guitar-standard".to_string(),
            strings: Vec::new(),
        })
    }

    /// Finds a string by its note name.
    pub fn string(&self, name: &str) -> Option<&StringReference> {
        let midi = parse_note_name(name)?;
        self.strings
            .iter()
            .find(|s| parse_note_name(&s.name) == Some(midi))
    }

    /// Finds the string nearest in cents to `freq`, however far away it is.
    pub fn nearest_string(&self, freq: f32) -> Option<StringMatch> {
        if !(freq.is_finite() && freq > 0.0) {
            return None;
        }

        self.strings
            .iter()
            .map(|s| StringMatch {
                name: s.name.clone(),
                frequency: s.frequency,
                cents: calculate_cents_deviation(freq, s.frequency),
            })
            .min_by(|a, b| a.cents.abs().total_cmp(&b.cents.abs()))
    }
}
