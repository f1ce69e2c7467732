//! Music Primitives
//!
//! Note-name parsing, equal-temperament frequency conversion, and scale
//! generation for the sequencer nodes. Scales are generated as ascending
//! frequency tables: the degrees of the chosen scale repeated over a number
//! of octaves, with the tonic repeated one octave above the top.

use crate::error::ModelError;
use libm::Libm;

/// Reference pitch: A4 = 440 Hz = MIDI note 69.
pub const A4_FREQ: f64 = 440.0;
pub const A4_MIDI: i32 = 69;

/// Semitone offsets of the natural note letters within an octave.
const LETTER_SEMITONES: [(char, i32); 7] = [
    ('C', 0),
    ('D', 2),
    ('E', 4),
    ('F', 5),
    ('G', 7),
    ('A', 9),
    ('B', 11),
];

/// The closed set of scale names understood by the sequencers.
///
/// Interval lists are semitone offsets from the root, one octave's worth.
pub const SCALES: [(&str, &[i32]); 8] = [
    ("chromatic", &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]),
    ("major", &[0, 2, 4, 5, 7, 9, 11]),
    ("natural minor", &[0, 2, 3, 5, 7, 8, 10]),
    ("harmonic minor", &[0, 2, 3, 5, 7, 8, 11]),
    ("major pentatonic", &[0, 2, 4, 7, 9]),
    ("minor pentatonic", &[0, 3, 5, 7, 10]),
    ("blues", &[0, 3, 5, 6, 7, 10]),
    ("dorian", &[0, 2, 3, 5, 7, 9, 10]),
];

/// Look up the interval list for a scale name.
pub fn scale_intervals(name: &str) -> Option<&'static [i32]> {
    SCALES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, intervals)| *intervals)
}

/// Convert a MIDI note number to its equal-temperament frequency in Hz.
pub fn note_to_freq(midi: i32) -> f64 {
    A4_FREQ * Libm::<f64>::pow(2.0, f64::from(midi - A4_MIDI) / 12.0)
}

/// A note in a generated scale: MIDI number plus cached frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleNote {
    pub midi: i32,
    pub freq: f64,
}

impl ScaleNote {
    fn new(midi: i32) -> Self {
        Self {
            midi,
            freq: note_to_freq(midi),
        }
    }
}

/// Parse a note name like `C2`, `F#3`, or `Bb1` into a MIDI note number.
///
/// Octave numbering follows the MIDI convention where C-1 is note 0,
/// so `C2` is 36 and `A4` is 69.
pub fn parse_note(name: &str) -> Result<i32, ModelError> {
    let mut chars = name.chars();
    let letter = chars
        .next()
        .ok_or_else(|| ModelError::BadNoteName(name.to_string()))?
        .to_ascii_uppercase();

    let base = LETTER_SEMITONES
        .iter()
        .find(|(l, _)| *l == letter)
        .map(|(_, s)| *s)
        .ok_or_else(|| ModelError::BadNoteName(name.to_string()))?;

    let rest: String = chars.collect();
    let (accidental, octave_str) = match rest.chars().next() {
        Some('#') => (1, &rest[1..]),
        Some('b') => (-1, &rest[1..]),
        _ => (0, rest.as_str()),
    };

    let octave: i32 = octave_str
        .parse()
        .map_err(|_| ModelError::BadNoteName(name.to_string()))?;

    let midi = (octave + 1) * 12 + base + accidental;
    if !(0..=127).contains(&midi) {
        return Err(ModelError::BadNoteName(name.to_string()));
    }
    Ok(midi)
}

/// Generate the ascending note table for a sequencer.
///
/// The result holds every degree of `scale_name` starting at `root` for
/// `num_octaves` octaves, plus the tonic one octave above the top. Its
/// length is the sequencer's row count.
pub fn gen_scale(
    root: &str,
    scale_name: &str,
    num_octaves: u32,
) -> Result<Vec<ScaleNote>, ModelError> {
    let root_midi = parse_note(root)?;
    let intervals = scale_intervals(scale_name)
        .ok_or_else(|| ModelError::BadScaleName(scale_name.to_string()))?;

    let mut notes = Vec::with_capacity(intervals.len() * num_octaves as usize + 1);
    for octave in 0..num_octaves as i32 {
        for &interval in intervals {
            notes.push(ScaleNote::new(root_midi + octave * 12 + interval));
        }
    }
    // Tonic capping the top octave
    notes.push(ScaleNote::new(root_midi + num_octaves as i32 * 12));
    Ok(notes)
}

/// Row count of a sequencer grid for the given scale settings.
pub fn scale_rows(root: &str, scale_name: &str, num_octaves: u32) -> Result<usize, ModelError> {
    Ok(gen_scale(root, scale_name, num_octaves)?.len())
}
