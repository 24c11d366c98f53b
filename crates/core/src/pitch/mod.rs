use std::fmt;

use serde::{Deserialize, Serialize};

/// MIDI number used when a note name cannot be parsed (middle C).
pub const DEFAULT_MIDI: i32 = 60;
/// Frequency used when a note name cannot be parsed (A4).
pub const DEFAULT_FREQUENCY_HZ: f64 = 440.0;

const A4_MIDI: i32 = 69;
const A4_HZ: f64 = 440.0;

/// A pitch as written in puzzle data: either a note name with octave such as
/// `"C4"`, `"F#3"` or `"Bb5"`, or a raw frequency in Hz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Pitch {
    Frequency(f64),
    Name(String),
}

impl Pitch {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn hz(frequency: f64) -> Self {
        Self::Frequency(frequency)
    }

    /// Chromatic number with C4 = 60. Unknown names map to [`DEFAULT_MIDI`].
    pub fn midi(&self) -> i32 {
        match self {
            Self::Name(name) => parse_note_name(name).unwrap_or_else(|| {
                tracing::warn!(pitch = %name, "invalid pitch notation, using middle C");
                DEFAULT_MIDI
            }),
            Self::Frequency(hz) if hz.is_finite() && *hz > 0.0 => {
                (f64::from(A4_MIDI) + 12.0 * (hz / A4_HZ).log2()).round() as i32
            }
            Self::Frequency(hz) => {
                tracing::warn!(frequency = hz, "invalid pitch frequency, using middle C");
                DEFAULT_MIDI
            }
        }
    }

    /// Equal-tempered frequency in Hz. Unknown names map to
    /// [`DEFAULT_FREQUENCY_HZ`].
    pub fn frequency(&self) -> f64 {
        match self {
            Self::Frequency(hz) => *hz,
            Self::Name(name) => match parse_note_name(name) {
                Some(midi) => midi_to_frequency(midi),
                None => {
                    tracing::warn!(pitch = %name, "unknown pitch, using A4 (440 Hz)");
                    DEFAULT_FREQUENCY_HZ
                }
            },
        }
    }

    /// Key used to put chord members into a canonical order.
    pub fn sort_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Frequency(hz) => write!(f, "{hz}"),
        }
    }
}

impl From<&str> for Pitch {
    fn from(value: &str) -> Self {
        Self::name(value)
    }
}

impl From<f64> for Pitch {
    fn from(value: f64) -> Self {
        Self::hz(value)
    }
}

/// Parses `<letter>[#|b]<octave>` into a chromatic number, or `None` if the
/// text does not follow that shape.
pub fn parse_note_name(name: &str) -> Option<i32> {
    let mut chars = name.chars();
    let base = match chars.next()? {
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
    let (accidental, octave) = match rest.as_bytes().first()? {
        b'#' => (1, &rest[1..]),
        b'b' => (-1, &rest[1..]),
        _ => (0, rest),
    };

    if octave.is_empty() || !octave.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let octave: i32 = octave.parse().ok()?;

    octave
        .checked_add(1)?
        .checked_mul(12)?
        .checked_add(base + accidental)
}

pub fn midi_to_frequency(midi: i32) -> f64 {
    A4_HZ * 2f64.powf(f64::from(midi - A4_MIDI) / 12.0)
}
