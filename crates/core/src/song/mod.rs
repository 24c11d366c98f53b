//! Song data model shared by playback, recording and matching.
//!
//! A [`Song`] is an ordered list of [`SongElement`]s. Each element is either a
//! single [`Note`] or a [`Chord`] whose members start together. The JSON
//! shape mirrors the puzzle files:
//!
//! ```json
//! [
//!   { "pitch": "C4", "length": "1/4" },
//!   { "notes": [{ "pitch": "C3", "length": "1/1" }, { "pitch": "E4", "length": "1/4" }] },
//!   { "length": "1/8" }
//! ]
//! ```
//!
//! A note without a pitch is a rest.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{timeline::ms_per_beat, Pitch, ResoundError, Result};

/// A rhythmic fraction such as `1/4`, measured against a basis note value.
///
/// Lengths compare as written: `2/8` and `1/4` last equally long but are not
/// equal, because required songs are matched note for note as authored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NoteLength {
    numerator: u32,
    denominator: u32,
}

impl NoteLength {
    pub const QUARTER: Self = Self {
        numerator: 1,
        denominator: 4,
    };

    pub fn new(numerator: u32, denominator: u32) -> Result<Self> {
        if numerator == 0 || denominator == 0 {
            return Err(ResoundError::format(format!("{numerator}/{denominator}")));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    pub fn denominator(&self) -> u32 {
        self.denominator
    }

    /// Length in beats when a `basis` note value gets one beat.
    pub fn beats(&self, basis: u32) -> f64 {
        f64::from(self.numerator) * f64::from(basis) / f64::from(self.denominator)
    }

    /// Length in milliseconds at `tempo` beats per minute.
    pub fn duration_ms(&self, tempo: f64, basis: u32) -> Result<f64> {
        Ok(self.beats(basis) * ms_per_beat(tempo)?)
    }
}

impl FromStr for NoteLength {
    type Err = ResoundError;

    fn from_str(s: &str) -> Result<Self> {
        let (numerator, denominator) = s
            .split_once('/')
            .ok_or_else(|| ResoundError::format(s))?;
        let numerator = numerator
            .trim()
            .parse()
            .map_err(|_| ResoundError::format(s))?;
        let denominator = denominator
            .trim()
            .parse()
            .map_err(|_| ResoundError::format(s))?;
        Self::new(numerator, denominator).map_err(|_| ResoundError::format(s))
    }
}

impl TryFrom<String> for NoteLength {
    type Error = ResoundError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<NoteLength> for String {
    fn from(value: NoteLength) -> Self {
        value.to_string()
    }
}

impl fmt::Display for NoteLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// A single note or rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<Pitch>,
    pub length: NoteLength,
    /// Shift of this element's start relative to its natural position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_ms: Option<f64>,
}

impl Note {
    pub fn new(pitch: impl Into<Pitch>, length: &str) -> Result<Self> {
        Ok(Self {
            pitch: Some(pitch.into()),
            length: length.parse()?,
            offset_ms: None,
        })
    }

    pub fn rest(length: &str) -> Result<Self> {
        Ok(Self {
            pitch: None,
            length: length.parse()?,
            offset_ms: None,
        })
    }

    pub fn is_rest(&self) -> bool {
        self.pitch.is_none()
    }
}

/// Notes that start together. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ChordRepr")]
pub struct Chord {
    notes: Vec<Note>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offset_ms: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChordRepr {
    notes: Vec<Note>,
    #[serde(default)]
    offset_ms: Option<f64>,
}

impl TryFrom<ChordRepr> for Chord {
    type Error = ResoundError;

    fn try_from(value: ChordRepr) -> Result<Self> {
        let mut chord = Chord::new(value.notes)?;
        chord.offset_ms = value.offset_ms;
        Ok(chord)
    }
}

impl Chord {
    pub fn new(notes: Vec<Note>) -> Result<Self> {
        if notes.is_empty() {
            return Err(ResoundError::EmptyChord);
        }
        Ok(Self {
            notes,
            offset_ms: None,
        })
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn offset_ms(&self) -> Option<f64> {
        self.offset_ms
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SongElement {
    Chord(Chord),
    Note(Note),
}

impl SongElement {
    /// All notes of this element; a single note yields a one-element slice.
    pub fn notes(&self) -> &[Note] {
        match self {
            Self::Chord(chord) => chord.notes(),
            Self::Note(note) => std::slice::from_ref(note),
        }
    }

    pub fn offset_ms(&self) -> Option<f64> {
        match self {
            Self::Chord(chord) => chord.offset_ms,
            Self::Note(note) => note.offset_ms,
        }
    }

    pub fn set_offset_ms(&mut self, offset_ms: Option<f64>) {
        match self {
            Self::Chord(chord) => chord.offset_ms = offset_ms,
            Self::Note(note) => note.offset_ms = offset_ms,
        }
    }

    /// Time until the next element may start. For chords this is the
    /// shortest member, so longer members ring on under what follows.
    pub fn advance_ms(&self, tempo: f64, basis: u32) -> Result<f64> {
        let mut shortest = f64::INFINITY;
        for note in self.notes() {
            shortest = shortest.min(note.length.duration_ms(tempo, basis)?);
        }
        Ok(shortest)
    }
}

impl From<Note> for SongElement {
    fn from(value: Note) -> Self {
        Self::Note(value)
    }
}

impl From<Chord> for SongElement {
    fn from(value: Chord) -> Self {
        Self::Chord(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Song {
    elements: Vec<SongElement>,
}

impl Song {
    pub fn new(elements: Vec<SongElement>) -> Self {
        Self { elements }
    }

    /// Builds a melody of single notes from `(pitch, length)` pairs.
    pub fn melody<'a>(notes: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        notes
            .into_iter()
            .map(|(pitch, length)| Note::new(pitch, length).map(SongElement::from))
            .collect()
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn elements(&self) -> &[SongElement] {
        &self.elements
    }

    pub fn elements_mut(&mut self) -> &mut [SongElement] {
        &mut self.elements
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SongElement> {
        self.elements.iter()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn push(&mut self, element: impl Into<SongElement>) {
        self.elements.push(element.into());
    }

    /// Natural length of the song, ignoring offsets.
    pub fn duration_ms(&self, tempo: f64, basis: u32) -> Result<f64> {
        let mut total = 0.0;
        for element in &self.elements {
            total += element.advance_ms(tempo, basis)?;
        }
        Ok(total)
    }
}

impl FromIterator<SongElement> for Song {
    fn from_iter<T: IntoIterator<Item = SongElement>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Song {
    type Item = &'a SongElement;
    type IntoIter = std::slice::Iter<'a, SongElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}
