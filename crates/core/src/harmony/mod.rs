//! Interval classification between sounding notes.
//!
//! Intervals are folded into a single octave (0-11 semitones) and sorted into
//! three classes: perfect (unison, fourth, fifth), consonant (thirds and
//! sixths) and dissonant (everything else). Harmony between two sources only
//! exists when their notes start within the same subdivision.

use serde::{Deserialize, Serialize};

use crate::{BeatClock, HarmonyConfig, NoteEvent, Pitch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Harmony {
    Perfect,
    Consonant,
    Dissonant,
    /// The sources are not sounding at the same time.
    None,
}

/// A note as heard by the analyzer: what was played and when it started.
#[derive(Debug, Clone, PartialEq)]
pub struct HeardNote {
    pub pitch: Pitch,
    pub timestamp_ms: f64,
}

impl HeardNote {
    pub fn new(pitch: impl Into<Pitch>, timestamp_ms: f64) -> Self {
        Self {
            pitch: pitch.into(),
            timestamp_ms,
        }
    }
}

impl From<&NoteEvent> for HeardNote {
    fn from(event: &NoteEvent) -> Self {
        Self {
            pitch: event.pitch.clone(),
            timestamp_ms: event.timestamp_ms,
        }
    }
}

/// Semitone distance between two pitches reduced to one octave.
pub fn interval(a: &Pitch, b: &Pitch) -> u8 {
    ((a.midi() - b.midi()).unsigned_abs() % 12) as u8
}

pub fn classify(semitones: u8) -> Harmony {
    match semitones % 12 {
        0 | 5 | 7 => Harmony::Perfect,
        3 | 4 | 8 | 9 => Harmony::Consonant,
        _ => Harmony::Dissonant,
    }
}

#[derive(Debug, Clone)]
pub struct HarmonyAnalyzer {
    overlap_threshold_beats: f64,
}

impl Default for HarmonyAnalyzer {
    fn default() -> Self {
        Self::new(&HarmonyConfig::default())
    }
}

impl HarmonyAnalyzer {
    pub fn new(config: &HarmonyConfig) -> Self {
        Self {
            overlap_threshold_beats: config.overlap_threshold_beats,
        }
    }

    /// True when the onsets are less than one subdivision apart at the
    /// clock's tempo.
    pub fn notes_overlap(&self, a: &HeardNote, b: &HeardNote, clock: &BeatClock) -> bool {
        let beat_diff = clock.ms_to_beats((a.timestamp_ms - b.timestamp_ms).abs());
        beat_diff < self.overlap_threshold_beats
    }

    /// Majority vote over every cross pair of notes between the sources.
    ///
    /// Timing is judged on the first note of each side. When consonant and
    /// dissonant pairs are equally common, including the case where every
    /// pair is perfect, the result is [`Harmony::Perfect`], which callers
    /// treat as no reaction.
    pub fn analyze(&self, first: &[HeardNote], second: &[HeardNote], clock: &BeatClock) -> Harmony {
        let (Some(lead_a), Some(lead_b)) = (first.first(), second.first()) else {
            return Harmony::None;
        };
        if !self.notes_overlap(lead_a, lead_b, clock) {
            return Harmony::None;
        }

        let mut consonant = 0usize;
        let mut dissonant = 0usize;
        for a in first {
            for b in second {
                match classify(interval(&a.pitch, &b.pitch)) {
                    Harmony::Consonant => consonant += 1,
                    Harmony::Dissonant => dissonant += 1,
                    _ => {}
                }
            }
        }

        match consonant.cmp(&dissonant) {
            std::cmp::Ordering::Greater => Harmony::Consonant,
            std::cmp::Ordering::Less => Harmony::Dissonant,
            std::cmp::Ordering::Equal => Harmony::Perfect,
        }
    }
}
