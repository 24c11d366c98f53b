use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the engine.
///
/// Every field falls back to its default when missing, so a puzzle can ship
/// a partial file such as `{"clock": {"tempo": 96}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub clock: ClockConfig,
    pub harmony: HarmonyConfig,
    pub recording: RecordingConfig,
    pub playback: PlaybackConfig,
    pub motion: MotionConfig,
}

impl EngineConfig {
    /// Parses a configuration from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads and parses a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Returns a copy with the session tempo replaced.
    pub fn with_tempo(mut self, tempo: f64) -> Self {
        self.clock.tempo = tempo;
        self
    }
}

/// Beat clock settings supplied at puzzle load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Tempo in beats (quarter notes) per minute.
    pub tempo: f64,
    /// Which note value gets the beat; 4 means a quarter note.
    pub basis: u32,
    pub metronome: bool,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tempo: 120.0,
            basis: 4,
            metronome: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonyConfig {
    /// Two notes sound together when their onsets are closer than this many
    /// beats. A quarter beat is sixteenth-note granularity.
    pub overlap_threshold_beats: f64,
}

impl Default for HarmonyConfig {
    fn default() -> Self {
        Self {
            overlap_threshold_beats: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Quantisation grid expressed as a note value; 16 snaps to sixteenths.
    pub grid: u32,
    /// Captured notes older than this are dropped.
    pub window_ms: f64,
    /// Fraction of a source's audible range the recorder must be inside.
    pub range_fraction: f64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            grid: 16,
            window_ms: 10_000.0,
            range_fraction: 0.5,
        }
    }
}

impl RecordingConfig {
    /// Number of grid slots per beat.
    pub fn slots_per_beat(&self) -> f64 {
        f64::from(self.grid.max(4)) / 4.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// A playback request this soon after a beat starts immediately.
    pub beat_tolerance_ms: f64,
    /// Fade applied when a voice is paused or stopped.
    pub fade_ms: f64,
    /// Ramp applied by volume updates.
    pub volume_ramp_ms: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            beat_tolerance_ms: 50.0,
            fade_ms: 50.0,
            volume_ramp_ms: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub audible_range: f64,
    pub min_separation: f64,
    pub attraction: f64,
    pub repulsion: f64,
    /// Per-step velocity multiplier.
    pub damping: f64,
    pub max_speed: f64,
    pub body_radius: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            audible_range: 20.0,
            min_separation: 1.5,
            attraction: 2.0,
            repulsion: 3.0,
            damping: 0.9,
            max_speed: 4.0,
            body_radius: 0.9,
        }
    }
}
