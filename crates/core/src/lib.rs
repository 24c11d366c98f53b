//! Core library for Resound.
//!
//! Deterministic musical time for puzzle sessions: a beat clock, per-voice
//! playback schedules, a note-event bus, harmony classification, recording
//! with quantisation, song matching and the harmony-driven force field. Each
//! module owns one subsystem; [`PuzzleSession`] ties them together for a
//! single puzzle.

pub mod config;
pub mod error;
pub mod events;
pub mod harmony;
pub mod instrument;
pub mod listener;
pub mod matcher;
pub mod motion;
pub mod pitch;
pub mod playback;
pub mod record;
pub mod session;
pub mod song;
pub mod timeline;
pub mod voice;

pub use config::{
    ClockConfig, EngineConfig, HarmonyConfig, MotionConfig, PlaybackConfig, RecordingConfig,
};
pub use error::{ResoundError, Result};
pub use events::{NoteEvent, NoteEventBus, NoteListener, SharedListener, SourceId};
pub use harmony::{Harmony, HarmonyAnalyzer, HeardNote};
pub use instrument::{CommandLog, Envelope, Instrument, InstrumentCommand, Timbre, VoiceHandle};
pub use listener::{GateCompletion, GateKind, SongGate};
pub use matcher::songs_match;
pub use motion::{
    distance_volume, CollisionQuery, Force, HarmonicForceField, MotionState, OpenField, Position,
    SoundSource,
};
pub use pitch::Pitch;
pub use playback::{calculate_song_duration, PlaybackPlan, PlaybackScheduler};
pub use record::{CapturedNote, PerformanceRecorder, Recording};
pub use session::{PuzzleSession, VoiceId};
pub use song::{Chord, Note, NoteLength, Song, SongElement};
pub use timeline::{BeatClock, MetronomeHook};
pub use voice::{PlaybackRequest, PlaybackState, VoicePlayer};
