//! Synthesis capability consumed by voice players.
//!
//! Voice players never talk to an audio API directly. They start, ramp and
//! fade voices through [`Instrument`], so any backend (a real-time synth, an
//! offline renderer, or the in-memory [`CommandLog`]) can sit behind them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::Pitch;

/// Opaque id of one sounding voice inside an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoiceHandle(pub u64);

pub trait Instrument: Send {
    /// Starts a note that stops by itself after `duration_ms`.
    fn start_voice(&mut self, pitch: &Pitch, duration_ms: f64, gain: f32) -> VoiceHandle;

    /// Moves a sounding voice towards `gain` without clicking.
    fn ramp_gain(&mut self, handle: VoiceHandle, gain: f32, ramp_ms: f64);

    /// Silences a voice early with a short linear fade.
    fn fade_out(&mut self, handle: VoiceHandle, fade_ms: f64);
}

/// ADSR envelope. Times are in seconds, sustain is a level in `0..=1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl Envelope {
    /// Envelope level `elapsed_ms` into a note lasting `duration_ms`. The
    /// release is placed at the end of the note.
    pub fn level_at(&self, elapsed_ms: f64, duration_ms: f64) -> f64 {
        let t = elapsed_ms / 1000.0;
        let total = duration_ms / 1000.0;
        if t < 0.0 || t >= total {
            return 0.0;
        }

        let release_start = (total - self.release).max(0.0);
        let held = if t < self.attack {
            t / self.attack
        } else if t < self.attack + self.decay {
            1.0 - (1.0 - self.sustain) * (t - self.attack) / self.decay
        } else {
            self.sustain
        };

        if t < release_start {
            held
        } else {
            let release = (total - release_start).max(f64::EPSILON);
            held.min(self.sustain) * (total - t) / release
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timbre {
    /// Hammer-like attack with a quick decay.
    Piano,
    /// Slow, bell-like swell for landmarks.
    Fountain,
    /// Soft sustained tone used by creatures.
    Creature,
    /// Envelope drawn once from a seed, so every creature sounds a little
    /// different but always the same.
    Random(u64),
}

impl Timbre {
    pub fn envelope(&self) -> Envelope {
        match self {
            Self::Piano => Envelope {
                attack: 0.002,
                decay: 0.15,
                sustain: 0.3,
                release: 0.2,
            },
            Self::Fountain => Envelope {
                attack: 0.1,
                decay: 0.2,
                sustain: 0.7,
                release: 0.8,
            },
            Self::Creature => Envelope {
                attack: 0.05,
                decay: 0.1,
                sustain: 0.5,
                release: 0.15,
            },
            Self::Random(seed) => {
                let mut rng = StdRng::seed_from_u64(*seed);
                Envelope {
                    attack: rng.gen_range(0.01..0.1),
                    decay: rng.gen_range(0.05..0.2),
                    sustain: rng.gen_range(0.3..0.7),
                    release: rng.gen_range(0.05..0.3),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InstrumentCommand {
    Start {
        handle: VoiceHandle,
        frequency_hz: f64,
        duration_ms: f64,
        gain: f32,
    },
    Ramp {
        handle: VoiceHandle,
        gain: f32,
        ramp_ms: f64,
    },
    FadeOut {
        handle: VoiceHandle,
        fade_ms: f64,
    },
}

/// Instrument that records what it is asked to play instead of producing
/// sound. Clones share the same journal, so one clone can be handed to a
/// voice while another is kept for inspection.
#[derive(Debug, Clone)]
pub struct CommandLog {
    timbre: Timbre,
    shared: Arc<Mutex<Journal>>,
}

#[derive(Debug, Default)]
struct Journal {
    next_handle: u64,
    commands: Vec<InstrumentCommand>,
}

impl CommandLog {
    pub fn new(timbre: Timbre) -> Self {
        Self {
            timbre,
            shared: Arc::new(Mutex::new(Journal::default())),
        }
    }

    pub fn timbre(&self) -> Timbre {
        self.timbre
    }

    pub fn commands(&self) -> Vec<InstrumentCommand> {
        self.lock().commands.clone()
    }

    /// Frequencies of every started voice, in start order.
    pub fn started_frequencies(&self) -> Vec<f64> {
        self.lock()
            .commands
            .iter()
            .filter_map(|command| match command {
                InstrumentCommand::Start { frequency_hz, .. } => Some(*frequency_hz),
                _ => None,
            })
            .collect()
    }

    /// Handles that received an early fade.
    pub fn faded(&self) -> Vec<VoiceHandle> {
        self.lock()
            .commands
            .iter()
            .filter_map(|command| match command {
                InstrumentCommand::FadeOut { handle, .. } => Some(*handle),
                _ => None,
            })
            .collect()
    }

    /// Output level of a voice `elapsed_ms` after it started, combining the
    /// timbre's envelope with the most recent gain sent to it.
    pub fn level_at(&self, handle: VoiceHandle, elapsed_ms: f64) -> f64 {
        let journal = self.lock();
        let mut duration = None;
        let mut gain = 0.0f32;
        for command in &journal.commands {
            match command {
                InstrumentCommand::Start {
                    handle: h,
                    duration_ms,
                    gain: g,
                    ..
                } if *h == handle => {
                    duration = Some(*duration_ms);
                    gain = *g;
                }
                InstrumentCommand::Ramp { handle: h, gain: g, .. } if *h == handle => gain = *g,
                InstrumentCommand::FadeOut { handle: h, .. } if *h == handle => gain = 0.0,
                _ => {}
            }
        }

        duration.map_or(0.0, |duration| {
            self.timbre.envelope().level_at(elapsed_ms, duration) * f64::from(gain)
        })
    }

    fn lock(&self) -> MutexGuard<'_, Journal> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Instrument for CommandLog {
    fn start_voice(&mut self, pitch: &Pitch, duration_ms: f64, gain: f32) -> VoiceHandle {
        let frequency_hz = pitch.frequency();
        let mut journal = self.lock();
        journal.next_handle += 1;
        let handle = VoiceHandle(journal.next_handle);
        journal.commands.push(InstrumentCommand::Start {
            handle,
            frequency_hz,
            duration_ms,
            gain,
        });
        handle
    }

    fn ramp_gain(&mut self, handle: VoiceHandle, gain: f32, ramp_ms: f64) {
        self.lock().commands.push(InstrumentCommand::Ramp {
            handle,
            gain,
            ramp_ms,
        });
    }

    fn fade_out(&mut self, handle: VoiceHandle, fade_ms: f64) {
        self.lock()
            .commands
            .push(InstrumentCommand::FadeOut { handle, fade_ms });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_rises_holds_and_releases() {
        let envelope = Timbre::Piano.envelope();
        assert_eq!(envelope.level_at(0.0, 1000.0), 0.0);
        assert!((envelope.level_at(1.0, 1000.0) - 0.5).abs() < 1e-9);
        assert!((envelope.level_at(500.0, 1000.0) - 0.3).abs() < 1e-9);
        assert!((envelope.level_at(900.0, 1000.0) - 0.15).abs() < 1e-9);
        assert_eq!(envelope.level_at(1000.0, 1000.0), 0.0);
    }

    #[test]
    fn seeded_timbres_are_stable_and_in_range() {
        let first = Timbre::Random(7).envelope();
        assert_eq!(first, Timbre::Random(7).envelope());
        assert_ne!(first, Timbre::Random(8).envelope());

        for seed in 0..64 {
            let envelope = Timbre::Random(seed).envelope();
            assert!((0.01..0.1).contains(&envelope.attack));
            assert!((0.05..0.2).contains(&envelope.decay));
            assert!((0.3..0.7).contains(&envelope.sustain));
            assert!((0.05..0.3).contains(&envelope.release));
        }
    }

    #[test]
    fn clones_share_a_journal() {
        let log = CommandLog::new(Timbre::Fountain);
        let mut voice: Box<dyn Instrument> = Box::new(log.clone());

        let handle = voice.start_voice(&Pitch::name("A4"), 500.0, 1.0);
        voice.ramp_gain(handle, 0.5, 10.0);
        voice.fade_out(handle, 50.0);

        assert_eq!(log.started_frequencies(), vec![440.0]);
        assert_eq!(log.faded(), vec![handle]);
        assert_eq!(log.commands().len(), 3);
    }

    #[test]
    fn level_tracks_gain_changes() {
        let log = CommandLog::new(Timbre::Creature);
        let mut voice = log.clone();
        let handle = voice.start_voice(&Pitch::name("C4"), 2000.0, 1.0);
        let full = log.level_at(handle, 1000.0);
        voice.ramp_gain(handle, 0.5, 10.0);
        assert!((log.level_at(handle, 1000.0) - full * 0.5).abs() < 1e-9);
        voice.fade_out(handle, 50.0);
        assert_eq!(log.level_at(handle, 1000.0), 0.0);
        assert_eq!(log.level_at(VoiceHandle(99), 10.0), 0.0);
    }
}
