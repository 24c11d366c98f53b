use std::fmt;

use crate::{ResoundError, Result};

/// Milliseconds per beat at `tempo`, rejecting tempos that cannot drive a
/// clock.
pub fn ms_per_beat(tempo: f64) -> Result<f64> {
    if !tempo.is_finite() || tempo <= 0.0 {
        return Err(ResoundError::InvalidTempo(tempo));
    }
    Ok(60_000.0 / tempo)
}

/// Callback invoked with the index of every beat boundary the clock crosses.
pub type MetronomeHook = Box<dyn FnMut(u64) + Send>;

/// Session-wide musical time, counted in fractional beats (quarter notes).
///
/// Position only moves forward while a session is active; [`BeatClock::reset`]
/// is the single way back to zero.
pub struct BeatClock {
    tempo: f64,
    current_beat: f64,
    metronome: Option<Metronome>,
}

impl BeatClock {
    pub fn new(tempo: f64) -> Result<Self> {
        ms_per_beat(tempo)?;
        Ok(Self {
            tempo,
            current_beat: 0.0,
            metronome: None,
        })
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    pub fn current_beat(&self) -> f64 {
        self.current_beat
    }

    fn beats_per_second(&self) -> f64 {
        self.tempo / 60.0
    }

    fn ms_per_beat(&self) -> f64 {
        60_000.0 / self.tempo
    }

    /// Advances the clock by `delta_seconds` of real time. Non-positive or
    /// non-finite deltas are ignored.
    pub fn update(&mut self, delta_seconds: f64) {
        if !delta_seconds.is_finite() || delta_seconds <= 0.0 {
            return;
        }

        self.current_beat += delta_seconds * self.beats_per_second();
        if let Some(metronome) = self.metronome.as_mut() {
            metronome.observe(self.current_beat);
        }
    }

    /// Changes the tempo from now on without moving the current position.
    pub fn set_tempo(&mut self, tempo: f64) -> Result<()> {
        ms_per_beat(tempo)?;
        tracing::debug!(from = self.tempo, to = tempo, "tempo changed");
        self.tempo = tempo;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.current_beat = 0.0;
        if let Some(metronome) = self.metronome.as_mut() {
            metronome.last_beat = None;
        }
    }

    pub fn beats_to_ms(&self, beats: f64) -> f64 {
        beats * self.ms_per_beat()
    }

    pub fn ms_to_beats(&self, ms: f64) -> f64 {
        ms / self.ms_per_beat()
    }

    pub fn time_since_last_beat_ms(&self) -> f64 {
        self.current_beat.fract() * self.ms_per_beat()
    }

    pub fn time_until_next_beat_ms(&self) -> f64 {
        (1.0 - self.current_beat.fract()) * self.ms_per_beat()
    }

    /// Installs a metronome. It starts enabled and treats beat 0 as the first
    /// boundary, so the first update always clicks.
    pub fn attach_metronome(&mut self, hook: MetronomeHook) {
        self.metronome = Some(Metronome {
            enabled: true,
            last_beat: None,
            hook,
        });
    }

    pub fn detach_metronome(&mut self) {
        self.metronome = None;
    }

    pub fn set_metronome_enabled(&mut self, enabled: bool) {
        if let Some(metronome) = self.metronome.as_mut() {
            metronome.enabled = enabled;
        }
    }

    pub fn toggle_metronome(&mut self) {
        if let Some(metronome) = self.metronome.as_mut() {
            metronome.enabled = !metronome.enabled;
        }
    }

    pub fn metronome_enabled(&self) -> bool {
        self.metronome.as_ref().is_some_and(|m| m.enabled)
    }
}

impl fmt::Debug for BeatClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeatClock")
            .field("tempo", &self.tempo)
            .field("current_beat", &self.current_beat)
            .field("metronome", &self.metronome_enabled())
            .finish()
    }
}

struct Metronome {
    enabled: bool,
    last_beat: Option<u64>,
    hook: MetronomeHook,
}

impl Metronome {
    /// Clicks once for each boundary passed since the last observation.
    /// While disabled the position is still tracked so that re-enabling does
    /// not replay the silent beats.
    fn observe(&mut self, current_beat: f64) {
        let floor = current_beat.floor() as u64;
        let first = match self.last_beat {
            Some(last) if floor <= last => return,
            Some(last) => last + 1,
            None => 0,
        };

        if self.enabled {
            for beat in first..=floor {
                (self.hook)(beat);
            }
        }
        self.last_beat = Some(floor);
    }
}
