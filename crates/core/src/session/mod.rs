//! One puzzle's worth of shared timing state.
//!
//! The session owns the clock, the bus and every voice, and is the only thing
//! that moves time forward. Listeners see the notes of all voices merged into
//! start order, independent of the order voices were added in.

use crate::{
    motion::SoundSource, playback::PlaybackPlan, BeatClock, EngineConfig, HeardNote, Instrument,
    MetronomeHook, NoteEvent, NoteEventBus, PlaybackScheduler, Recording, Result, SharedListener,
    VoicePlayer,
};

/// Index of a voice inside its session.
pub type VoiceId = usize;

#[derive(Debug)]
pub struct PuzzleSession {
    config: EngineConfig,
    clock: BeatClock,
    bus: NoteEventBus,
    voices: Vec<VoicePlayer>,
    player: Option<VoiceId>,
    scheduler: PlaybackScheduler,
    now_ms: f64,
}

impl PuzzleSession {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let clock = BeatClock::new(config.clock.tempo)?;
        let scheduler = PlaybackScheduler::new(&config.playback).with_basis(config.clock.basis);
        Ok(Self {
            config,
            clock,
            bus: NoteEventBus::new(),
            voices: Vec::new(),
            player: None,
            scheduler,
            now_ms: 0.0,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Session time in milliseconds since the last reset.
    pub fn now_ms(&self) -> f64 {
        self.now_ms
    }

    pub fn clock(&self) -> &BeatClock {
        &self.clock
    }

    /// Changes the session tempo and tells every listener about it. An
    /// invalid tempo changes nothing.
    pub fn set_tempo(&mut self, tempo: f64) -> Result<()> {
        self.clock.set_tempo(tempo)?;
        self.config.clock.tempo = tempo;
        let reached = self.bus.broadcast_tempo(tempo);
        tracing::debug!(tempo, listeners = reached, "session tempo changed");
        Ok(())
    }

    pub fn set_metronome_enabled(&mut self, enabled: bool) {
        self.clock.set_metronome_enabled(enabled);
    }

    pub fn bus(&self) -> &NoteEventBus {
        &self.bus
    }

    /// Installs a metronome, enabled according to the clock settings.
    pub fn attach_metronome(&mut self, hook: MetronomeHook) {
        self.clock.attach_metronome(hook);
        self.clock.set_metronome_enabled(self.config.clock.metronome);
    }

    pub fn add_voice(&mut self, id: impl Into<String>, instrument: Box<dyn Instrument>) -> VoiceId {
        self.voices
            .push(VoicePlayer::with_config(id, instrument, &self.config.playback));
        self.voices.len() - 1
    }

    /// Marks the voice that plays back recordings.
    pub fn set_player_voice(&mut self, voice: VoiceId) {
        if voice < self.voices.len() {
            self.player = Some(voice);
        } else {
            tracing::warn!(voice, "unknown voice cannot become the player");
        }
    }

    pub fn voice(&self, voice: VoiceId) -> Option<&VoicePlayer> {
        self.voices.get(voice)
    }

    pub fn voice_mut(&mut self, voice: VoiceId) -> Option<&mut VoicePlayer> {
        self.voices.get_mut(voice)
    }

    pub fn voices(&self) -> &[VoicePlayer] {
        &self.voices
    }

    pub fn register_listener(&mut self, listener: SharedListener) {
        self.bus.register(listener);
    }

    pub fn unregister_listener(&mut self, listener: &SharedListener) {
        self.bus.unregister(listener);
    }

    /// Schedules `recording` on the player voice, aligned to the beat grid.
    pub fn play_recording(&mut self, recording: &Recording) -> Result<Option<PlaybackPlan>> {
        if self.player.is_none() {
            tracing::warn!(recording = %recording.id, "no player voice to play back on");
            return Ok(None);
        }
        self.scheduler.request(recording, &self.clock, self.now_ms)
    }

    pub fn is_playing_recording(&self) -> bool {
        self.scheduler.is_playing(self.now_ms)
    }

    /// Every placed voice currently sounding a note, as seen by the force
    /// field. Paused voices are silent.
    pub fn sound_sources(&self) -> Vec<SoundSource> {
        self.voices
            .iter()
            .filter(|voice| !voice.is_paused())
            .filter_map(|voice| {
                let position = voice.position()?;
                let notes: Vec<HeardNote> = voice.current_notes().iter().map(HeardNote::from).collect();
                (!notes.is_empty()).then(|| SoundSource::new(voice.id(), position, notes))
            })
            .collect()
    }

    /// Advances the session by `delta_seconds`, starts every due note and
    /// delivers the new notes to the bus in start order. The delivered
    /// events are returned as well. If a due recording cannot start, the
    /// error is returned and session time does not move.
    pub fn step(&mut self, delta_seconds: f64) -> Result<Vec<NoteEvent>> {
        if !delta_seconds.is_finite() || delta_seconds <= 0.0 {
            return Ok(Vec::new());
        }
        let now_ms = self.now_ms + delta_seconds * 1000.0;
        if let Some(player) = self.player.and_then(|index| self.voices.get_mut(index)) {
            self.scheduler.tick(now_ms, player)?;
        }
        self.now_ms = now_ms;
        self.clock.update(delta_seconds);

        let mut events: Vec<NoteEvent> = self
            .voices
            .iter_mut()
            .flat_map(|voice| voice.tick(now_ms))
            .collect();
        events.sort_by(|a, b| a.timestamp_ms.total_cmp(&b.timestamp_ms));

        for event in &events {
            self.bus.emit(event);
        }
        Ok(events)
    }

    /// Starts a new puzzle at `tempo`. Clock, listeners and voices are all
    /// replaced; an invalid tempo leaves the session as it was.
    pub fn reset(&mut self, tempo: f64) -> Result<()> {
        let clock = BeatClock::new(tempo)?;
        for voice in &mut self.voices {
            voice.stop();
        }

        self.config.clock.tempo = tempo;
        self.clock = clock;
        self.bus = NoteEventBus::new();
        self.voices.clear();
        self.player = None;
        self.scheduler =
            PlaybackScheduler::new(&self.config.playback).with_basis(self.config.clock.basis);
        self.now_ms = 0.0;
        tracing::debug!(tempo, "session reset");
        Ok(())
    }
}
