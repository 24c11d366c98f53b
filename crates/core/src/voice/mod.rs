//! Per-voice playback scheduling.
//!
//! A [`VoicePlayer`] turns a [`Song`] into a list of start deadlines once, when
//! playback begins, and then consumes that list from [`VoicePlayer::tick`].
//! Pausing records the index of the next element; resuming rebases the same
//! schedule onto the resume time, so relative timing never drifts.
//!
//! ```text
//! Idle --play--> Playing --pause--> Paused --resume--> Playing
//!                   |                                     |
//!                   +------- finished / stop ------> Idle <+
//! ```

use serde::Serialize;

use crate::{
    Instrument, NoteEvent, PlaybackConfig, Position, Result, Song, SourceId, VoiceHandle,
};

/// Parameters of one `play` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackRequest {
    pub data: Song,
    pub tempo: f64,
    pub basis: u32,
}

impl PlaybackRequest {
    pub fn new(data: Song, tempo: f64) -> Self {
        Self {
            data,
            tempo,
            basis: 4,
        }
    }
}

/// Snapshot of a voice's playback state, suitable for indicator UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub is_playing: bool,
    pub is_paused: bool,
    pub current_data: Option<Song>,
    /// Next element to play. Only meaningful while paused.
    pub current_index: usize,
    pub tempo: f64,
    pub basis: u32,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            is_paused: false,
            current_data: None,
            current_index: 0,
            tempo: 120.0,
            basis: 4,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    /// Start relative to the beginning of the song.
    start_ms: f64,
    durations_ms: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Schedule {
    slots: Vec<Slot>,
    end_ms: f64,
}

impl Schedule {
    /// Natural start of every element plus its offset. The first element's
    /// offset is ignored and starts never move before their predecessor.
    fn build(song: &Song, tempo: f64, basis: u32) -> Result<Self> {
        let mut slots = Vec::with_capacity(song.len());
        let mut natural_ms = 0.0;
        let mut previous_start = 0.0f64;
        let mut end_ms = 0.0f64;

        for (index, element) in song.iter().enumerate() {
            let durations_ms = element
                .notes()
                .iter()
                .map(|note| note.length.duration_ms(tempo, basis))
                .collect::<Result<Vec<_>>>()?;
            let advance_ms = durations_ms.iter().copied().fold(f64::INFINITY, f64::min);

            let offset_ms = if index == 0 {
                0.0
            } else {
                element.offset_ms().unwrap_or(0.0)
            };
            let start_ms = (natural_ms + offset_ms).max(previous_start);

            previous_start = start_ms;
            end_ms = start_ms + advance_ms;
            natural_ms += advance_ms;
            slots.push(Slot {
                start_ms,
                durations_ms,
            });
        }

        Ok(Self { slots, end_ms })
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveVoice {
    handle: VoiceHandle,
    element: usize,
    ends_at_ms: f64,
}

/// One independently scheduled playback stream.
pub struct VoicePlayer {
    id: SourceId,
    position: Option<Position>,
    instrument: Box<dyn Instrument>,
    state: PlaybackState,
    schedule: Option<Schedule>,
    /// Session time that corresponds to schedule time zero.
    origin_ms: f64,
    next_index: usize,
    stop_requested: bool,
    active: Vec<ActiveVoice>,
    current_element: Option<usize>,
    current_notes: Vec<NoteEvent>,
    volume: f32,
    fade_ms: f64,
    ramp_ms: f64,
}

impl VoicePlayer {
    pub fn new(id: impl Into<SourceId>, instrument: Box<dyn Instrument>) -> Self {
        Self::with_config(id, instrument, &PlaybackConfig::default())
    }

    pub fn with_config(
        id: impl Into<SourceId>,
        instrument: Box<dyn Instrument>,
        config: &PlaybackConfig,
    ) -> Self {
        Self {
            id: id.into(),
            position: None,
            instrument,
            state: PlaybackState::default(),
            schedule: None,
            origin_ms: 0.0,
            next_index: 0,
            stop_requested: false,
            active: Vec::new(),
            current_element: None,
            current_notes: Vec::new(),
            volume: 1.0,
            fade_ms: config.fade_ms,
            ramp_ms: config.volume_ramp_ms,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused
    }

    pub fn is_idle(&self) -> bool {
        !self.state.is_playing && !self.state.is_paused
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    /// World position stamped on every note this voice emits from now on.
    pub fn set_position(&mut self, position: Position) {
        self.position = Some(position);
    }

    /// Notes of the most recently started element while they still sound.
    /// Empty during rests, once those notes have ended, and while paused or
    /// idle.
    pub fn current_notes(&self) -> &[NoteEvent] {
        &self.current_notes
    }

    /// Starts `request` at session time `now_ms`. The first element is
    /// emitted by the next [`tick`](Self::tick) at or after `now_ms`.
    ///
    /// Does nothing while already playing. A paused voice continues from its
    /// paused index in `request`, like [`resume`](Self::resume) with new data.
    pub fn play(&mut self, request: PlaybackRequest, now_ms: f64) -> Result<()> {
        if self.state.is_playing {
            tracing::debug!(voice = %self.id, "already playing, ignoring play request");
            return Ok(());
        }

        let schedule = Schedule::build(&request.data, request.tempo, request.basis)?;
        if schedule.slots.is_empty() {
            tracing::warn!(voice = %self.id, "empty song, nothing to play");
            return Ok(());
        }

        let index = if self.state.is_paused {
            self.state.current_index
        } else {
            0
        };
        let Some(start_ms) = schedule.slots.get(index).map(|slot| slot.start_ms) else {
            tracing::warn!(voice = %self.id, index, "paused position is past the end of the song");
            self.reset_state();
            return Ok(());
        };

        self.schedule = Some(schedule);
        self.origin_ms = now_ms - start_ms;
        self.next_index = index;
        self.stop_requested = false;
        self.state = PlaybackState {
            is_playing: true,
            is_paused: false,
            current_data: Some(request.data),
            current_index: index,
            tempo: request.tempo,
            basis: request.basis,
        };
        tracing::debug!(voice = %self.id, tempo = request.tempo, index, "playback started");
        Ok(())
    }

    /// Continues a paused voice from the element after the pause, keeping the
    /// same spacing between elements.
    pub fn resume(&mut self, now_ms: f64) {
        if !self.state.is_paused {
            return;
        }
        let Some(schedule) = self.schedule.as_ref() else {
            return;
        };
        let index = self.state.current_index;
        let Some(slot) = schedule.slots.get(index) else {
            self.reset_state();
            return;
        };

        self.origin_ms = now_ms - slot.start_ms;
        self.next_index = index;
        self.stop_requested = false;
        self.state.is_playing = true;
        self.state.is_paused = false;
        tracing::debug!(voice = %self.id, index, "playback resumed");
    }

    /// Asks the voice to pause at the next element boundary. The element
    /// currently sounding keeps ringing; anything still sounding from earlier
    /// elements is faded out now.
    pub fn pause(&mut self) {
        if !self.state.is_playing {
            return;
        }
        self.stop_requested = true;

        let current = self.current_element;
        let fade_ms = self.fade_ms;
        let instrument = &mut self.instrument;
        self.active.retain(|voice| {
            if Some(voice.element) == current {
                true
            } else {
                instrument.fade_out(voice.handle, fade_ms);
                false
            }
        });
    }

    /// Returns to idle immediately and forgets the position.
    pub fn stop(&mut self) {
        for voice in self.active.drain(..) {
            self.instrument.fade_out(voice.handle, self.fade_ms);
        }
        self.reset_state();
        tracing::debug!(voice = %self.id, "playback stopped");
    }

    /// Ramps every sounding note to `multiplier` and uses it for new notes.
    pub fn update_volume(&mut self, multiplier: f32) {
        self.volume = multiplier.max(0.0);
        for voice in &self.active {
            self.instrument
                .ramp_gain(voice.handle, self.volume, self.ramp_ms);
        }
    }

    /// Starts every element whose deadline is at or before `now_ms` and
    /// returns the resulting note events in start order. Each event carries
    /// its exact scheduled start time.
    pub fn tick(&mut self, now_ms: f64) -> Vec<NoteEvent> {
        self.active.retain(|voice| voice.ends_at_ms > now_ms);
        if let Some(current) = self.current_element {
            if !self.active.iter().any(|voice| voice.element == current) {
                self.current_notes.clear();
            }
        }

        let mut events = Vec::new();
        while self.state.is_playing {
            let Some(schedule) = self.schedule.as_ref() else {
                break;
            };

            let Some(slot) = schedule.slots.get(self.next_index) else {
                if now_ms >= self.origin_ms + schedule.end_ms {
                    self.reset_state();
                    tracing::debug!(voice = %self.id, "playback finished");
                }
                break;
            };

            let due_ms = self.origin_ms + slot.start_ms;
            if due_ms > now_ms {
                break;
            }
            let durations = slot.durations_ms.clone();

            if self.stop_requested {
                self.stop_requested = false;
                self.state.is_playing = false;
                self.state.is_paused = true;
                self.state.current_index = self.next_index;
                self.current_element = None;
                self.current_notes.clear();
                tracing::debug!(voice = %self.id, index = self.next_index, "playback paused");
                break;
            }

            let index = self.next_index;
            self.start_element(index, &durations, due_ms, now_ms, &mut events);
            self.next_index += 1;
        }

        events
    }

    fn start_element(
        &mut self,
        index: usize,
        durations: &[f64],
        due_ms: f64,
        now_ms: f64,
        events: &mut Vec<NoteEvent>,
    ) {
        let Some(element) = self
            .state
            .current_data
            .as_ref()
            .and_then(|song| song.elements().get(index))
        else {
            return;
        };

        self.current_element = Some(index);
        self.current_notes.clear();
        for (note, duration_ms) in element.notes().iter().zip(durations) {
            let Some(pitch) = note.pitch.as_ref() else {
                continue;
            };

            let handle = self.instrument.start_voice(pitch, *duration_ms, self.volume);
            let ends_at_ms = due_ms + duration_ms;
            if ends_at_ms > now_ms {
                self.active.push(ActiveVoice {
                    handle,
                    element: index,
                    ends_at_ms,
                });
            }

            let event = NoteEvent {
                pitch: pitch.clone(),
                length: note.length,
                timestamp_ms: due_ms,
                source_id: self.id.clone(),
                source_position: self.position,
            };
            self.current_notes.push(event.clone());
            events.push(event);
        }
    }

    fn reset_state(&mut self) {
        let (tempo, basis) = (self.state.tempo, self.state.basis);
        self.state = PlaybackState {
            tempo,
            basis,
            ..PlaybackState::default()
        };
        self.schedule = None;
        self.next_index = 0;
        self.stop_requested = false;
        self.current_element = None;
        self.current_notes.clear();
    }
}

impl std::fmt::Debug for VoicePlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicePlayer")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("next_index", &self.next_index)
            .field("active", &self.active.len())
            .field("volume", &self.volume)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chord, CommandLog, Note, ResoundError, Timbre};

    fn voice() -> (VoicePlayer, CommandLog) {
        let log = CommandLog::new(Timbre::Piano);
        (VoicePlayer::new("player", Box::new(log.clone())), log)
    }

    fn melody(notes: &[&str]) -> Song {
        Song::melody(notes.iter().map(|pitch| (*pitch, "1/4"))).unwrap()
    }

    fn pitches(events: &[NoteEvent]) -> Vec<String> {
        events.iter().map(|event| event.pitch.to_string()).collect()
    }

    #[test]
    fn plays_notes_on_their_deadlines() {
        let (mut voice, _log) = voice();
        voice
            .play(PlaybackRequest::new(melody(&["C4", "D4", "E4"]), 120.0), 0.0)
            .unwrap();

        let first = voice.tick(0.0);
        assert_eq!(pitches(&first), vec!["C4"]);
        assert_eq!(first[0].timestamp_ms, 0.0);
        assert!(voice.tick(499.0).is_empty());

        let second = voice.tick(500.0);
        assert_eq!(pitches(&second), vec!["D4"]);
        assert_eq!(second[0].timestamp_ms, 500.0);

        assert_eq!(pitches(&voice.tick(1000.0)), vec!["E4"]);
        assert!(voice.is_playing());
        assert!(voice.tick(1499.0).is_empty());
        voice.tick(1500.0);
        assert!(voice.is_idle());
        assert!(voice.state().current_data.is_none());
    }

    #[test]
    fn late_tick_catches_up_in_order() {
        let (mut voice, _log) = voice();
        voice
            .play(PlaybackRequest::new(melody(&["C4", "D4", "E4"]), 120.0), 100.0)
            .unwrap();

        let events = voice.tick(1200.0);
        assert_eq!(pitches(&events), vec!["C4", "D4", "E4"]);
        let stamps: Vec<f64> = events.iter().map(|e| e.timestamp_ms).collect();
        assert_eq!(stamps, vec![100.0, 600.0, 1100.0]);
    }

    #[test]
    fn chords_start_together_and_advance_by_shortest() {
        let (mut voice, log) = voice();
        let chord = Chord::new(vec![
            Note::new("C3", "1/1").unwrap(),
            Note::new("E4", "1/8").unwrap(),
        ])
        .unwrap();
        let song = Song::new(vec![chord.into(), Note::new("G4", "1/4").unwrap().into()]);
        voice.play(PlaybackRequest::new(song, 120.0), 0.0).unwrap();

        let chord_events = voice.tick(0.0);
        assert_eq!(pitches(&chord_events), vec!["C3", "E4"]);
        assert!(chord_events.iter().all(|e| e.timestamp_ms == 0.0));
        assert_eq!(pitches(&voice.tick(250.0)), vec!["G4"]);
        assert_eq!(log.started_frequencies().len(), 3);
    }

    #[test]
    fn rests_take_time_but_make_no_sound() {
        let (mut voice, log) = voice();
        let song = Song::new(vec![
            Note::rest("1/4").unwrap().into(),
            Note::new("A4", "1/4").unwrap().into(),
        ]);
        voice.play(PlaybackRequest::new(song, 120.0), 0.0).unwrap();

        assert!(voice.tick(0.0).is_empty());
        assert!(voice.current_notes().is_empty());
        assert!(log.started_frequencies().is_empty());
        let events = voice.tick(500.0);
        assert_eq!(pitches(&events), vec!["A4"]);
        assert_eq!(log.started_frequencies(), vec![440.0]);
    }

    #[test]
    fn play_while_playing_is_ignored() {
        let (mut voice, _log) = voice();
        voice
            .play(PlaybackRequest::new(melody(&["C4", "D4"]), 120.0), 0.0)
            .unwrap();
        voice
            .play(PlaybackRequest::new(melody(&["A4"]), 60.0), 10.0)
            .unwrap();

        assert_eq!(voice.state().tempo, 120.0);
        assert_eq!(pitches(&voice.tick(0.0)), vec!["C4"]);
    }

    #[test]
    fn pause_and_resume_replays_the_rest_exactly_once() {
        let (mut voice, _log) = voice();
        voice
            .play(PlaybackRequest::new(melody(&["C4", "D4", "E4", "F4"]), 120.0), 0.0)
            .unwrap();

        let mut heard = voice.tick(0.0);
        voice.pause();
        assert!(voice.is_playing(), "pause waits for the element boundary");
        heard.extend(voice.tick(500.0));
        assert!(voice.is_paused());
        assert_eq!(voice.state().current_index, 1);
        assert!(voice.tick(5000.0).is_empty());

        voice.resume(2000.0);
        heard.extend(voice.tick(2000.0));
        heard.extend(voice.tick(2500.0));
        heard.extend(voice.tick(3000.0));
        voice.tick(3500.0);

        assert_eq!(pitches(&heard), vec!["C4", "D4", "E4", "F4"]);
        let stamps: Vec<f64> = heard.iter().map(|e| e.timestamp_ms).collect();
        assert_eq!(stamps, vec![0.0, 2000.0, 2500.0, 3000.0]);
        assert!(voice.is_idle());
    }

    #[test]
    fn play_while_paused_continues_from_the_paused_element() {
        let (mut voice, _log) = voice();
        let song = melody(&["C4", "D4", "E4"]);
        voice
            .play(PlaybackRequest::new(song.clone(), 120.0), 0.0)
            .unwrap();
        voice.tick(0.0);
        voice.pause();
        voice.tick(500.0);
        assert_eq!(voice.state().current_index, 1);

        voice.play(PlaybackRequest::new(song, 120.0), 2000.0).unwrap();
        assert!(voice.is_playing());
        let mut heard = voice.tick(2000.0);
        heard.extend(voice.tick(2500.0));
        assert_eq!(pitches(&heard), vec!["D4", "E4"]);
        let stamps: Vec<f64> = heard.iter().map(|e| e.timestamp_ms).collect();
        assert_eq!(stamps, vec![2000.0, 2500.0]);
    }

    #[test]
    fn paused_position_past_a_shorter_song_goes_idle() {
        let (mut voice, _log) = voice();
        voice
            .play(PlaybackRequest::new(melody(&["C4", "D4", "E4"]), 120.0), 0.0)
            .unwrap();
        voice.tick(0.0);
        voice.tick(500.0);
        voice.pause();
        voice.tick(1000.0);
        assert_eq!(voice.state().current_index, 2);

        voice
            .play(PlaybackRequest::new(melody(&["A4"]), 120.0), 2000.0)
            .unwrap();
        assert!(voice.is_idle());
        assert!(voice.tick(2000.0).is_empty());
    }

    #[test]
    fn current_notes_end_with_the_notes() {
        let (mut voice, _log) = voice();
        let mut song = Song::melody([("C4", "1/8"), ("D4", "1/4")]).unwrap();
        song.elements_mut()[1].set_offset_ms(Some(200.0));
        voice.play(PlaybackRequest::new(song, 120.0), 0.0).unwrap();

        voice.tick(0.0);
        assert_eq!(pitches(voice.current_notes()), vec!["C4"]);
        // C4 ended at 250 ms and D4 is not due until 450 ms.
        assert!(voice.tick(300.0).is_empty());
        assert!(voice.current_notes().is_empty());
        assert_eq!(pitches(&voice.tick(450.0)), vec!["D4"]);
        assert_eq!(pitches(voice.current_notes()), vec!["D4"]);
    }

    #[test]
    fn paused_voice_reports_no_current_notes() {
        let (mut voice, _log) = voice();
        let chord = Chord::new(vec![
            Note::new("C3", "1/1").unwrap(),
            Note::new("E4", "1/4").unwrap(),
        ])
        .unwrap();
        let song = Song::new(vec![chord.into(), Note::new("G4", "1/4").unwrap().into()]);
        voice.play(PlaybackRequest::new(song, 120.0), 0.0).unwrap();
        voice.tick(0.0);
        voice.pause();

        voice.tick(500.0);
        assert!(voice.is_paused());
        assert!(voice.current_notes().is_empty());
    }

    #[test]
    fn pause_fades_older_notes_but_keeps_the_current_one() {
        let (mut voice, log) = voice();
        let chord = Chord::new(vec![
            Note::new("C3", "1/1").unwrap(),
            Note::new("E4", "1/4").unwrap(),
        ])
        .unwrap();
        let song = Song::new(vec![
            chord.into(),
            Note::new("G4", "1/4").unwrap().into(),
            Note::new("A4", "1/4").unwrap().into(),
        ]);
        voice.play(PlaybackRequest::new(song, 120.0), 0.0).unwrap();
        voice.tick(0.0);
        voice.tick(500.0);

        voice.pause();
        // Handle 1 is the sustained C3 from the chord; G4 (handle 3) keeps ringing.
        assert_eq!(log.faded(), vec![VoiceHandle(1)]);
    }

    #[test]
    fn stop_fades_everything_and_forgets_position() {
        let (mut voice, log) = voice();
        voice
            .play(PlaybackRequest::new(melody(&["C4", "D4"]), 120.0), 0.0)
            .unwrap();
        voice.tick(0.0);
        voice.stop();

        assert!(voice.is_idle());
        assert_eq!(log.faded(), vec![VoiceHandle(1)]);
        voice.resume(100.0);
        assert!(voice.is_idle());
        assert!(voice.tick(1000.0).is_empty());
    }

    #[test]
    fn offsets_shift_all_but_the_first_element() {
        let (mut voice, _log) = voice();
        let mut song = melody(&["C4", "D4", "E4"]);
        for element in song.elements_mut() {
            element.set_offset_ms(Some(100.0));
        }
        voice.play(PlaybackRequest::new(song, 120.0), 0.0).unwrap();

        let events = voice.tick(2000.0);
        let stamps: Vec<f64> = events.iter().map(|e| e.timestamp_ms).collect();
        assert_eq!(stamps, vec![0.0, 600.0, 1100.0]);
    }

    #[test]
    fn volume_updates_ramp_sounding_notes() {
        let (mut voice, log) = voice();
        voice
            .play(PlaybackRequest::new(melody(&["C4"]), 120.0), 0.0)
            .unwrap();
        voice.tick(0.0);
        voice.update_volume(0.25);

        assert_eq!(voice.volume(), 0.25);
        assert!(log.commands().iter().any(|command| matches!(
            command,
            crate::InstrumentCommand::Ramp { gain, .. } if *gain == 0.25
        )));
    }

    #[test]
    fn invalid_tempo_leaves_voice_idle() {
        let (mut voice, _log) = voice();
        let err = voice
            .play(PlaybackRequest::new(melody(&["C4"]), 0.0), 0.0)
            .unwrap_err();
        assert!(matches!(err, ResoundError::InvalidTempo(_)));
        assert!(voice.is_idle());
        assert!(voice.tick(0.0).is_empty());
    }

    #[test]
    fn events_carry_voice_identity_and_position() {
        let (mut voice, _log) = voice();
        voice.set_position(Position::new(1.0, 0.0, 2.0));
        voice
            .play(PlaybackRequest::new(melody(&["C4"]), 120.0), 0.0)
            .unwrap();
        let event = voice.tick(0.0).remove(0);
        assert_eq!(event.source_id, "player");
        assert_eq!(event.source_position, Some(Position::new(1.0, 0.0, 2.0)));
    }

    #[test]
    fn empty_song_is_a_no_op() {
        let (mut voice, _log) = voice();
        voice
            .play(PlaybackRequest::new(Song::default(), 120.0), 0.0)
            .unwrap();
        assert!(voice.is_idle());
    }
}
