use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{
    matcher::songs_match, record::quantize_performance, NoteEvent, NoteListener, Position,
    RecordingConfig, Result, Song,
};

/// What a solved listener does in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    Gate,
    Fountain,
}

/// Signal queued when a listener hears its song.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateCompletion {
    pub id: String,
    pub kind: GateKind,
    pub solved_at_ms: f64,
}

/// A gate or fountain that opens once it hears its required song played
/// within range.
#[derive(Debug, Clone)]
pub struct SongGate {
    id: String,
    kind: GateKind,
    position: Position,
    audible_range: f64,
    required: Song,
    tempo: f64,
    settings: RecordingConfig,
    heard: VecDeque<NoteEvent>,
    solved: bool,
    completions: VecDeque<GateCompletion>,
}

impl SongGate {
    pub fn new(
        id: impl Into<String>,
        kind: GateKind,
        position: Position,
        audible_range: f64,
        required: Song,
        tempo: f64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            position,
            audible_range,
            required,
            tempo,
            settings: RecordingConfig::default(),
            heard: VecDeque::new(),
            solved: false,
            completions: VecDeque::new(),
        }
    }

    pub fn with_settings(mut self, settings: RecordingConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> GateKind {
        self.kind
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn required(&self) -> &Song {
        &self.required
    }

    pub fn is_solved(&self) -> bool {
        self.solved
    }

    pub fn heard_len(&self) -> usize {
        self.heard.len()
    }

    /// Tempo used to group heard notes into chords.
    pub fn set_tempo(&mut self, tempo: f64) {
        self.tempo = tempo;
    }

    /// Pops the oldest queued completion.
    pub fn take_completion(&mut self) -> Option<GateCompletion> {
        self.completions.pop_front()
    }

    /// Whether `event` was played close enough to be heard. Notes without a
    /// position cannot be located and are never heard.
    pub fn hears(&self, event: &NoteEvent) -> bool {
        event
            .source_position
            .is_some_and(|source| self.position.distance(&source) <= self.audible_range)
    }

    /// Buffers `event` if it is in range and checks whether the buffer now
    /// ends with the required song. Returns `true` on the capture that solves
    /// the gate.
    pub fn capture(&mut self, event: &NoteEvent) -> Result<bool> {
        if self.solved || !self.hears(event) {
            return Ok(false);
        }

        self.heard.push_back(event.clone());
        let cutoff = event.timestamp_ms - self.settings.window_ms;
        while self.heard.front().is_some_and(|e| e.timestamp_ms < cutoff) {
            self.heard.pop_front();
        }

        if !self.heard_required_song()? {
            return Ok(false);
        }

        self.solved = true;
        self.heard.clear();
        self.completions.push_back(GateCompletion {
            id: self.id.clone(),
            kind: self.kind,
            solved_at_ms: event.timestamp_ms,
        });
        tracing::info!(gate = %self.id, kind = ?self.kind, "required song heard");
        Ok(true)
    }

    /// Tries every buffered note as the first note of the performance.
    fn heard_required_song(&self) -> Result<bool> {
        if self.required.is_empty() {
            return Ok(false);
        }

        let heard: Vec<NoteEvent> = self.heard.iter().cloned().collect();
        for start in 0..heard.len() {
            let candidate = &heard[start..];
            let (_, song) =
                quantize_performance(candidate, candidate[0].timestamp_ms, self.tempo, &self.settings)?;
            if songs_match(&song, &self.required) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl NoteListener for SongGate {
    fn on_note_captured(&mut self, event: &NoteEvent) -> Result<()> {
        self.capture(event).map(|_| ())
    }

    fn on_tempo_changed(&mut self, tempo: f64) {
        self.set_tempo(tempo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NoteLength, Pitch};

    fn event(pitch: &str, at: f64, x: f64) -> NoteEvent {
        NoteEvent {
            pitch: Pitch::name(pitch),
            length: NoteLength::QUARTER,
            timestamp_ms: at,
            source_id: "player".to_string(),
            source_position: Some(Position::new(x, 0.0, 0.0)),
        }
    }

    fn gate(required: &[&str]) -> SongGate {
        SongGate::new(
            "gate-1",
            GateKind::Gate,
            Position::default(),
            10.0,
            Song::melody(required.iter().map(|pitch| (*pitch, "1/4"))).unwrap(),
            120.0,
        )
    }

    #[test]
    fn opens_on_the_required_melody() {
        let mut gate = gate(&["C4", "E4", "G4"]);
        assert!(!gate.capture(&event("C4", 1000.0, 2.0)).unwrap());
        assert!(!gate.capture(&event("E4", 1510.0, 2.0)).unwrap());
        assert!(gate.capture(&event("G4", 1995.0, 2.0)).unwrap());

        assert!(gate.is_solved());
        let completion = gate.take_completion().unwrap();
        assert_eq!(completion.id, "gate-1");
        assert_eq!(completion.solved_at_ms, 1995.0);
        assert!(gate.take_completion().is_none());
    }

    #[test]
    fn leading_noise_is_skipped() {
        let mut gate = gate(&["C4", "E4"]);
        gate.capture(&event("B3", 0.0, 1.0)).unwrap();
        gate.capture(&event("C4", 700.0, 1.0)).unwrap();
        assert!(gate.capture(&event("E4", 1200.0, 1.0)).unwrap());
    }

    #[test]
    fn ignores_distant_and_unplaced_notes() {
        let mut gate = gate(&["C4"]);
        assert!(!gate.capture(&event("C4", 0.0, 11.0)).unwrap());

        let mut unplaced = event("C4", 0.0, 0.0);
        unplaced.source_position = None;
        assert!(!gate.capture(&unplaced).unwrap());
        assert_eq!(gate.heard_len(), 0);
    }

    #[test]
    fn wrong_note_does_not_open() {
        let mut gate = gate(&["C4", "E4"]);
        gate.capture(&event("C4", 0.0, 1.0)).unwrap();
        assert!(!gate.capture(&event("D4", 500.0, 1.0)).unwrap());
        assert!(!gate.is_solved());
    }

    #[test]
    fn chords_match_regardless_of_arrival_order() {
        let mut required = Song::default();
        required.push(
            crate::Chord::new(vec![
                crate::Note::new("C4", "1/4").unwrap(),
                crate::Note::new("E4", "1/4").unwrap(),
            ])
            .unwrap(),
        );
        let mut fountain = SongGate::new(
            "fountain-1",
            GateKind::Fountain,
            Position::default(),
            10.0,
            required,
            120.0,
        );

        fountain.capture(&event("E4", 100.0, 1.0)).unwrap();
        assert!(fountain.capture(&event("C4", 110.0, 1.0)).unwrap());
        assert_eq!(fountain.take_completion().unwrap().kind, GateKind::Fountain);
    }

    #[test]
    fn follows_tempo_changes_when_grouping_chords() {
        let mut required = Song::default();
        required.push(
            crate::Chord::new(vec![
                crate::Note::new("C4", "1/4").unwrap(),
                crate::Note::new("E4", "1/4").unwrap(),
            ])
            .unwrap(),
        );
        let make = || {
            SongGate::new("gate-1", GateKind::Gate, Position::default(), 10.0, required.clone(), 120.0)
        };

        // 200 ms apart is two sixteenths at 120 bpm but the same slot at 30.
        let mut fixed = make();
        fixed.capture(&event("C4", 0.0, 1.0)).unwrap();
        assert!(!fixed.capture(&event("E4", 200.0, 1.0)).unwrap());

        let mut slowed = make();
        slowed.on_tempo_changed(30.0);
        slowed.capture(&event("C4", 0.0, 1.0)).unwrap();
        assert!(slowed.capture(&event("E4", 200.0, 1.0)).unwrap());
    }

    #[test]
    fn solves_only_once() {
        let mut gate = gate(&["C4"]);
        assert!(gate.capture(&event("C4", 0.0, 1.0)).unwrap());
        assert!(!gate.capture(&event("C4", 500.0, 1.0)).unwrap());
        assert!(gate.take_completion().is_some());
        assert!(gate.take_completion().is_none());
    }

    #[test]
    fn old_notes_fall_out_of_the_window() {
        let mut gate = gate(&["C4", "E4", "G4"]);
        gate.capture(&event("A4", 0.0, 1.0)).unwrap();
        gate.capture(&event("B4", 9_000.0, 1.0)).unwrap();
        gate.capture(&event("A4", 12_000.0, 1.0)).unwrap();
        assert_eq!(gate.heard_len(), 2);
    }
}
