use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::{
    timeline::ms_per_beat, Chord, Note, NoteEvent, NoteListener, Position, RecordingConfig,
    Result, Song, SongElement, SourceId,
};

/// A captured event together with its grid position relative to the start
/// of the recording.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedNote {
    pub event: NoteEvent,
    pub beat: f64,
}

/// Finished, quantised recording handed to the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub song: Song,
    pub tempo: f64,
    pub recorded_at_ms: f64,
}

/// Snaps `timestamp_ms` to the nearest grid slot after `start_ms` and returns
/// the result in beats.
pub fn quantize_to_beat(
    timestamp_ms: f64,
    start_ms: f64,
    tempo: f64,
    config: &RecordingConfig,
) -> Result<f64> {
    let slots = config.slots_per_beat();
    Ok(grid_slot(timestamp_ms, start_ms, tempo, slots)? as f64 / slots)
}

fn grid_slot(timestamp_ms: f64, start_ms: f64, tempo: f64, slots_per_beat: f64) -> Result<i64> {
    let beat = (timestamp_ms - start_ms) / ms_per_beat(tempo)?;
    Ok((beat * slots_per_beat).round() as i64)
}

/// Quantises `events` against `start_ms` and folds notes that land on the
/// same slot into chords. The song is ordered by beat; notes within a chord
/// keep their arrival order.
pub fn quantize_performance(
    events: &[NoteEvent],
    start_ms: f64,
    tempo: f64,
    config: &RecordingConfig,
) -> Result<(Vec<CapturedNote>, Song)> {
    let slots_per_beat = config.slots_per_beat();
    let mut groups: BTreeMap<i64, Vec<Note>> = BTreeMap::new();
    let mut captured = Vec::with_capacity(events.len());

    for event in events {
        let slot = grid_slot(event.timestamp_ms, start_ms, tempo, slots_per_beat)?;
        groups.entry(slot).or_default().push(Note {
            pitch: Some(event.pitch.clone()),
            length: event.length,
            offset_ms: None,
        });
        captured.push(CapturedNote {
            event: event.clone(),
            beat: slot as f64 / slots_per_beat,
        });
    }

    let mut song = Song::default();
    for (_, mut notes) in groups {
        let element: SongElement = if notes.len() == 1 {
            notes.remove(0).into()
        } else {
            Chord::new(notes)?.into()
        };
        song.push(element);
    }

    Ok((captured, song))
}

/// Sources close enough to the listener to be recorded: within `fraction` of
/// the audible range.
pub fn sources_in_recording_range(
    listener: &Position,
    candidates: &[(SourceId, Position)],
    audible_range: f64,
    fraction: f64,
) -> Vec<SourceId> {
    let limit = audible_range * fraction;
    candidates
        .iter()
        .filter(|(_, position)| listener.distance(position) <= limit)
        .map(|(id, _)| id.clone())
        .collect()
}

/// Captures the notes of a chosen set of sources and turns them into a song.
#[derive(Debug, Default)]
pub struct PerformanceRecorder {
    settings: RecordingConfig,
    eligible: BTreeSet<SourceId>,
    captured: VecDeque<NoteEvent>,
    start_time_ms: Option<f64>,
}

impl PerformanceRecorder {
    pub fn new(settings: RecordingConfig) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn is_recording(&self) -> bool {
        self.start_time_ms.is_some()
    }

    pub fn start_time_ms(&self) -> Option<f64> {
        self.start_time_ms
    }

    pub fn captured(&self) -> impl Iterator<Item = &NoteEvent> {
        self.captured.iter()
    }

    pub fn captured_len(&self) -> usize {
        self.captured.len()
    }

    /// Arms the recorder for `sources`. Without any source in range nothing
    /// happens and `false` is returned.
    pub fn start(&mut self, sources: impl IntoIterator<Item = SourceId>, now_ms: f64) -> bool {
        let eligible: BTreeSet<SourceId> = sources.into_iter().collect();
        if eligible.is_empty() {
            tracing::warn!("no sources in recording range");
            return false;
        }

        tracing::debug!(sources = eligible.len(), start = now_ms, "recording started");
        self.eligible = eligible;
        self.captured.clear();
        self.start_time_ms = Some(now_ms);
        true
    }

    /// Appends `event` if recording and the source is eligible.
    pub fn capture(&mut self, event: &NoteEvent) {
        if self.start_time_ms.is_none() || !self.eligible.contains(&event.source_id) {
            return;
        }
        self.captured.push_back(event.clone());
        self.prune(event.timestamp_ms);
    }

    /// Drops captured notes older than the recording window.
    pub fn prune(&mut self, now_ms: f64) {
        let cutoff = now_ms - self.settings.window_ms;
        while self
            .captured
            .front()
            .is_some_and(|event| event.timestamp_ms < cutoff)
        {
            self.captured.pop_front();
        }
    }

    /// Disarms the recorder and returns the quantised song, or `None` if it
    /// was not recording. An invalid tempo leaves the recorder armed.
    pub fn stop(&mut self, tempo: f64, now_ms: f64) -> Result<Option<Recording>> {
        let Some(start_ms) = self.start_time_ms else {
            return Ok(None);
        };

        let events: Vec<NoteEvent> = self.captured.iter().cloned().collect();
        let (_, song) = quantize_performance(&events, start_ms, tempo, &self.settings)?;
        if song.is_empty() {
            tracing::warn!("recording finished without any captured notes");
        }

        self.start_time_ms = None;
        self.captured.clear();
        self.eligible.clear();

        tracing::debug!(elements = song.len(), "recording stopped");
        Ok(Some(Recording {
            id: format!("recording_{}", now_ms.round() as i64),
            song,
            tempo,
            recorded_at_ms: now_ms,
        }))
    }
}

impl NoteListener for PerformanceRecorder {
    fn on_note_captured(&mut self, event: &NoteEvent) -> Result<()> {
        self.capture(event);
        Ok(())
    }
}
