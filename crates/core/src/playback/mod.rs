//! Beat-aligned playback of stored recordings.
//!
//! A request that arrives just after a beat starts at once and pulls every
//! later element back by the time already elapsed since that beat. A request
//! that arrives later waits for the next beat instead. Either way the notes
//! after the first land on the session grid.

use crate::{BeatClock, PlaybackConfig, PlaybackRequest, Recording, Result, Song, VoicePlayer};

/// Total natural length of `song` in milliseconds.
pub fn calculate_song_duration(song: &Song, tempo: f64, basis: u32) -> Result<f64> {
    song.duration_ms(tempo, basis)
}

/// How and when a recording should start.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackPlan {
    pub start_delay_ms: f64,
    /// Offset applied to every element after the first.
    pub offset_ms: f64,
    /// The recording with offsets written into each element.
    pub song: Song,
}

pub fn plan_start(song: &Song, clock: &BeatClock, tolerance_ms: f64) -> PlaybackPlan {
    let since_beat = clock.time_since_last_beat_ms();
    let (start_delay_ms, offset_ms) = if since_beat <= tolerance_ms {
        (0.0, -since_beat)
    } else {
        (clock.time_until_next_beat_ms(), 0.0)
    };

    let mut song = song.clone();
    for (index, element) in song.elements_mut().iter_mut().enumerate() {
        element.set_offset_ms(Some(if index == 0 { 0.0 } else { offset_ms }));
    }

    PlaybackPlan {
        start_delay_ms,
        offset_ms,
        song,
    }
}

#[derive(Debug, Clone)]
struct PendingStart {
    at_ms: f64,
    request: PlaybackRequest,
}

/// Starts recordings on a voice at beat-aligned times and keeps track of
/// when they end.
#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    tolerance_ms: f64,
    basis: u32,
    pending: Option<PendingStart>,
    finish_at_ms: Option<f64>,
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new(&PlaybackConfig::default())
    }
}

impl PlaybackScheduler {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            tolerance_ms: config.beat_tolerance_ms,
            basis: 4,
            pending: None,
            finish_at_ms: None,
        }
    }

    /// Note value that gets the beat when computing durations.
    pub fn with_basis(mut self, basis: u32) -> Self {
        self.basis = basis;
        self
    }

    /// True from the request until the recording's last element has ended.
    pub fn is_playing(&self, now_ms: f64) -> bool {
        self.finish_at_ms.is_some_and(|finish| now_ms < finish)
    }

    pub fn finish_at_ms(&self) -> Option<f64> {
        self.finish_at_ms
    }

    /// Plans playback of `recording`. Returns `None`, with a warning, when the
    /// recording is empty or another recording is still playing.
    pub fn request(
        &mut self,
        recording: &Recording,
        clock: &BeatClock,
        now_ms: f64,
    ) -> Result<Option<PlaybackPlan>> {
        if recording.song.is_empty() {
            tracing::warn!(recording = %recording.id, "empty song data");
            return Ok(None);
        }
        if self.is_playing(now_ms) {
            tracing::warn!(recording = %recording.id, "already playing a recording");
            return Ok(None);
        }

        let duration_ms = calculate_song_duration(&recording.song, recording.tempo, self.basis)?;
        let plan = plan_start(&recording.song, clock, self.tolerance_ms);
        let at_ms = now_ms + plan.start_delay_ms;

        tracing::debug!(
            recording = %recording.id,
            delay_ms = plan.start_delay_ms,
            offset_ms = plan.offset_ms,
            "playback scheduled"
        );
        self.pending = Some(PendingStart {
            at_ms,
            request: PlaybackRequest {
                data: plan.song.clone(),
                tempo: recording.tempo,
                basis: self.basis,
            },
        });
        self.finish_at_ms = Some(at_ms + duration_ms + plan.offset_ms);
        Ok(Some(plan))
    }

    /// Hands a due recording to `voice`, anchored at its planned start time.
    ///
    /// A voice that is still playing something else keeps playing; the
    /// recording is dropped with a warning and no longer counts as playing.
    /// A paused voice is stopped so the recording starts from its first
    /// element.
    pub fn tick(&mut self, now_ms: f64, voice: &mut VoicePlayer) -> Result<()> {
        if !self.pending.as_ref().is_some_and(|p| p.at_ms <= now_ms) {
            return Ok(());
        }
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };

        if voice.is_playing() {
            tracing::warn!(voice = %voice.id(), "player voice busy, dropping recording");
            self.finish_at_ms = None;
            return Ok(());
        }
        if voice.is_paused() {
            voice.stop();
        }
        if let Err(err) = voice.play(pending.request, pending.at_ms) {
            self.finish_at_ms = None;
            return Err(err);
        }
        Ok(())
    }

    /// Drops any pending start and stops the voice.
    pub fn cancel(&mut self, voice: &mut VoicePlayer) {
        self.pending = None;
        self.finish_at_ms = None;
        voice.stop();
    }
}
