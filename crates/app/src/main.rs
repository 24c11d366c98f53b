use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use clap::{Parser, Subcommand};
use resound_core::{
    calculate_song_duration, distance_volume,
    harmony::{classify, interval},
    record::sources_in_recording_range,
    songs_match, CommandLog, EngineConfig, GateKind, HarmonicForceField, HarmonyAnalyzer,
    MotionState, OpenField, PerformanceRecorder, Pitch, PlaybackRequest, Position, PuzzleSession,
    ResoundError, Result, Song, SongGate, Timbre, VoiceId,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Fixed simulation step, in seconds.
const STEP_SECONDS: f64 = 1.0 / 60.0;
const MAX_STEPS: usize = 60 * 60;

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match cli.config.as_ref() {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Demo { tempo } => run_demo(config, tempo),
        Commands::Classify { first, second } => run_classify(&first, &second),
        Commands::Duration { song, tempo, basis } => {
            let tempo = tempo.unwrap_or(config.clock.tempo);
            let basis = basis.unwrap_or(config.clock.basis);
            run_duration(&song, tempo, basis)
        }
    }
}

/// Headless puzzle: a creature plays a phrase, the player records it and
/// plays it back to open a gate.
fn run_demo(config: EngineConfig, tempo: Option<f64>) -> Result<()> {
    let config = match tempo {
        Some(tempo) => config.with_tempo(tempo),
        None => config,
    };
    let tempo = config.clock.tempo;
    tracing::info!(tempo, "starting demo session");

    let mut session = PuzzleSession::new(config.clone())?;
    if config.clock.metronome {
        session.attach_metronome(Box::new(|beat| tracing::debug!(beat, "metronome")));
    }

    let player_at = Position::new(0.0, 0.0, 0.0);
    let fountain_at = Position::new(3.0, 0.0, 3.0);
    let gate_at = Position::new(-10.0, 0.0, 0.0);
    let mut creature_at = Position::new(8.0, 0.0, 0.0);

    let player_log = CommandLog::new(Timbre::Piano);
    let player = session.add_voice("player", Box::new(player_log.clone()));
    let creature_log = CommandLog::new(Timbre::Random(7));
    let creature = session.add_voice("creature-1", Box::new(creature_log));
    let fountain = session.add_voice("fountain-1", Box::new(CommandLog::new(Timbre::Fountain)));
    session.set_player_voice(player);
    place(&mut session, player, player_at);
    place(&mut session, creature, creature_at);
    place(&mut session, fountain, fountain_at);

    let phrase = Song::melody([("C4", "1/4"), ("E4", "1/4"), ("G4", "1/4"), ("C5", "1/4")])?;
    let drone = Song::melody([("E3", "1/1")])?;

    let recorder = Arc::new(Mutex::new(PerformanceRecorder::new(config.recording.clone())));
    let gate = Arc::new(Mutex::new(
        SongGate::new("gate-1", GateKind::Gate, gate_at, 12.0, phrase.clone(), tempo)
            .with_settings(config.recording.clone()),
    ));
    session.register_listener(recorder.clone());
    session.register_listener(gate.clone());

    let eligible = sources_in_recording_range(
        &player_at,
        &[("creature-1".to_string(), creature_at)],
        config.motion.audible_range,
        config.recording.range_fraction,
    );
    lock(&recorder, "recorder")?.start(eligible, session.now_ms());

    let now = session.now_ms();
    for (voice, song) in [(creature, phrase.clone()), (fountain, drone)] {
        if let Some(voice) = session.voice_mut(voice) {
            voice.play(PlaybackRequest::new(song, tempo), now)?;
        }
    }

    let field = HarmonicForceField::new(HarmonyAnalyzer::new(&config.harmony), config.motion.clone());
    let mut motion = MotionState::default();
    for _ in 0..MAX_STEPS {
        session.step(STEP_SECONDS)?;
        creature_at = drift(&mut session, &field, &mut motion, creature, creature_at);

        let volume = distance_volume(player_at.distance(&creature_at), config.motion.audible_range);
        if let Some(voice) = session.voice_mut(creature) {
            voice.update_volume(volume);
        }
        if session.voice(creature).map_or(true, |voice| voice.is_idle()) {
            break;
        }
    }

    let recording = lock(&recorder, "recorder")?
        .stop(session.clock().tempo(), session.now_ms())?
        .ok_or_else(|| ResoundError::msg("recorder was not armed"))?;
    tracing::info!(id = %recording.id, elements = recording.song.len(), "performance recorded");

    session.play_recording(&recording)?;
    for _ in 0..MAX_STEPS {
        session.step(STEP_SECONDS)?;
        if !session.is_playing_recording() {
            break;
        }
    }

    let completion = lock(&gate, "gate")?.take_completion();
    if completion.is_none() {
        tracing::warn!("gate stayed closed");
    }

    let summary = json!({
        "recording": recording,
        "matchesPhrase": songs_match(&recording.song, &phrase),
        "gate": completion,
        "creature": {
            "position": creature_at,
            "volume": session.voice(creature).map(|voice| voice.volume()),
        },
        "playerNotes": player_log.started_frequencies().len(),
        "sessionMs": session.now_ms(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_classify(first: &str, second: &str) -> Result<()> {
    let semitones = interval(&parse_pitch(first), &parse_pitch(second));
    let summary = json!({
        "first": first,
        "second": second,
        "interval": semitones,
        "harmony": classify(semitones),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_duration(song: &str, tempo: f64, basis: u32) -> Result<()> {
    let song = Song::from_json_str(song)?;
    let duration_ms = calculate_song_duration(&song, tempo, basis)?;
    tracing::info!(elements = song.len(), tempo, basis, "computed song duration");
    println!("{}", json!({ "durationMs": duration_ms }));
    Ok(())
}

/// Accepts either a note name or a raw frequency in hertz.
fn parse_pitch(text: &str) -> Pitch {
    text.parse::<f64>()
        .map(Pitch::hz)
        .unwrap_or_else(|_| Pitch::name(text))
}

/// Moves the creature one step under the pull of whatever it harmonises with.
fn drift(
    session: &mut PuzzleSession,
    field: &HarmonicForceField,
    motion: &mut MotionState,
    voice: VoiceId,
    position: Position,
) -> Position {
    let Some(id) = session.voice(voice).map(|voice| voice.id().to_string()) else {
        return position;
    };
    let sources = session.sound_sources();
    let force = sources
        .iter()
        .find(|source| source.id == id)
        .map(|me| field.force_on(me, &sources, session.clock()))
        .unwrap_or_default();

    motion.apply_force(force, field.config());
    let moved = motion.integrate(&id, position, STEP_SECONDS, &OpenField, field.config());
    place(session, voice, moved);
    moved
}

fn place(session: &mut PuzzleSession, voice: VoiceId, position: Position) {
    if let Some(voice) = session.voice_mut(voice) {
        voice.set_position(position);
    }
}

fn lock<'a, T>(shared: &'a Arc<Mutex<T>>, name: &str) -> Result<MutexGuard<'a, T>> {
    shared
        .lock()
        .map_err(|_| ResoundError::ListenerPoisoned(name.to_string()))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless driver for Resound puzzle sessions", long_about = None)]
struct Cli {
    /// Optional JSON engine configuration.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a simulated record-and-replay puzzle and print the outcome.
    Demo {
        /// Overrides the configured tempo.
        #[arg(short, long)]
        tempo: Option<f64>,
    },
    /// Classify the interval between two pitches.
    Classify {
        /// First pitch, e.g. C4 or 261.63.
        first: String,
        /// Second pitch.
        second: String,
    },
    /// Print the natural length of a song in milliseconds.
    Duration {
        /// Song as JSON, e.g. '[{"pitch":"C4","length":"1/4"}]'.
        song: String,
        #[arg(short, long)]
        tempo: Option<f64>,
        #[arg(short, long)]
        basis: Option<u32>,
    },
}
