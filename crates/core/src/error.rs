/// Result alias that carries the custom [`ResoundError`] type.
pub type Result<T> = std::result::Result<T, ResoundError>;

/// Common error type for the core crate.
///
/// Only failures that abort a call are represented here. Unknown pitches,
/// empty songs, missing recording sources and failing listeners are
/// recovered where they happen and reported through `tracing` instead.
#[derive(Debug, thiserror::Error)]
pub enum ResoundError {
    /// A rhythm fraction that is not of the form `numerator/denominator`
    /// with two positive integers.
    #[error("invalid fraction format: `{fraction}`")]
    Format { fraction: String },
    /// Tempo must be a finite number of beats per minute above zero.
    #[error("invalid tempo: {0} bpm")]
    InvalidTempo(f64),
    /// A chord must contain at least one note.
    #[error("a chord must contain at least one note")]
    EmptyChord,
    /// A shared listener could not be locked because a previous holder
    /// panicked.
    #[error("note listener `{0}` has been poisoned")]
    ListenerPoisoned(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl ResoundError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn format<T: Into<String>>(fraction: T) -> Self {
        Self::Format {
            fraction: fraction.into(),
        }
    }
}

impl From<&str> for ResoundError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for ResoundError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
