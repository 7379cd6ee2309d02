//! Error types for the Aura voice assistant

use thiserror::Error;

/// Result type alias for Aura operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Aura voice assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Turn sequencing error (operation called in the wrong mode)
    #[error("voice error: {0}")]
    Voice(String),

    /// Audio device error (capture or playback hardware)
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Language model error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Content-policy rejection from the language model
    ///
    /// Kept distinct from [`Error::Llm`] so the turn controller can speak the
    /// topic-redirect fallback instead of the generic one.
    #[error("content policy rejection: {0}")]
    ContentPolicy(String),

    /// Preference store error
    #[error("store error: {0}")]
    Store(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether this error is a content-policy rejection
    #[must_use]
    pub const fn is_content_policy(&self) -> bool {
        matches!(self, Self::ContentPolicy(_))
    }
}
