//! Session state for the voice interaction loop
//!
//! One `SessionState` exists per daemon session. It is owned and mutated
//! exclusively by the turn controller; observers read it between turns.

/// Phase of the voice interaction turn
///
/// At most one of Listening/Processing/Speaking holds at any time; the turn
/// controller centralizes every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Waiting for a turn to start
    Idle,
    /// Microphone open, buffering audio
    Listening,
    /// Transcription or generation request in flight
    Processing,
    /// Synthesized reply playing back
    Speaking,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
        };
        write!(f, "{s}")
    }
}

/// Mutable per-session record driven by the turn controller
///
/// Created at session start and discarded at session end; only the selected
/// voice identifier outlives the session (via the preference store).
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Current phase of the turn
    pub mode: Mode,

    /// Last recognized utterance text (cleared when a turn ends)
    pub transcript: String,

    /// Last generated reply text
    pub last_response: String,

    /// Identifier of the synthesis voice
    pub selected_voice: String,

    /// Normalized 0..1 level of the capture window, for visualization only
    pub audio_level: f32,

    /// Passive notice set when audio output fails after a fallback message
    pub device_notice: Option<String>,
}

impl SessionState {
    /// Create a fresh session with the given synthesis voice
    #[must_use]
    pub const fn new(selected_voice: String) -> Self {
        Self {
            mode: Mode::Idle,
            transcript: String::new(),
            last_response: String::new(),
            selected_voice,
            audio_level: 0.0,
            device_notice: None,
        }
    }
}
