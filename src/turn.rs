//! Turn controller
//!
//! Drives a single voice interaction turn through its phases: capture the
//! utterance, transcribe it, generate a reply, synthesize it, play it back.
//! Every mode transition happens here; the capture device, the remote
//! services, and the speech sink are trait objects supplied at construction.
//!
//! When something downstream fails mid-turn the controller speaks a canned
//! fallback message rather than going silent. Only when the fallback itself
//! cannot be played does the turn end with [`TurnOutcome::Failed`].

use std::time::{Duration, Instant};

use crate::session::{Mode, SessionState};
use crate::store::PreferenceStore;
use crate::voice::{
    CaptureDevice, Generator, PlaybackEnd, SpeechSink, Synthesizer, Transcriber, resolve_voice,
};
use crate::{Error, Result};

/// Spoken when transcription, generation, or synthesis fails
pub const FALLBACK_GENERIC: &str =
    "Sorry, something went wrong on my end. Let's try that again.";

/// Spoken when the language model rejects the topic
pub const FALLBACK_TOPIC: &str =
    "I can't help with that one. Pick another topic and I'm all ears.";

/// Short lines spoken in the new voice after a voice change, rotated so
/// repeated switching doesn't sound canned
const VOICE_CHANGE_GREETINGS: &[&str] = &[
    "Here I am. How do I sound?",
    "New voice, same me.",
    "Hello again, this is how I'll sound from now on.",
    "Fresh voice activated.",
    "Testing, testing. I like this one.",
];

/// Tunable thresholds and timings for the turn loop
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Minimum encoded utterance size worth sending to transcription
    pub min_utterance_bytes: usize,

    /// Minimum trimmed transcript length worth sending to generation
    pub min_transcript_chars: usize,

    /// How long a capture window stays open before the daemon closes it
    pub capture_timeout: Duration,

    /// Whether the daemon starts a new capture after each completed turn
    pub continuous: bool,

    /// Pause between a finished turn and the next capture in continuous mode
    pub restart_delay: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            min_utterance_bytes: 4000,
            min_transcript_chars: 2,
            capture_timeout: Duration::from_secs(6),
            continuous: false,
            restart_delay: Duration::from_millis(1000),
        }
    }
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Reply generated and played to completion
    Completed,

    /// Utterance too short or transcript empty; no services were called
    /// beyond the point of abandonment
    Abandoned,

    /// A service failed and the fallback message was spoken instead
    SpokeFallback,

    /// Playback was cut off by the user
    Interrupted,

    /// Even the fallback message could not be played
    Failed,
}

impl TurnOutcome {
    /// Whether the daemon should open a new capture window after this turn
    /// (continuous mode only)
    #[must_use]
    pub const fn should_restart(&self) -> bool {
        match self {
            Self::Completed | Self::Abandoned | Self::SpokeFallback => true,
            Self::Interrupted | Self::Failed => false,
        }
    }
}

/// Owns the session state and sequences each voice turn
pub struct TurnController<C, T, G, S, P>
where
    C: CaptureDevice,
    T: Transcriber,
    G: Generator,
    S: Synthesizer,
    P: SpeechSink,
{
    state: SessionState,
    config: TurnConfig,
    capture: C,
    transcriber: T,
    generator: G,
    synthesizer: S,
    sink: P,
    store: PreferenceStore,
    listening_since: Option<Instant>,
    greeting_cursor: usize,
}

impl<C, T, G, S, P> TurnController<C, T, G, S, P>
where
    C: CaptureDevice,
    T: Transcriber,
    G: Generator,
    S: Synthesizer,
    P: SpeechSink,
{
    /// Create a controller with the given collaborators and initial voice
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: TurnConfig,
        capture: C,
        transcriber: T,
        generator: G,
        synthesizer: S,
        sink: P,
        store: PreferenceStore,
        initial_voice: String,
    ) -> Self {
        Self {
            state: SessionState::new(initial_voice),
            config,
            capture,
            transcriber,
            generator,
            synthesizer,
            sink,
            store,
            listening_since: None,
            greeting_cursor: 0,
        }
    }

    /// Current session state
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Open the capture window
    ///
    /// No-op when a turn is already in progress.
    ///
    /// # Errors
    ///
    /// Returns error if the capture device cannot be opened; the session
    /// stays idle and the failure is recorded in `device_notice`
    pub fn start_capture(&mut self) -> Result<()> {
        if self.state.mode != Mode::Idle {
            tracing::debug!(mode = %self.state.mode, "capture request ignored");
            return Ok(());
        }

        match self.capture.start() {
            Ok(()) => {
                self.state.mode = Mode::Listening;
                self.state.device_notice = None;
                self.listening_since = Some(Instant::now());
                // Any interrupt left over from the previous turn is stale
                self.sink.reset();
                tracing::info!("listening");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to open capture device");
                self.state.device_notice = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Whether the open capture window has outlived its timeout
    #[must_use]
    pub fn capture_expired(&self) -> bool {
        self.listening_since
            .is_some_and(|since| since.elapsed() >= self.config.capture_timeout)
    }

    /// Pull the current input level into the session state
    pub fn refresh_audio_level(&mut self) {
        if self.state.mode == Mode::Listening {
            self.state.audio_level = self.capture.level();
        }
    }

    /// Close the capture window and run the rest of the turn
    ///
    /// Short or empty utterances abandon the turn without calling any remote
    /// service. Service failures speak a fallback message instead of the
    /// reply. The session always returns to idle.
    pub async fn finish_capture(&mut self) -> TurnOutcome {
        if self.state.mode != Mode::Listening {
            tracing::debug!(mode = %self.state.mode, "finish request ignored");
            return TurnOutcome::Abandoned;
        }
        self.listening_since = None;

        let audio = match self.capture.finish() {
            Ok(audio) => audio,
            Err(e) => {
                tracing::error!(error = %e, "failed to close capture device");
                self.state.device_notice = Some(e.to_string());
                self.end_turn();
                return TurnOutcome::Failed;
            }
        };

        if audio.len() < self.config.min_utterance_bytes {
            tracing::debug!(bytes = audio.len(), "utterance too short, abandoning turn");
            self.end_turn();
            return TurnOutcome::Abandoned;
        }

        self.state.mode = Mode::Processing;
        tracing::debug!(bytes = audio.len(), "processing utterance");

        let transcript = match self.transcriber.transcribe(&audio).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                return self.speak_fallback(FALLBACK_GENERIC).await;
            }
        };

        let trimmed = transcript.trim();
        if trimmed.chars().count() < self.config.min_transcript_chars {
            tracing::debug!("empty transcript, abandoning turn");
            self.end_turn();
            return TurnOutcome::Abandoned;
        }
        self.state.transcript = trimmed.to_string();

        let reply = match self.generator.generate(trimmed).await {
            Ok(reply) => reply,
            Err(e) if e.is_content_policy() => {
                tracing::warn!(error = %e, "topic rejected");
                return self.speak_fallback(FALLBACK_TOPIC).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "generation failed");
                return self.speak_fallback(FALLBACK_GENERIC).await;
            }
        };

        self.speak_reply(reply).await
    }

    /// Interrupt the reply currently playing back
    ///
    /// No-op outside the speaking phase. The pending `finish_capture` call
    /// observes the interruption and ends the turn.
    pub fn cancel_speaking(&mut self) {
        if self.state.mode == Mode::Speaking {
            tracing::info!("playback interrupted");
            self.sink.stop();
        }
    }

    /// Switch the synthesis voice, persist it, and confirm audibly
    ///
    /// # Errors
    ///
    /// Returns [`Error::Voice`] when a turn is in progress or the voice is
    /// not in the catalog, [`Error::Store`] when persistence fails
    pub async fn change_voice(&mut self, id_or_name: &str) -> Result<TurnOutcome> {
        if self.state.mode != Mode::Idle {
            return Err(Error::Voice(format!(
                "cannot change voice while {}",
                self.state.mode
            )));
        }

        let voice = resolve_voice(id_or_name)
            .ok_or_else(|| Error::Voice(format!("unknown voice: {id_or_name}")))?;

        self.store.set_voice(voice.id)?;
        self.state.selected_voice = voice.id.to_string();
        self.sink.reset();
        tracing::info!(voice = voice.name, "voice changed");

        let greeting = VOICE_CHANGE_GREETINGS[self.greeting_cursor % VOICE_CHANGE_GREETINGS.len()];
        self.greeting_cursor += 1;

        Ok(self.speak_reply(greeting.to_string()).await)
    }

    /// Speak an announcement outside a capture turn (e.g. the startup
    /// greeting)
    pub async fn announce(&mut self, text: &str) -> TurnOutcome {
        if self.state.mode != Mode::Idle {
            tracing::debug!(mode = %self.state.mode, "announcement skipped");
            return TurnOutcome::Abandoned;
        }
        self.sink.reset();
        self.speak_reply(text.to_string()).await
    }

    /// Synthesize and play a reply, falling back to the canned message on
    /// failure
    async fn speak_reply(&mut self, text: String) -> TurnOutcome {
        self.state.mode = Mode::Speaking;
        self.state.last_response.clone_from(&text);

        let voice = self.state.selected_voice.clone();
        let audio = match self.synthesizer.synthesize(&text, &voice).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(error = %e, "synthesis failed");
                return self.speak_fallback(FALLBACK_GENERIC).await;
            }
        };

        match self.sink.play(&audio).await {
            Ok(PlaybackEnd::Finished) => {
                self.end_turn();
                TurnOutcome::Completed
            }
            Ok(PlaybackEnd::Interrupted) => {
                self.end_turn();
                TurnOutcome::Interrupted
            }
            Err(e) => {
                tracing::warn!(error = %e, "playback failed");
                self.speak_fallback(FALLBACK_GENERIC).await
            }
        }
    }

    /// Speak a canned fallback message; there is no further fallback, so any
    /// failure here ends the turn as [`TurnOutcome::Failed`]
    async fn speak_fallback(&mut self, text: &str) -> TurnOutcome {
        self.state.mode = Mode::Speaking;
        self.state.last_response = text.to_string();

        let voice = self.state.selected_voice.clone();
        let audio = match self.synthesizer.synthesize(text, &voice).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::error!(error = %e, "fallback synthesis failed");
                self.state.device_notice = Some(e.to_string());
                self.end_turn();
                return TurnOutcome::Failed;
            }
        };

        match self.sink.play(&audio).await {
            Ok(PlaybackEnd::Finished) => {
                self.end_turn();
                TurnOutcome::SpokeFallback
            }
            Ok(PlaybackEnd::Interrupted) => {
                self.end_turn();
                TurnOutcome::Interrupted
            }
            Err(e) => {
                tracing::error!(error = %e, "fallback playback failed");
                self.state.device_notice = Some(e.to_string());
                self.end_turn();
                TurnOutcome::Failed
            }
        }
    }

    /// Return the session to idle; the last response survives for observers,
    /// the transcript does not
    fn end_turn(&mut self) {
        self.state.transcript.clear();
        self.state.audio_level = 0.0;
        self.state.mode = Mode::Idle;
        self.listening_since = None;
    }
}

/// Speak a one-line confirmation in the given voice, outside a session
///
/// Used by the CLI voice switcher; inside a session the same behavior goes
/// through [`TurnController::change_voice`].
///
/// # Errors
///
/// Returns error if synthesis or playback fails
pub async fn speak_voice_confirmation<S, P>(
    synthesizer: &S,
    sink: &P,
    voice: &str,
) -> Result<PlaybackEnd>
where
    S: Synthesizer,
    P: SpeechSink,
{
    sink.reset();
    let audio = synthesizer
        .synthesize(VOICE_CHANGE_GREETINGS[0], voice)
        .await?;
    sink.play(&audio).await
}
