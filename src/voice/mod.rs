//! Voice processing module
//!
//! Audio capture and playback plus the remote speech services, behind the
//! trait seams the turn controller consumes. The reqwest-backed clients live
//! in `stt.rs` / `tts.rs`; the language model client is in `crate::llm`.

mod capture;
mod playback;
mod stt;
mod tts;

use async_trait::async_trait;

pub use capture::{AudioCapture, SAMPLE_RATE, calculate_rms, samples_to_wav};
pub use playback::{AudioPlayback, PlaybackEnd, PlaybackHandle};
pub use stt::SpeechToText;
pub use tts::{TextToSpeech, VOICE_CATALOG, VoiceOption, resolve_voice};

use crate::Result;

/// Audio recording primitive held for the whole session
///
/// `start` opens the device; `finish` stops it and yields the buffered audio
/// as an encoded blob ready for the transcription service.
pub trait CaptureDevice {
    /// Begin buffering audio
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn start(&mut self) -> Result<()>;

    /// Stop buffering and return the captured audio as encoded bytes
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails
    fn finish(&mut self) -> Result<Vec<u8>>;

    /// Normalized 0..1 level of the recent capture window
    fn level(&self) -> f32 {
        0.0
    }
}

/// Remote transcription service
#[async_trait]
pub trait Transcriber {
    /// Transcribe encoded audio to text
    ///
    /// # Errors
    ///
    /// Returns error if the request fails; the caller never retries
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;
}

/// Remote language-model service
#[async_trait]
pub trait Generator {
    /// Generate a reply to the user's utterance text
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ContentPolicy`] for content-policy rejections,
    /// [`crate::Error::Llm`] for anything else
    async fn generate(&self, text: &str) -> Result<String>;
}

/// Remote speech-synthesis service
#[async_trait]
pub trait Synthesizer {
    /// Synthesize text with the given voice, returning MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>>;
}

/// Audio output that can be interrupted mid-playback
///
/// Not `Send`: cpal streams are bound to the thread that created them, so
/// playback futures stay on the daemon's main task.
#[async_trait(?Send)]
pub trait SpeechSink {
    /// Play MP3 audio to completion or interruption
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    async fn play(&self, audio: &[u8]) -> Result<PlaybackEnd>;

    /// Interrupt the in-flight playback, if any
    ///
    /// The interrupt sticks until [`SpeechSink::reset`], so a stop issued
    /// while the reply is still being synthesized cuts the playback that
    /// follows.
    fn stop(&self);

    /// Clear any pending interrupt; called when a new turn begins
    fn reset(&self) {}
}
