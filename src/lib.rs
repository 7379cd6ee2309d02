//! Aura - hands-free voice assistant
//!
//! This library provides the core functionality for the Aura daemon:
//! - Audio capture and playback (cpal)
//! - Remote speech services (Whisper/Deepgram STT, `OpenAI`/ElevenLabs TTS)
//! - Reply generation via any OpenAI-compatible chat endpoint
//! - The turn controller sequencing each voice interaction
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Daemon                           │
//! │   capture loop  │  shutdown  │  service wiring      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Turn Controller                      │
//! │   listen → transcribe → generate → speak            │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │          Devices and Remote Services                 │
//! │   cpal  │  STT  │  chat completions  │  TTS         │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod llm;
pub mod session;
pub mod store;
pub mod turn;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use llm::ChatClient;
pub use session::{Mode, SessionState};
pub use store::PreferenceStore;
pub use turn::{FALLBACK_GENERIC, FALLBACK_TOPIC, TurnConfig, TurnController, TurnOutcome};
