//! Daemon - the main assistant service
//!
//! Wires the capture device, remote services, and playback sink into a turn
//! controller and drives the capture/reply loop until interrupted.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::llm::ChatClient;
use crate::store::PreferenceStore;
use crate::turn::{TurnController, TurnOutcome};
use crate::voice::{AudioCapture, AudioPlayback, SpeechToText, TextToSpeech, VOICE_CATALOG};
use crate::{Config, Error, Result};

/// How often the capture window is polled for level and timeout
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Spoken once when the daemon comes up
const STARTUP_GREETING: &str = "System online. Hello!";

/// The Aura daemon
pub struct Daemon {
    config: Config,
    store: PreferenceStore,
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// # Errors
    ///
    /// Returns error if the preference store cannot be opened
    pub fn new(config: Config) -> Result<Self> {
        let store_path = config.store_path();
        let store = PreferenceStore::open(&store_path)?;

        tracing::info!(path = %store_path.display(), "preference store initialized");

        Ok(Self { config, store })
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if a required API key is missing
    #[allow(clippy::future_not_send)]
    pub async fn run(self) -> Result<()> {
        let transcriber = self.build_stt()?;
        let generator = self.build_llm()?;
        let synthesizer = self.build_tts()?;
        let voice = self.resolve_startup_voice()?;

        // Ctrl+C triggers shutdown
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                let _ = shutdown_tx.send(()).await;
            }
        });

        // cpal streams are bound to this thread, so the whole voice loop
        // stays on the main task
        let playback = match AudioPlayback::new() {
            Ok(playback) => playback,
            Err(e) => {
                tracing::error!(error = %e, "audio output unavailable");
                shutdown_rx.recv().await;
                return Ok(());
            }
        };
        let capture = match AudioCapture::new() {
            Ok(capture) => capture,
            Err(e) => {
                tracing::error!(error = %e, "audio input unavailable");
                shutdown_rx.recv().await;
                return Ok(());
            }
        };

        // Keeps a shutdown mid-turn from waiting out the full reply
        let interrupt = playback.interrupt_handle();

        let mut controller = TurnController::new(
            self.config.turn.clone(),
            capture,
            transcriber,
            generator,
            synthesizer,
            playback,
            self.store.clone(),
            voice,
        );

        controller.announce(STARTUP_GREETING).await;
        tracing::info!(continuous = self.config.turn.continuous, "aura ready");

        'session: loop {
            if let Err(e) = controller.start_capture() {
                tracing::error!(error = %e, "capture device failed, waiting for shutdown");
                shutdown_rx.recv().await;
                break;
            }

            // Poll the open window for level updates, timeout, or shutdown
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break 'session,
                    () = tokio::time::sleep(POLL_INTERVAL) => {
                        controller.refresh_audio_level();
                        if controller.capture_expired() {
                            break;
                        }
                    }
                }
            }

            // Shutdown during the turn interrupts playback and lets the
            // turn wind down to idle before exiting
            let mut shutting_down = false;
            let outcome = {
                let turn = controller.finish_capture();
                tokio::pin!(turn);
                tokio::select! {
                    outcome = &mut turn => outcome,
                    _ = shutdown_rx.recv() => {
                        interrupt.stop();
                        shutting_down = true;
                        turn.await
                    }
                }
            };
            tracing::info!(?outcome, "turn ended");
            if shutting_down {
                break;
            }

            if !(self.config.turn.continuous && outcome.should_restart()) {
                if outcome == TurnOutcome::Failed
                    && let Some(notice) = &controller.state().device_notice
                {
                    tracing::error!(notice = %notice, "session ended after failure");
                }
                break;
            }

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                () = tokio::time::sleep(self.config.turn.restart_delay) => {}
            }
        }

        tracing::info!("aura stopped");
        Ok(())
    }

    /// Build the transcription client, preferring Deepgram when its key is
    /// present
    fn build_stt(&self) -> Result<SpeechToText> {
        let voice = &self.config.voice;
        if let Some(key) = &self.config.api_keys.deepgram {
            SpeechToText::new_deepgram(key.clone(), voice.stt_model.clone(), voice.language.clone())
        } else if let Some(key) = &self.config.api_keys.openai {
            SpeechToText::new_whisper(key.clone(), voice.stt_model.clone(), voice.language.clone())
        } else {
            Err(Error::Config(
                "no STT API key (set DEEPGRAM_API_KEY or OPENAI_API_KEY)".to_string(),
            ))
        }
    }

    /// Build the chat client, preferring Groq when its key is present
    fn build_llm(&self) -> Result<ChatClient> {
        let llm = &self.config.llm;
        let (key, base_url) = if let Some(key) = &self.config.api_keys.groq {
            (key.clone(), llm.base_url.clone())
        } else if let Some(key) = &self.config.api_keys.openai {
            let base = if llm.base_url == crate::llm::DEFAULT_BASE_URL {
                "https://api.openai.com/v1".to_string()
            } else {
                llm.base_url.clone()
            };
            (key.clone(), base)
        } else {
            return Err(Error::Config(
                "no LLM API key (set GROQ_API_KEY or OPENAI_API_KEY)".to_string(),
            ));
        };

        Ok(
            ChatClient::new(key, llm.model.clone(), llm.system_prompt.clone())?
                .with_base_url(base_url)
                .with_sampling(llm.max_tokens, llm.temperature),
        )
    }

    /// Build the synthesis client, preferring ElevenLabs when its key is
    /// present
    fn build_tts(&self) -> Result<TextToSpeech> {
        let voice = &self.config.voice;
        if let Some(key) = &self.config.api_keys.elevenlabs {
            TextToSpeech::new_elevenlabs(key.clone(), voice.tts_model.clone())
        } else if let Some(key) = &self.config.api_keys.openai {
            TextToSpeech::new_openai(key.clone(), voice.tts_model.clone(), voice.tts_speed)
        } else {
            Err(Error::Config(
                "no TTS API key (set ELEVENLABS_API_KEY or OPENAI_API_KEY)".to_string(),
            ))
        }
    }

    /// Pick the synthesis voice: stored preference, then configured default,
    /// then the first catalog entry (ElevenLabs) or "alloy" (`OpenAI`)
    fn resolve_startup_voice(&self) -> Result<String> {
        if let Some(stored) = self.store.voice()? {
            return Ok(stored);
        }
        if let Some(configured) = &self.config.voice.default_voice {
            return Ok(configured.clone());
        }
        if self.config.api_keys.elevenlabs.is_some() {
            Ok(VOICE_CATALOG[0].id.to_string())
        } else {
            Ok("alloy".to_string())
        }
    }
}
