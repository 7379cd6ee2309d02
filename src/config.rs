//! Configuration management for the Aura voice assistant

use std::path::PathBuf;
use std::time::Duration;

use crate::turn::TurnConfig;
use crate::{Error, Result};

/// Aura configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (preference database)
    pub data_dir: PathBuf,

    /// Voice pipeline configuration
    pub voice: VoiceConfig,

    /// Language model configuration
    pub llm: LlmConfig,

    /// Turn loop thresholds and timings
    pub turn: TurnConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Voice pipeline configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Language hint passed to the transcription service (ISO 639-1)
    pub language: String,

    /// STT model identifier
    pub stt_model: String,

    /// TTS model identifier
    pub tts_model: String,

    /// Synthesis voice used when no preference is stored
    pub default_voice: Option<String>,

    /// TTS speech speed (`OpenAI` backend only)
    pub tts_speed: f32,
}

/// Language model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Chat-completions endpoint base URL (any OpenAI-compatible endpoint)
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// System instruction prepended to every turn
    pub system_prompt: String,

    /// Token ceiling for replies
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,
}

/// API keys loaded from environment
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper STT, TTS, chat completions)
    pub openai: Option<String>,

    /// Groq API key (chat completions)
    pub groq: Option<String>,

    /// ElevenLabs API key (TTS)
    pub elevenlabs: Option<String>,

    /// Deepgram API key (STT)
    pub deepgram: Option<String>,
}

/// Default system instruction for spoken replies
const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly voice assistant. \
    Your replies are spoken aloud, so keep them to two or three short \
    sentences, conversational, with no markup or lists.";

impl Config {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns error if the data directory cannot be determined or created,
    /// or if a numeric variable fails to parse
    pub fn load() -> Result<Self> {
        let data_dir = if let Ok(dir) = std::env::var("AURA_DATA_DIR") {
            PathBuf::from(dir)
        } else {
            directories::ProjectDirs::from("dev", "aura", "aura")
                .ok_or_else(|| Error::Config("could not determine data directory".to_string()))?
                .data_dir()
                .to_path_buf()
        };
        std::fs::create_dir_all(&data_dir)?;

        let voice = VoiceConfig {
            language: std::env::var("AURA_LANGUAGE").unwrap_or_else(|_| "en".to_string()),
            stt_model: std::env::var("AURA_STT_MODEL").unwrap_or_else(|_| {
                if std::env::var("DEEPGRAM_API_KEY").is_ok() {
                    "nova-2".to_string()
                } else {
                    "whisper-1".to_string()
                }
            }),
            tts_model: std::env::var("AURA_TTS_MODEL").unwrap_or_else(|_| {
                if std::env::var("ELEVENLABS_API_KEY").is_ok() {
                    "eleven_multilingual_v2".to_string()
                } else {
                    "tts-1".to_string()
                }
            }),
            default_voice: std::env::var("AURA_VOICE").ok(),
            tts_speed: parse_env("AURA_TTS_SPEED", 1.0)?,
        };

        let llm = LlmConfig {
            base_url: std::env::var("AURA_LLM_BASE_URL")
                .unwrap_or_else(|_| crate::llm::DEFAULT_BASE_URL.to_string()),
            model: std::env::var("AURA_LLM_MODEL")
                .unwrap_or_else(|_| crate::llm::DEFAULT_MODEL.to_string()),
            system_prompt: std::env::var("AURA_SYSTEM_PROMPT")
                .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tokens: parse_env("AURA_MAX_TOKENS", crate::llm::DEFAULT_MAX_TOKENS)?,
            temperature: parse_env("AURA_TEMPERATURE", crate::llm::DEFAULT_TEMPERATURE)?,
        };

        let defaults = TurnConfig::default();
        let turn = TurnConfig {
            min_utterance_bytes: parse_env(
                "AURA_MIN_UTTERANCE_BYTES",
                defaults.min_utterance_bytes,
            )?,
            min_transcript_chars: parse_env(
                "AURA_MIN_TRANSCRIPT_CHARS",
                defaults.min_transcript_chars,
            )?,
            capture_timeout: Duration::from_millis(parse_env(
                "AURA_CAPTURE_TIMEOUT_MS",
                u64::try_from(defaults.capture_timeout.as_millis()).unwrap_or(6000),
            )?),
            continuous: std::env::var("AURA_CONTINUOUS").is_ok_and(|v| v == "1" || v == "true"),
            restart_delay: Duration::from_millis(parse_env(
                "AURA_RESTART_DELAY_MS",
                u64::try_from(defaults.restart_delay.as_millis()).unwrap_or(1000),
            )?),
        };

        let api_keys = ApiKeys {
            openai: std::env::var("OPENAI_API_KEY").ok(),
            groq: std::env::var("GROQ_API_KEY").ok(),
            elevenlabs: std::env::var("ELEVENLABS_API_KEY").ok(),
            deepgram: std::env::var("DEEPGRAM_API_KEY").ok(),
        };

        Ok(Self {
            data_dir,
            voice,
            llm,
            turn,
            api_keys,
        })
    }

    /// Path to the preference database
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("aura.db")
    }
}

/// Parse an environment variable, falling back to a default when unset
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("invalid value for {name}: {raw}"))),
        Err(_) => Ok(default),
    }
}
