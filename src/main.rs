use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use aura_voice::store::PreferenceStore;
use aura_voice::voice::{
    AudioCapture, AudioPlayback, TextToSpeech, VOICE_CATALOG, calculate_rms, resolve_voice,
};
use aura_voice::{Config, Daemon};

/// Aura - hands-free voice assistant
#[derive(Parser)]
#[command(name = "aura", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Keep listening after each completed turn
    #[arg(long, env = "AURA_CONTINUOUS")]
    continuous: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// List the available synthesis voices
    Voices,
    /// Set the synthesis voice (by name or id)
    SetVoice {
        /// Voice name or id from `aura voices`
        voice: String,
    },
    /// Show the persisted synthesis voice
    GetVoice,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,aura_voice=info",
        1 => "info,aura_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&text).await,
            Command::Voices => list_voices(),
            Command::SetVoice { voice } => set_voice(&voice).await,
            Command::GetVoice => get_voice(),
        };
    }

    let mut config = Config::load()?;
    if cli.continuous {
        config.turn.continuous = true;
    }

    tracing::info!(continuous = config.turn.continuous, "starting aura");

    let daemon = Daemon::new(config)?;
    daemon.run().await?;

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.peek_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        // Clear buffer each second
        capture.clear_buffer();
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    // Generate 2 seconds of 440Hz sine wave at 24kHz sample rate
    let sample_rate = 24000_i32;
    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    playback.play(samples).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test TTS output
#[allow(clippy::future_not_send)]
async fn test_tts(text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load()?;

    let tts = tts_from_config(&config)?;
    let voice = config.voice.default_voice.clone().unwrap_or_else(|| {
        if config.api_keys.elevenlabs.is_some() {
            VOICE_CATALOG[0].id.to_string()
        } else {
            "alloy".to_string()
        }
    });

    println!("Synthesizing speech...");
    let mp3_data = tts.synthesize(text, &voice).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    // Check MP3 header
    if mp3_data.len() > 3 {
        println!(
            "First 4 bytes: {:02x} {:02x} {:02x} {:02x}",
            mp3_data[0], mp3_data[1], mp3_data[2], mp3_data[3]
        );
    }

    println!("Playing audio...");
    let playback = AudioPlayback::new()?;
    playback.play_mp3(&mp3_data).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// List the voice catalog
fn list_voices() -> anyhow::Result<()> {
    let current = open_store()?.voice()?;

    for voice in VOICE_CATALOG {
        let marker = if current.as_deref() == Some(voice.id) {
            "*"
        } else {
            " "
        };
        println!("{marker} {:<10} {}", voice.name, voice.id);
    }

    Ok(())
}

/// Persist the synthesis voice and confirm audibly in the new voice
#[allow(clippy::future_not_send)]
async fn set_voice(id_or_name: &str) -> anyhow::Result<()> {
    let voice = resolve_voice(id_or_name).ok_or_else(|| {
        anyhow::anyhow!("unknown voice: {id_or_name} (run `aura voices` for the list)")
    })?;

    let config = Config::load()?;
    PreferenceStore::open(config.store_path())?.set_voice(voice.id)?;
    println!("Voice set to {} ({})", voice.name, voice.id);

    if let Err(e) = confirm_voice(&config, voice.id).await {
        println!("Skipping spoken confirmation: {e}");
    }

    Ok(())
}

/// Speak the voice-change confirmation in the newly selected voice
#[allow(clippy::future_not_send)]
async fn confirm_voice(config: &Config, voice_id: &str) -> anyhow::Result<()> {
    let tts = tts_from_config(config)?;
    let playback = AudioPlayback::new()?;
    aura_voice::turn::speak_voice_confirmation(&tts, &playback, voice_id).await?;
    Ok(())
}

/// Build the synthesis client from whichever TTS key is configured
fn tts_from_config(config: &Config) -> anyhow::Result<TextToSpeech> {
    if let Some(key) = &config.api_keys.elevenlabs {
        Ok(TextToSpeech::new_elevenlabs(
            key.clone(),
            config.voice.tts_model.clone(),
        )?)
    } else if let Some(key) = &config.api_keys.openai {
        Ok(TextToSpeech::new_openai(
            key.clone(),
            config.voice.tts_model.clone(),
            config.voice.tts_speed,
        )?)
    } else {
        anyhow::bail!("no TTS API key (set ELEVENLABS_API_KEY or OPENAI_API_KEY)")
    }
}

/// Show the persisted synthesis voice
fn get_voice() -> anyhow::Result<()> {
    match open_store()?.voice()? {
        Some(id) => {
            let name = resolve_voice(&id).map_or("unknown", |v| v.name);
            println!("Current voice: {name} ({id})");
        }
        None => println!("No voice configured (using the default)"),
    }

    Ok(())
}

/// Open the preference store at the configured path
fn open_store() -> anyhow::Result<PreferenceStore> {
    let config = Config::load()?;
    Ok(PreferenceStore::open(config.store_path())?)
}
