//! Audio playback to speakers

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use super::SpeechSink;
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// How playback of a clip ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// The clip played to completion
    Finished,
    /// Playback was interrupted by [`AudioPlayback::stop`]
    Interrupted,
}

/// Clonable handle that interrupts the owning [`AudioPlayback`] from
/// another future
#[derive(Clone)]
pub struct PlaybackHandle {
    interrupt: Arc<AtomicBool>,
}

impl PlaybackHandle {
    /// Interrupt the in-flight clip
    pub fn stop(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    #[allow(dead_code)]
    device: Device,
    config: StreamConfig,
    interrupt: Arc<AtomicBool>,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            device,
            config,
            interrupt: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Interrupt the in-flight clip; the pending `play` call returns
    /// [`PlaybackEnd::Interrupted`] at its next poll
    ///
    /// The interrupt sticks until [`AudioPlayback::reset`], so stopping
    /// before the clip arrives still cancels it.
    pub fn stop(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    /// Clear a pending interrupt
    pub fn reset(&self) {
        self.interrupt.store(false, Ordering::SeqCst);
    }

    /// Handle for interrupting playback from another future
    #[must_use]
    pub fn interrupt_handle(&self) -> PlaybackHandle {
        PlaybackHandle {
            interrupt: Arc::clone(&self.interrupt),
        }
    }

    /// Play audio samples (f32 format)
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub async fn play(&self, samples: Vec<f32>) -> Result<PlaybackEnd> {
        if samples.is_empty() {
            return Ok(PlaybackEnd::Finished);
        }
        if self.interrupt.load(Ordering::SeqCst) {
            return Ok(PlaybackEnd::Interrupted);
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let config = self.config.clone();
        let channels = config.channels as usize;

        let sample_count = samples.len();
        let samples = Arc::new(samples);
        let position = Arc::new(Mutex::new(0usize));
        let finished = Arc::new(AtomicBool::new(false));

        let samples_cb = Arc::clone(&samples);
        let position_cb = Arc::clone(&position);
        let finished_cb = Arc::clone(&finished);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut pos) = position_cb.lock() else {
                        return;
                    };

                    for frame in data.chunks_mut(channels) {
                        let sample = if *pos < samples_cb.len() {
                            samples_cb[*pos]
                        } else {
                            finished_cb.store(true, Ordering::SeqCst);
                            0.0
                        };

                        for out in frame.iter_mut() {
                            *out = sample;
                        }

                        if *pos < samples_cb.len() {
                            *pos += 1;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        // Poll for completion or interruption, bounded by clip duration
        let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
        let start = std::time::Instant::now();
        let timeout = std::time::Duration::from_millis(duration_ms + 500);

        let mut end = PlaybackEnd::Finished;
        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                end = PlaybackEnd::Interrupted;
                break;
            }
            if finished.load(Ordering::SeqCst) || start.elapsed() > timeout {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        if end == PlaybackEnd::Finished {
            // Small delay to let the device drain
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        drop(stream);
        tracing::debug!(samples = sample_count, ?end, "playback ended");

        Ok(end)
    }

    /// Play audio from MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub async fn play_mp3(&self, mp3_data: &[u8]) -> Result<PlaybackEnd> {
        let samples = decode_mp3(mp3_data)?;
        self.play(samples).await
    }
}

#[async_trait(?Send)]
impl SpeechSink for AudioPlayback {
    async fn play(&self, audio: &[u8]) -> Result<PlaybackEnd> {
        self.play_mp3(audio).await
    }

    fn stop(&self) {
        Self::stop(self);
    }

    fn reset(&self) {
        Self::reset(self);
    }
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                // Convert i16 samples to f32 and handle stereo to mono
                let frame_samples: Vec<f32> = if frame.channels == 2 {
                    // Stereo: average channels
                    frame
                        .data
                        .chunks(2)
                        .map(|chunk| {
                            let left = f32::from(chunk[0]) / 32768.0;
                            let right =
                                f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                            f32::midpoint(left, right)
                        })
                        .collect()
                } else {
                    // Mono
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect()
                };

                samples.extend(frame_samples);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}
