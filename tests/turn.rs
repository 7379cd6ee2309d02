//! Turn controller integration tests
//!
//! Drives full turns through mock devices and services, without audio
//! hardware or network access.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use aura_voice::voice::{
    CaptureDevice, Generator, PlaybackEnd, SpeechSink, Synthesizer, Transcriber,
};
use aura_voice::turn::speak_voice_confirmation;
use aura_voice::{
    Error, FALLBACK_GENERIC, FALLBACK_TOPIC, Mode, PreferenceStore, Result, TurnConfig,
    TurnController, TurnOutcome,
};

mod common;

/// Microphone whose `finish` yields a fixed blob
struct MockMic {
    bytes: Vec<u8>,
    fail_start: bool,
    starts: Arc<AtomicUsize>,
}

impl MockMic {
    fn with_bytes(bytes: Vec<u8>) -> (Self, Arc<AtomicUsize>) {
        let starts = Arc::new(AtomicUsize::new(0));
        (
            Self {
                bytes,
                fail_start: false,
                starts: Arc::clone(&starts),
            },
            starts,
        )
    }

    fn broken() -> Self {
        Self {
            bytes: Vec::new(),
            fail_start: true,
            starts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl CaptureDevice for MockMic {
    fn start(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(Error::Audio("no input device".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}

/// Transcriber returning a canned transcript or failing
struct MockStt {
    transcript: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl MockStt {
    fn returning(text: &str) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                transcript: Some(text.to_string()),
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    fn failing() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                transcript: None,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

#[async_trait]
impl Transcriber for MockStt {
    async fn transcribe(&self, _audio: &[u8]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.transcript
            .clone()
            .ok_or_else(|| Error::Stt("service unavailable".to_string()))
    }
}

/// Generator returning a canned reply, a generic failure, or a
/// content-policy rejection
struct MockLlm {
    reply: Option<String>,
    content_policy: bool,
    calls: Arc<AtomicUsize>,
}

impl MockLlm {
    fn returning(text: &str) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                reply: Some(text.to_string()),
                content_policy: false,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    fn failing() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                reply: None,
                content_policy: false,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    fn rejecting() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                reply: None,
                content_policy: true,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

#[async_trait]
impl Generator for MockLlm {
    async fn generate(&self, _text: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.content_policy {
            return Err(Error::ContentPolicy("topic rejected".to_string()));
        }
        self.reply
            .clone()
            .ok_or_else(|| Error::Llm("service unavailable".to_string()))
    }
}

/// Synthesizer recording the voices it was asked for
struct MockTts {
    fail: bool,
    calls: Arc<AtomicUsize>,
    voices: Arc<Mutex<Vec<String>>>,
    stop_during_synthesis: Option<MockSink>,
}

impl MockTts {
    fn working() -> (Self, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let voices = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                fail: false,
                calls: Arc::clone(&calls),
                voices: Arc::clone(&voices),
                stop_during_synthesis: None,
            },
            calls,
            voices,
        )
    }

    fn failing() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                fail: true,
                calls: Arc::clone(&calls),
                voices: Arc::new(Mutex::new(Vec::new())),
                stop_during_synthesis: None,
            },
            calls,
        )
    }

    /// Synthesizer that stops the given sink mid-request, like a user
    /// cancelling while the reply is still being synthesized
    fn stopping(sink: MockSink) -> Self {
        Self {
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
            voices: Arc::new(Mutex::new(Vec::new())),
            stop_during_synthesis: Some(sink),
        }
    }
}

#[async_trait]
impl Synthesizer for MockTts {
    async fn synthesize(&self, _text: &str, voice: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.voices.lock().unwrap().push(voice.to_string());
        if let Some(sink) = &self.stop_during_synthesis {
            sink.stop();
        }
        if self.fail {
            return Err(Error::Tts("service unavailable".to_string()));
        }
        Ok(vec![0xFF; 64])
    }
}

#[derive(Default)]
struct SinkShared {
    stopped: AtomicBool,
    plays: AtomicUsize,
    fail: bool,
    block: bool,
}

/// Speech sink whose handle can be cloned to interrupt from another future
#[derive(Clone)]
struct MockSink {
    shared: Arc<SinkShared>,
}

impl MockSink {
    fn working() -> Self {
        Self {
            shared: Arc::new(SinkShared::default()),
        }
    }

    fn failing() -> Self {
        Self {
            shared: Arc::new(SinkShared {
                fail: true,
                ..SinkShared::default()
            }),
        }
    }

    /// Sink that plays until `stop` is called
    fn blocking() -> Self {
        Self {
            shared: Arc::new(SinkShared {
                block: true,
                ..SinkShared::default()
            }),
        }
    }

    fn plays(&self) -> usize {
        self.shared.plays.load(Ordering::SeqCst)
    }
}

#[async_trait(?Send)]
impl SpeechSink for MockSink {
    async fn play(&self, _audio: &[u8]) -> Result<PlaybackEnd> {
        self.shared.plays.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail {
            return Err(Error::Audio("no output device".to_string()));
        }
        if self.shared.block {
            loop {
                if self.shared.stopped.load(Ordering::SeqCst) {
                    return Ok(PlaybackEnd::Interrupted);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
        if self.shared.stopped.load(Ordering::SeqCst) {
            Ok(PlaybackEnd::Interrupted)
        } else {
            Ok(PlaybackEnd::Finished)
        }
    }

    fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.shared.stopped.store(false, Ordering::SeqCst);
    }
}

type MockController = TurnController<MockMic, MockStt, MockLlm, MockTts, MockSink>;

fn controller(
    mic: MockMic,
    stt: MockStt,
    llm: MockLlm,
    tts: MockTts,
    sink: MockSink,
) -> MockController {
    let store = PreferenceStore::open_memory().expect("failed to open store");
    TurnController::new(
        TurnConfig::default(),
        mic,
        stt,
        llm,
        tts,
        sink,
        store,
        "21m00Tcm4TlvDq8ikWAM".to_string(),
    )
}

#[tokio::test]
async fn test_completed_turn() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, stt_calls) = MockStt::returning("Merhaba");
    let (llm, llm_calls) = MockLlm::returning("Selam!");
    let (tts, tts_calls, _) = MockTts::working();
    let sink = MockSink::working();
    let sink_handle = sink.clone();

    let mut controller = controller(mic, stt, llm, tts, sink);

    controller.start_capture().unwrap();
    assert_eq!(controller.state().mode, Mode::Listening);

    let outcome = controller.finish_capture().await;

    assert_eq!(outcome, TurnOutcome::Completed);
    assert!(outcome.should_restart());
    assert_eq!(controller.state().mode, Mode::Idle);
    assert!(controller.state().transcript.is_empty());
    assert_eq!(controller.state().last_response, "Selam!");
    assert_eq!(stt_calls.load(Ordering::SeqCst), 1);
    assert_eq!(llm_calls.load(Ordering::SeqCst), 1);
    assert_eq!(tts_calls.load(Ordering::SeqCst), 1);
    assert_eq!(sink_handle.plays(), 1);
}

#[tokio::test]
async fn test_short_utterance_abandons_without_service_calls() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(2000));
    let (stt, stt_calls) = MockStt::returning("should not be called");
    let (llm, llm_calls) = MockLlm::returning("should not be called");
    let (tts, tts_calls, _) = MockTts::working();
    let sink = MockSink::working();
    let sink_handle = sink.clone();

    let mut controller = controller(mic, stt, llm, tts, sink);

    controller.start_capture().unwrap();
    let outcome = controller.finish_capture().await;

    assert_eq!(outcome, TurnOutcome::Abandoned);
    assert!(outcome.should_restart());
    assert_eq!(controller.state().mode, Mode::Idle);
    assert_eq!(stt_calls.load(Ordering::SeqCst), 0);
    assert_eq!(llm_calls.load(Ordering::SeqCst), 0);
    assert_eq!(tts_calls.load(Ordering::SeqCst), 0);
    assert_eq!(sink_handle.plays(), 0);
}

#[tokio::test]
async fn test_whitespace_transcript_abandons_before_generation() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, _) = MockStt::returning("   ");
    let (llm, llm_calls) = MockLlm::returning("should not be called");
    let (tts, tts_calls, _) = MockTts::working();
    let sink = MockSink::working();

    let mut controller = controller(mic, stt, llm, tts, sink);

    controller.start_capture().unwrap();
    let outcome = controller.finish_capture().await;

    assert_eq!(outcome, TurnOutcome::Abandoned);
    assert_eq!(controller.state().mode, Mode::Idle);
    assert!(controller.state().transcript.is_empty());
    assert_eq!(llm_calls.load(Ordering::SeqCst), 0);
    assert_eq!(tts_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_transcription_failure_speaks_generic_fallback() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, _) = MockStt::failing();
    let (llm, llm_calls) = MockLlm::returning("should not be called");
    let (tts, _, _) = MockTts::working();
    let sink = MockSink::working();
    let sink_handle = sink.clone();

    let mut controller = controller(mic, stt, llm, tts, sink);

    controller.start_capture().unwrap();
    let outcome = controller.finish_capture().await;

    assert_eq!(outcome, TurnOutcome::SpokeFallback);
    assert!(outcome.should_restart());
    assert_eq!(controller.state().last_response, FALLBACK_GENERIC);
    assert_eq!(controller.state().mode, Mode::Idle);
    assert_eq!(llm_calls.load(Ordering::SeqCst), 0);
    assert_eq!(sink_handle.plays(), 1);
}

#[tokio::test]
async fn test_generation_failure_speaks_generic_fallback() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, _) = MockStt::returning("hello there");
    let (llm, _) = MockLlm::failing();
    let (tts, _, _) = MockTts::working();
    let sink = MockSink::working();

    let mut controller = controller(mic, stt, llm, tts, sink);

    controller.start_capture().unwrap();
    let outcome = controller.finish_capture().await;

    assert_eq!(outcome, TurnOutcome::SpokeFallback);
    assert_eq!(controller.state().last_response, FALLBACK_GENERIC);
}

#[tokio::test]
async fn test_content_policy_rejection_speaks_topic_fallback() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, _) = MockStt::returning("tell me something forbidden");
    let (llm, _) = MockLlm::rejecting();
    let (tts, _, _) = MockTts::working();
    let sink = MockSink::working();

    let mut controller = controller(mic, stt, llm, tts, sink);

    controller.start_capture().unwrap();
    let outcome = controller.finish_capture().await;

    assert_eq!(outcome, TurnOutcome::SpokeFallback);
    assert_eq!(controller.state().last_response, FALLBACK_TOPIC);
    assert_ne!(FALLBACK_TOPIC, FALLBACK_GENERIC);
}

#[tokio::test]
async fn test_synthesis_double_failure_ends_turn_failed() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, _) = MockStt::returning("hello");
    let (llm, _) = MockLlm::returning("hi!");
    let (tts, tts_calls) = MockTts::failing();
    let sink = MockSink::working();
    let sink_handle = sink.clone();

    let mut controller = controller(mic, stt, llm, tts, sink);

    controller.start_capture().unwrap();
    let outcome = controller.finish_capture().await;

    // One attempt for the reply, one for the fallback; neither played
    assert_eq!(outcome, TurnOutcome::Failed);
    assert!(!outcome.should_restart());
    assert_eq!(tts_calls.load(Ordering::SeqCst), 2);
    assert_eq!(sink_handle.plays(), 0);
    assert!(controller.state().device_notice.is_some());
    assert_eq!(controller.state().mode, Mode::Idle);
}

#[tokio::test]
async fn test_playback_failure_then_fallback_playback_failure() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, _) = MockStt::returning("hello");
    let (llm, _) = MockLlm::returning("hi!");
    let (tts, tts_calls, _) = MockTts::working();
    let sink = MockSink::failing();
    let sink_handle = sink.clone();

    let mut controller = controller(mic, stt, llm, tts, sink);

    controller.start_capture().unwrap();
    let outcome = controller.finish_capture().await;

    assert_eq!(outcome, TurnOutcome::Failed);
    assert_eq!(tts_calls.load(Ordering::SeqCst), 2);
    assert_eq!(sink_handle.plays(), 2);
    assert!(controller.state().device_notice.is_some());
}

#[tokio::test]
async fn test_interrupting_playback_ends_turn() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, _) = MockStt::returning("tell me a story");
    let (llm, _) = MockLlm::returning("Once upon a time...");
    let (tts, _, _) = MockTts::working();
    let sink = MockSink::blocking();
    let sink_handle = sink.clone();

    let mut controller = controller(mic, stt, llm, tts, sink);

    controller.start_capture().unwrap();

    let (outcome, ()) = tokio::join!(controller.finish_capture(), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        sink_handle.stop();
    });

    assert_eq!(outcome, TurnOutcome::Interrupted);
    assert!(!outcome.should_restart());
    assert_eq!(controller.state().mode, Mode::Idle);
}

#[tokio::test]
async fn test_stop_during_synthesis_cuts_the_playback_that_follows() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, _) = MockStt::returning("tell me a story");
    let (llm, _) = MockLlm::returning("Once upon a time...");
    let sink = MockSink::working();
    let tts = MockTts::stopping(sink.clone());

    let mut controller = controller(mic, stt, llm, tts, sink);

    controller.start_capture().unwrap();
    let outcome = controller.finish_capture().await;

    assert_eq!(outcome, TurnOutcome::Interrupted);
    assert!(!outcome.should_restart());
    assert_eq!(controller.state().mode, Mode::Idle);
}

#[tokio::test]
async fn test_stale_stop_does_not_carry_into_next_turn() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, _) = MockStt::returning("Merhaba");
    let (llm, _) = MockLlm::returning("Selam!");
    let (tts, _, _) = MockTts::working();
    let sink = MockSink::working();
    let sink_handle = sink.clone();

    let mut controller = controller(mic, stt, llm, tts, sink);

    // Stop issued between turns must not cancel the turn that follows
    sink_handle.stop();

    controller.start_capture().unwrap();
    let outcome = controller.finish_capture().await;

    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(controller.state().last_response, "Selam!");
}

#[tokio::test]
async fn test_start_capture_is_noop_while_listening() {
    let (mic, starts) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, _) = MockStt::returning("hello");
    let (llm, _) = MockLlm::returning("hi!");
    let (tts, _, _) = MockTts::working();
    let sink = MockSink::working();

    let mut controller = controller(mic, stt, llm, tts, sink);

    controller.start_capture().unwrap();
    controller.start_capture().unwrap();

    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(controller.state().mode, Mode::Listening);
}

#[tokio::test]
async fn test_start_capture_device_failure_stays_idle() {
    let mic = MockMic::broken();
    let (stt, _) = MockStt::returning("hello");
    let (llm, _) = MockLlm::returning("hi!");
    let (tts, _, _) = MockTts::working();
    let sink = MockSink::working();

    let mut controller = controller(mic, stt, llm, tts, sink);

    assert!(controller.start_capture().is_err());
    assert_eq!(controller.state().mode, Mode::Idle);
    assert!(controller.state().device_notice.is_some());
}

#[tokio::test]
async fn test_finish_capture_without_listening_is_noop() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, stt_calls) = MockStt::returning("hello");
    let (llm, _) = MockLlm::returning("hi!");
    let (tts, _, _) = MockTts::working();
    let sink = MockSink::working();

    let mut controller = controller(mic, stt, llm, tts, sink);

    let outcome = controller.finish_capture().await;

    assert_eq!(outcome, TurnOutcome::Abandoned);
    assert_eq!(stt_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_speaking_is_noop_when_idle() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, _) = MockStt::returning("hello");
    let (llm, _) = MockLlm::returning("hi!");
    let (tts, _, _) = MockTts::working();
    let sink = MockSink::working();
    let sink_handle = sink.clone();

    let mut controller = controller(mic, stt, llm, tts, sink);

    controller.cancel_speaking();
    assert!(!sink_handle.shared.stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_capture_window_expires() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, _) = MockStt::returning("hello");
    let (llm, _) = MockLlm::returning("hi!");
    let (tts, _, _) = MockTts::working();
    let sink = MockSink::working();

    let store = PreferenceStore::open_memory().unwrap();
    let config = TurnConfig {
        capture_timeout: Duration::from_millis(50),
        ..TurnConfig::default()
    };
    let mut controller = TurnController::new(
        config,
        mic,
        stt,
        llm,
        tts,
        sink,
        store,
        "21m00Tcm4TlvDq8ikWAM".to_string(),
    );

    controller.start_capture().unwrap();
    assert!(!controller.capture_expired());

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(controller.capture_expired());
}

#[tokio::test]
async fn test_announce_plays_text() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, _) = MockStt::returning("hello");
    let (llm, _) = MockLlm::returning("hi!");
    let (tts, _, _) = MockTts::working();
    let sink = MockSink::working();
    let sink_handle = sink.clone();

    let mut controller = controller(mic, stt, llm, tts, sink);

    let outcome = controller.announce("System online. Hello!").await;

    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(controller.state().last_response, "System online. Hello!");
    assert_eq!(sink_handle.plays(), 1);
}

#[tokio::test]
async fn test_change_voice_persists_and_confirms() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("prefs.db");
    let store = PreferenceStore::open(&store_path).unwrap();

    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, _) = MockStt::returning("hello");
    let (llm, _) = MockLlm::returning("hi!");
    let (tts, tts_calls, voices) = MockTts::working();
    let sink = MockSink::working();

    let mut controller = TurnController::new(
        TurnConfig::default(),
        mic,
        stt,
        llm,
        tts,
        sink,
        store,
        "21m00Tcm4TlvDq8ikWAM".to_string(),
    );

    let outcome = controller.change_voice("Sarah").await.unwrap();

    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(controller.state().selected_voice, "EXAVITQu4vr4xnSDxMaL");
    assert_eq!(tts_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        voices.lock().unwrap().as_slice(),
        ["EXAVITQu4vr4xnSDxMaL".to_string()]
    );

    // Survives a reopen
    let reopened = PreferenceStore::open(&store_path).unwrap();
    assert_eq!(
        reopened.voice().unwrap().as_deref(),
        Some("EXAVITQu4vr4xnSDxMaL")
    );
}

#[tokio::test]
async fn test_change_voice_rejects_unknown() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, _) = MockStt::returning("hello");
    let (llm, _) = MockLlm::returning("hi!");
    let (tts, tts_calls, _) = MockTts::working();
    let sink = MockSink::working();

    let mut controller = controller(mic, stt, llm, tts, sink);

    assert!(controller.change_voice("nobody").await.is_err());
    assert_eq!(tts_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_voice_confirmation_speaks_once_in_new_voice() {
    let (tts, tts_calls, voices) = MockTts::working();
    let sink = MockSink::working();

    let end = speak_voice_confirmation(&tts, &sink, "EXAVITQu4vr4xnSDxMaL")
        .await
        .unwrap();

    assert_eq!(end, PlaybackEnd::Finished);
    assert_eq!(tts_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        voices.lock().unwrap().as_slice(),
        ["EXAVITQu4vr4xnSDxMaL".to_string()]
    );
    assert_eq!(sink.plays(), 1);
}

#[tokio::test]
async fn test_change_voice_rejected_while_listening() {
    let (mic, _) = MockMic::with_bytes(common::utterance_bytes(6000));
    let (stt, _) = MockStt::returning("hello");
    let (llm, _) = MockLlm::returning("hi!");
    let (tts, _, _) = MockTts::working();
    let sink = MockSink::working();

    let mut controller = controller(mic, stt, llm, tts, sink);

    controller.start_capture().unwrap();
    assert!(controller.change_voice("Sarah").await.is_err());
    assert_eq!(controller.state().selected_voice, "21m00Tcm4TlvDq8ikWAM");
}
