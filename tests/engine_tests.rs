//! Integration tests for the duplex engine
//!
//! The engine runs against an in-memory session (the test plays the
//! server) and an in-memory audio device. These tests verify:
//! - Barge-in: local mute, cancel, confirmation paths and timeout re-arm
//! - Tool calls, deferred continuations and the end-of-conversation flow
//! - Remote and local turn modes
//! - Terminal connection loss

mod fixtures;
mod mock_providers;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fixtures::*;
use mock_providers::{MemoryAudioDevice, MockSession};
use waav_duplex::core::realtime::TurnMode;
use waav_duplex::core::stt::{BlockingTranscriber, Transcription};
use waav_duplex::core::tools::ToolDispatcher;
use waav_duplex::core::vad::SegmenterConfig;
use waav_duplex::engine::{
    ConversationEvent, DuplexEngine, EndReason, EngineError, EngineResult, EngineSettings,
    InterruptHandle, InterruptReason, SessionFlags, SessionSummary,
};

const WAIT: Duration = Duration::from_secs(3);

struct Harness {
    mock: MockSession,
    device: MemoryAudioDevice,
    events: broadcast::Receiver<ConversationEvent>,
    interrupts: InterruptHandle,
    flags: Arc<SessionFlags>,
    shutdown: CancellationToken,
    run: JoinHandle<EngineResult<SessionSummary>>,
}

impl Harness {
    fn start(settings: EngineSettings, device: MemoryAudioDevice) -> Self {
        Self::start_with(settings, device, |engine| engine)
    }

    fn start_with<F>(settings: EngineSettings, device: MemoryAudioDevice, customize: F) -> Self
    where
        F: FnOnce(DuplexEngine) -> DuplexEngine,
    {
        let (mock, session) = MockSession::new();
        let engine = DuplexEngine::new(
            settings,
            Arc::new(device.clone()),
            ToolDispatcher::standard().unwrap(),
        );
        let engine = customize(engine);
        let events = engine.subscribe();
        let interrupts = engine.interrupt_handle();
        let flags = engine.flags();
        let shutdown = engine.shutdown_token();
        let run = tokio::spawn(engine.run(session));
        Self {
            mock,
            device,
            events,
            interrupts,
            flags,
            shutdown,
            run,
        }
    }

    /// session.created + session.updated, then wait for capture to open.
    async fn open_session(&self) {
        self.mock.send_all([session_created("sess_1"), session_updated("sess_1")]);
        let flags = self.flags.clone();
        assert!(wait_for(move || flags.is_input_open()).await, "input never opened");
    }

    async fn play(&self, value: i16) -> bool {
        let device = self.device.clone();
        wait_for(move || device.played_samples().contains(&value)).await
    }

    fn drain_events(&mut self) -> Vec<ConversationEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => out.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        out
    }

    async fn finish(self) -> EngineResult<SessionSummary> {
        tokio::time::timeout(WAIT, self.run)
            .await
            .expect("engine did not stop in time")
            .expect("engine task panicked")
    }

    async fn shutdown(self) -> SessionSummary {
        self.shutdown.cancel();
        self.finish().await.expect("clean shutdown")
    }
}

async fn wait_for<F>(predicate: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    predicate()
}

fn remote_settings() -> EngineSettings {
    EngineSettings {
        suppression_timeout: Some(Duration::from_secs(10)),
        end_conversation_grace: Duration::from_millis(150),
        ..EngineSettings::default()
    }
}

fn remote_device() -> MemoryAudioDevice {
    MemoryAudioDevice::new(remote_format())
}

/// Response `resp_1` is playing a 1111-valued tone.
async fn start_speaking(harness: &Harness) {
    harness.open_session().await;
    harness
        .mock
        .send_all([response_created("resp_1"), audio_delta("resp_1", 480, 1111)]);
    assert!(harness.play(1111).await, "first delta never played");
}

async fn interrupt(harness: &Harness, expected_cancels: usize) {
    assert!(harness.interrupts.request(InterruptReason::LocalKeypress));
    let log = harness.mock.outbound.clone();
    assert!(
        log.wait_until(WAIT, |l| l.cancels().len() == expected_cancels)
            .await,
        "cancel not sent"
    );
}

// =============================================================================
// Barge-in
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interrupt_drops_audio_until_confirmed() {
    let mut harness = Harness::start(remote_settings(), remote_device());
    start_speaking(&harness).await;

    interrupt(&harness, 1).await;
    let (event_id, response_id) = harness.mock.outbound.cancels()[0].clone();
    assert!(event_id.unwrap().starts_with("evt_"));
    assert_eq!(response_id.as_deref(), Some("resp_1"));
    assert!(harness.flags.is_suppressed());
    assert!(!harness.flags.is_ai_speaking());

    // Late audio of the cancelled response
    harness.mock.send(audio_delta("resp_1", 480, 2222));
    harness.mock.send(response_cancelled("resp_1"));
    let flags = harness.flags.clone();
    assert!(wait_for(move || !flags.is_suppressed()).await);

    harness
        .mock
        .send_all([response_created("resp_2"), audio_delta("resp_2", 480, 3333)]);
    assert!(harness.play(3333).await, "new response never played");
    assert!(!harness.device.played_samples().contains(&2222));
    // The flush reopened the output stream
    assert!(harness.device.output_opens() >= 2);

    let events = harness.drain_events();
    assert!(events.contains(&ConversationEvent::Interrupted {
        reason: InterruptReason::LocalKeypress
    }));
    assert!(events.contains(&ConversationEvent::InterruptConfirmed));

    let summary = harness.shutdown().await;
    assert_eq!(summary.end_reason, EndReason::Shutdown);
    assert_eq!(summary.interrupts, 1);
    assert!(summary.deltas_dropped >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_active_response_error_clears_suppression() {
    let mut harness = Harness::start(remote_settings(), remote_device());
    start_speaking(&harness).await;
    interrupt(&harness, 1).await;
    assert!(harness.flags.is_suppressed());

    harness.mock.send(error_event(
        "Cancellation failed: no active response found",
        Some("response_cancel_not_active"),
        None,
    ));
    let flags = harness.flags.clone();
    assert!(wait_for(move || !flags.is_suppressed()).await);
    assert!(
        harness
            .drain_events()
            .contains(&ConversationEvent::InterruptConfirmed)
    );

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_error_echoing_cancel_event_id_clears_suppression() {
    let harness = Harness::start(remote_settings(), remote_device());
    start_speaking(&harness).await;
    interrupt(&harness, 1).await;

    let event_id = harness.mock.outbound.cancels()[0].0.clone().unwrap();
    harness
        .mock
        .send(error_event("Something about this request", None, Some(&event_id)));
    let flags = harness.flags.clone();
    assert!(wait_for(move || !flags.is_suppressed()).await);

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unrelated_error_keeps_suppression() {
    let harness = Harness::start(remote_settings(), remote_device());
    start_speaking(&harness).await;
    interrupt(&harness, 1).await;

    harness
        .mock
        .send(error_event("Invalid value for voice", Some("invalid_value"), None));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.flags.is_suppressed());

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_interrupt_is_idempotent() {
    let harness = Harness::start(remote_settings(), remote_device());
    start_speaking(&harness).await;

    interrupt(&harness, 1).await;
    assert!(harness.interrupts.request(InterruptReason::LocalKeypress));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.mock.outbound.cancels().len(), 1);
    assert!(harness.flags.is_suppressed());

    let summary = harness.shutdown().await;
    assert_eq!(summary.interrupts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interrupt_without_response_sends_nothing() {
    let harness = Harness::start(remote_settings(), remote_device());
    harness.open_session().await;

    assert!(harness.interrupts.request(InterruptReason::LocalKeypress));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.mock.outbound.cancels().is_empty());
    assert!(!harness.flags.is_suppressed());

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_suppression_timeout_rearms_but_keeps_fence() {
    let settings = EngineSettings {
        suppression_timeout: Some(Duration::from_millis(100)),
        ..remote_settings()
    };
    let mut harness = Harness::start(settings, remote_device());
    start_speaking(&harness).await;
    interrupt(&harness, 1).await;

    // The server never confirms
    let flags = harness.flags.clone();
    assert!(wait_for(move || !flags.is_suppressed()).await);
    assert!(
        harness
            .drain_events()
            .contains(&ConversationEvent::InterruptConfirmed)
    );

    harness.mock.send_all([
        audio_delta("resp_1", 480, 2222),
        response_created("resp_2"),
        audio_delta("resp_2", 480, 3333),
    ]);
    assert!(harness.play(3333).await);
    assert!(!harness.device.played_samples().contains(&2222));

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_speech_start_stops_local_playback() {
    let harness = Harness::start(remote_settings(), remote_device());
    start_speaking(&harness).await;

    harness.mock.send(speech_started());
    harness.mock.send(audio_delta("resp_1", 480, 2222));
    harness
        .mock
        .send_all([response_created("resp_2"), audio_delta("resp_2", 480, 3333)]);
    assert!(harness.play(3333).await);
    assert!(!harness.device.played_samples().contains(&2222));
    // The server cancels its own response on speech
    assert!(harness.mock.outbound.cancels().is_empty());

    harness.shutdown().await;
}

// =============================================================================
// Tools and conversation end
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tool_result_then_deferred_continuation() {
    let mut harness = Harness::start(remote_settings(), remote_device());
    harness.open_session().await;

    harness.mock.send_all([
        response_created("resp_1"),
        function_item_added("resp_1", "call_w", "get_weather"),
        function_call_done("resp_1", "call_w", None, json!({"location": "Beijing"})),
    ]);
    let log = harness.mock.outbound.clone();
    assert!(log.wait_until(WAIT, |l| l.function_outputs().len() == 1).await);
    // Continuation waits for the response to finish
    assert!(log.response_creates().is_empty());

    harness.mock.send_all([
        response_done("resp_1", "completed"),
        function_output_created("call_w"),
    ]);
    assert!(log.wait_until(WAIT, |l| l.response_creates().len() == 1).await);
    assert_eq!(log.response_creates()[0], None);

    let (call_id, output) = log.function_outputs()[0].clone();
    assert_eq!(call_id, "call_w");
    let output: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(output["location"], "Beijing");

    let events = harness.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        ConversationEvent::ToolCalled { name, is_error: false, .. } if name == "get_weather"
    )));

    let summary = harness.shutdown().await;
    assert_eq!(summary.tool_calls, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_conversation_flow() {
    let mut harness = Harness::start(remote_settings(), remote_device());
    harness.open_session().await;

    harness.mock.send_all([
        response_created("resp_1"),
        function_item_added("resp_1", "call_end", "end_conversation"),
        function_call_done("resp_1", "call_end", None, json!({})),
        // Anything after the end request is ignored
        function_call_done(
            "resp_1",
            "call_late",
            Some("get_weather"),
            json!({"location": "Paris"}),
        ),
        response_done("resp_1", "completed"),
    ]);

    let events_before_end = {
        let log = harness.mock.outbound.clone();
        assert!(log.wait_until(WAIT, |l| l.response_creates().len() == 1).await);
        harness.drain_events()
    };
    assert!(!harness.flags.is_input_open());

    let mock_log = harness.mock.outbound.clone();
    let result = harness.finish().await.expect("conversation ends cleanly");
    assert_eq!(result.end_reason, EndReason::ConversationEnded);
    assert_eq!(result.tool_calls, 1);

    let outputs = mock_log.function_outputs();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].0, "call_end");
    assert!(outputs[0].1.contains("conversation_ended"));
    assert_eq!(mock_log.response_creates().len(), 1);

    assert!(events_before_end.iter().any(|e| matches!(
        e,
        ConversationEvent::ToolCalled { name, .. } if name == "end_conversation"
    )));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_continuation_after_grace_period() {
    let settings = EngineSettings {
        end_conversation_grace: Duration::from_millis(50),
        ..remote_settings()
    };
    let harness = Harness::start(settings, remote_device());
    harness.open_session().await;

    harness.mock.send_all([
        response_created("resp_1"),
        function_call_done("resp_1", "call_end", Some("end_conversation"), json!({})),
    ]);

    let log = harness.mock.outbound.clone();
    let result = harness.finish().await.unwrap();
    assert_eq!(result.end_reason, EndReason::ConversationEnded);
    assert_eq!(log.function_outputs().len(), 1);
    assert!(log.response_creates().is_empty());
}

// =============================================================================
// Turn modes and lifecycle
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_capture_starts_after_session_update() {
    let harness = Harness::start(remote_settings(), remote_device());
    harness.mock.send(session_created("sess_1"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.mock.outbound.appends(), 0);

    harness.mock.send(session_updated("sess_1"));
    let log = harness.mock.outbound.clone();
    assert!(log.wait_until(WAIT, |l| l.appends() > 0).await);

    let summary = harness.shutdown().await;
    assert_eq!(summary.session_id.as_deref(), Some("sess_1"));
    assert!(summary.frames_sent > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_local_turn_sends_transcript_as_text() {
    let settings = EngineSettings {
        turn_mode: TurnMode::LocalVad,
        segmenter: SegmenterConfig {
            energy_threshold: 500.0,
            silence_duration_secs: 0.2,
            min_speech_duration_secs: 0.1,
            pre_roll_ms: 60,
            ..SegmenterConfig::default()
        },
        ..remote_settings()
    };
    let device = MemoryAudioDevice::new(local_format());
    let mut harness = Harness::start_with(settings, device, |engine| {
        engine.with_transcriber(Arc::new(BlockingTranscriber::new(
            "fixed",
            |samples: &[i16], sample_rate: u32| {
                assert_eq!(sample_rate, LOCAL_SAMPLE_RATE);
                assert!(!samples.is_empty());
                Ok(Transcription::new("hello", Some("en".to_string())))
            },
        )))
    });
    harness.open_session().await;

    harness
        .device
        .push_input(utterance_frames(5, 15, 20, LOCAL_FRAME_SAMPLES));

    let log = harness.mock.outbound.clone();
    assert!(log.wait_until(WAIT, |l| l.response_creates().len() == 1).await);
    assert_eq!(log.user_texts(), vec!["hello".to_string()]);
    assert_eq!(
        log.response_creates()[0],
        Some(vec!["audio".to_string(), "text".to_string()])
    );
    assert_eq!(log.appends(), 0);

    assert!(harness.drain_events().contains(&ConversationEvent::UserTranscript {
        text: "hello".to_string(),
        language: Some("en".to_string()),
    }));

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_local_mode_requires_transcriber() {
    let settings = EngineSettings {
        turn_mode: TurnMode::LocalVad,
        ..remote_settings()
    };
    let harness = Harness::start(settings, MemoryAudioDevice::new(local_format()));
    let result = harness.finish().await;
    assert!(matches!(result, Err(EngineError::InvalidConfiguration(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_mode_rejects_16khz_capture() {
    let harness = Harness::start(remote_settings(), MemoryAudioDevice::new(local_format()));
    let result = harness.finish().await;
    assert!(matches!(result, Err(EngineError::Audio(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connection_loss_is_terminal() {
    let mut harness = Harness::start(remote_settings(), remote_device());
    harness.open_session().await;

    harness.mock.disconnect();
    let result = harness.finish().await;
    assert!(matches!(result, Err(EngineError::ConnectionLost)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_input_end_finishes_session() {
    let device = remote_device();
    device.push_input((0..5).map(|_| silent_frame(REMOTE_FRAME_SAMPLES)));
    device.end_input_when_drained();

    let mut harness = Harness::start(remote_settings(), device);
    let summary = harness.finish_ref().await;
    assert_eq!(summary.end_reason, EndReason::InputEnded);
}

impl Harness {
    async fn finish_ref(&mut self) -> SessionSummary {
        (&mut self.run)
            .await
            .expect("engine task panicked")
            .expect("clean end")
    }
}
