//! Duplex session engine.
//!
//! [`DuplexEngine`] runs one conversation over a [`ProtocolSession`]:
//!
//! - a capture reader and router move microphone frames to the server
//!   (RemoteVad) or to the local segmenter and transcriber (LocalVad)
//! - a playback thread owns the speaker and re-chunks response audio
//! - the conversation loop handles server events in order, tool calls
//!   and interruptions
//!
//! Tasks share a handful of atomic flags ([`SessionFlags`]) and report
//! failures back to the conversation loop, which ends the session for
//! every task at once.
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = DuplexEngine::new(EngineSettings::default(), device, ToolDispatcher::standard()?);
//! let interrupts = engine.interrupt_handle();
//! let summary = engine.connect_and_run(realtime_config).await?;
//! println!("ended: {}", summary.end_reason);
//! ```

mod capture;
mod conversation;
mod error;
mod flags;
mod interrupt;
mod playback;
mod stats;

pub use conversation::{ConversationEvent, PendingToolCall};
pub use error::{EngineError, EngineResult};
pub use flags::SessionFlags;
pub use interrupt::{
    BargeInDetector, InterruptHandle, InterruptReason, InterruptRequest, spawn_keyboard_source,
};
pub use playback::{PlaybackCommand, PlaybackHandle};
pub use stats::{EndReason, SessionCounters, SessionSummary};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::audio::{AudioDevice, AudioError, CapturePreprocessor};
use crate::core::realtime::{
    Modality, OPENAI_REALTIME_SAMPLE_RATE, ProtocolSession, RealtimeConfig, TurnMode,
};
use crate::core::stt::{TranscribeError, Transcriber, Transcription};
use crate::core::tools::ToolDispatcher;
use crate::core::vad::{SegmenterConfig, UtteranceSegmenter};

use capture::{CaptureRoute, CaptureRouter, spawn_capture_reader, spawn_transcription_worker};
use conversation::ConversationLoop;
use playback::spawn_playback;

/// Queued interrupt requests; more than this are redundant anyway.
const INTERRUPT_QUEUE: usize = 8;

/// Utterances waiting for the transcriber.
const UTTERANCE_QUEUE: usize = 4;

const EVENT_FEED_CAPACITY: usize = 256;

/// How long teardown waits for each task.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Reports from engine tasks to the conversation loop.
#[derive(Debug)]
pub(crate) enum EngineMessage {
    /// `None` when the reader stopped because the session is ending
    CaptureStopped(Option<AudioError>),
    PlaybackStopped(Option<AudioError>),
    LocalSpeechStarted,
    LocalUtteranceQueued { duration: Duration },
    LocalUtteranceDiscarded,
    Transcribed(Transcription),
    TranscriptionFailed(TranscribeError),
}

/// Energy barge-in thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BargeInSettings {
    /// RMS a captured frame must reach
    pub threshold: f32,
    /// Consecutive loud frames that raise an interrupt
    pub min_frames: u32,
}

impl Default for BargeInSettings {
    fn default() -> Self {
        Self {
            threshold: 2000.0,
            min_frames: 3,
        }
    }
}

/// Engine tuning, usually built from [`ClientConfig`](crate::config::ClientConfig).
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub turn_mode: TurnMode,
    /// LocalVad only; rate and frame size are taken from the device
    pub segmenter: SegmenterConfig,
    pub preprocess: CapturePreprocessor,
    /// Keep sending captured audio while the AI speaks
    pub full_duplex: bool,
    pub energy_barge_in: Option<BargeInSettings>,
    /// Forced re-arm when a cancel is never confirmed; `None` waits forever
    pub suppression_timeout: Option<Duration>,
    pub cancel_send_timeout: Duration,
    pub end_conversation_grace: Duration,
    pub frame_send_timeout: Duration,
    /// Captured frames buffered between the device reader and the router
    pub capture_queue_frames: usize,
    /// Modalities requested for responses to local transcripts
    pub response_modalities: Vec<Modality>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            turn_mode: TurnMode::RemoteVad,
            segmenter: SegmenterConfig::default(),
            preprocess: CapturePreprocessor::default(),
            full_duplex: false,
            energy_barge_in: None,
            suppression_timeout: Some(Duration::from_millis(3000)),
            cancel_send_timeout: Duration::from_millis(500),
            end_conversation_grace: Duration::from_millis(2000),
            frame_send_timeout: Duration::from_millis(50),
            capture_queue_frames: 32,
            response_modalities: vec![Modality::Audio, Modality::Text],
        }
    }
}

/// One full-duplex voice conversation.
pub struct DuplexEngine {
    settings: EngineSettings,
    device: Arc<dyn AudioDevice>,
    dispatcher: Arc<ToolDispatcher>,
    transcriber: Option<Arc<dyn Transcriber>>,
    flags: Arc<SessionFlags>,
    counters: Arc<SessionCounters>,
    events: broadcast::Sender<ConversationEvent>,
    interrupt_tx: mpsc::Sender<InterruptRequest>,
    interrupt_rx: mpsc::Receiver<InterruptRequest>,
    shutdown: CancellationToken,
}

impl DuplexEngine {
    pub fn new(
        settings: EngineSettings,
        device: Arc<dyn AudioDevice>,
        dispatcher: ToolDispatcher,
    ) -> Self {
        let (interrupt_tx, interrupt_rx) = mpsc::channel(INTERRUPT_QUEUE);
        let (events, _) = broadcast::channel(EVENT_FEED_CAPACITY);
        Self {
            flags: Arc::new(SessionFlags::new(settings.full_duplex)),
            settings,
            device,
            dispatcher: Arc::new(dispatcher),
            transcriber: None,
            counters: Arc::new(SessionCounters::default()),
            events,
            interrupt_tx,
            interrupt_rx,
            shutdown: CancellationToken::new(),
        }
    }

    /// Transcriber for LocalVad turns.
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle::new(self.interrupt_tx.clone())
    }

    /// Cancelling this token ends the session with [`EndReason::Shutdown`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    pub fn flags(&self) -> Arc<SessionFlags> {
        self.flags.clone()
    }

    pub fn counters(&self) -> Arc<SessionCounters> {
        self.counters.clone()
    }

    /// Align a realtime configuration with this engine: same turn mode,
    /// tool schemas from the dispatcher.
    pub fn realtime_config(&self, mut config: RealtimeConfig) -> RealtimeConfig {
        config.turn_mode = self.settings.turn_mode;
        config.tools = self.dispatcher.definitions();
        config
    }

    fn validate(&self) -> EngineResult<()> {
        let format = self.device.format();
        if self.settings.turn_mode == TurnMode::RemoteVad
            && format.input_sample_rate != OPENAI_REALTIME_SAMPLE_RATE
        {
            return Err(AudioError::FormatMismatch(format!(
                "remote turn detection needs {}Hz capture, device captures at {}Hz",
                OPENAI_REALTIME_SAMPLE_RATE, format.input_sample_rate
            ))
            .into());
        }
        if format.output_sample_rate != OPENAI_REALTIME_SAMPLE_RATE {
            return Err(AudioError::FormatMismatch(format!(
                "response audio is {}Hz, device plays at {}Hz",
                OPENAI_REALTIME_SAMPLE_RATE, format.output_sample_rate
            ))
            .into());
        }
        if self.settings.turn_mode == TurnMode::LocalVad {
            if self.transcriber.is_none() {
                return Err(EngineError::InvalidConfiguration(
                    "local turn detection needs a transcriber".to_string(),
                ));
            }
            self.segmenter_config()
                .validate()
                .map_err(|e| EngineError::InvalidConfiguration(e.to_string()))?;
        }
        if self.settings.response_modalities.is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "response modalities must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn segmenter_config(&self) -> SegmenterConfig {
        let format = self.device.format();
        SegmenterConfig {
            sample_rate: format.input_sample_rate,
            frame_samples: format.frame_samples,
            ..self.settings.segmenter
        }
    }

    /// Connect to the realtime service and run the conversation.
    pub async fn connect_and_run(self, config: RealtimeConfig) -> EngineResult<SessionSummary> {
        self.validate()?;
        let config = self.realtime_config(config);
        let session = ProtocolSession::connect(&config).await?;
        self.run(session).await
    }

    /// Run the conversation over an established session until it ends.
    ///
    /// Returns `Err(ConnectionLost)` if the transport drops mid-conversation;
    /// the caller decides whether to start over.
    pub async fn run(self, session: ProtocolSession) -> EngineResult<SessionSummary> {
        self.validate()?;
        let segmenter_config = self.segmenter_config();
        let DuplexEngine {
            settings,
            device,
            dispatcher,
            transcriber,
            flags,
            counters,
            events,
            interrupt_tx,
            interrupt_rx,
            shutdown,
        } = self;

        let started = std::time::Instant::now();
        let format = device.format();
        let (handle, server_events) = session.split();
        let tasks = shutdown.child_token();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let mut workers = Vec::new();

        let (playback, playback_task) =
            spawn_playback(device.clone(), flags.clone(), counters.clone(), report_tx.clone());
        workers.push(playback_task);

        let route = match (settings.turn_mode, transcriber) {
            (TurnMode::LocalVad, Some(transcriber)) => {
                let (utterance_tx, utterance_rx) = mpsc::channel(UTTERANCE_QUEUE);
                workers.push(spawn_transcription_worker(
                    transcriber,
                    utterance_rx,
                    tasks.clone(),
                    report_tx.clone(),
                ));
                CaptureRoute::Local {
                    segmenter: UtteranceSegmenter::new(segmenter_config),
                    utterances: utterance_tx,
                }
            }
            _ => CaptureRoute::Remote {
                session: handle.clone(),
                send_timeout: settings.frame_send_timeout,
            },
        };

        let router = CaptureRouter::new(
            route,
            flags.clone(),
            counters.clone(),
            settings.preprocess,
            settings
                .energy_barge_in
                .map(|b| BargeInDetector::new(b.threshold, b.min_frames)),
            InterruptHandle::new(interrupt_tx),
            report_tx.clone(),
            format.input_sample_rate,
        );
        let (frames_tx, frames_rx) = mpsc::channel(settings.capture_queue_frames.max(1));
        workers.push(tokio::spawn(router.run(frames_rx, tasks.clone())));
        workers.push(spawn_capture_reader(
            device.clone(),
            frames_tx,
            counters.clone(),
            tasks.clone(),
            report_tx,
        ));

        info!(
            device = device.name(),
            turn_mode = %settings.turn_mode,
            full_duplex = settings.full_duplex,
            tools = dispatcher.len(),
            "Duplex engine running"
        );

        let mut conversation = ConversationLoop::new(
            settings,
            handle.clone(),
            playback.clone(),
            flags.clone(),
            counters.clone(),
            dispatcher,
            events,
        );
        let result = conversation
            .run(server_events, report_rx, interrupt_rx, shutdown)
            .await;
        let session_id = conversation.session_id();
        debug!(phase = %conversation.phase(), "Conversation loop stopped");

        // Teardown: every task observes the same cancellation.
        tasks.cancel();
        playback.flush();
        drop(conversation);
        drop(playback);
        handle.close();
        for worker in workers {
            if tokio::time::timeout(TASK_JOIN_TIMEOUT, worker).await.is_err() {
                debug!("Engine task did not stop in time, detaching");
            }
        }

        let end_reason = result?;
        let summary = SessionSummary::from_counters(session_id, end_reason, started.elapsed(), &counters);
        info!(
            session_id = ?summary.session_id,
            end_reason = %summary.end_reason,
            frames_sent = summary.frames_sent,
            deltas_played = summary.deltas_played,
            deltas_dropped = summary.deltas_dropped,
            interrupts = summary.interrupts,
            tool_calls = summary.tool_calls,
            "Session ended"
        );
        Ok(summary)
    }
}

impl std::fmt::Debug for DuplexEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexEngine")
            .field("settings", &self.settings)
            .field("device", &self.device.name())
            .field("dispatcher", &self.dispatcher)
            .field("transcriber", &self.transcriber.as_ref().map(|t| t.name().to_string()))
            .finish()
    }
}
