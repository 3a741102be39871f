//! The conversation event loop.
//!
//! One task owns the conversation: it handles server events strictly in
//! arrival order, interrupt requests, and reports from the capture,
//! playback and transcription tasks. It is the only writer of the phase,
//! the active response id and the suppress flag.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::error::{EngineError, EngineResult};
use super::flags::SessionFlags;
use super::interrupt::{InterruptController, InterruptOutcome, InterruptReason, InterruptRequest};
use super::playback::PlaybackHandle;
use super::stats::{EndReason, SessionCounters};
use super::{EngineMessage, EngineSettings};
use crate::core::audio::AudioError;
use crate::core::realtime::openai::ApiError;
use crate::core::realtime::{
    PhaseEvent, ServerEvent, SessionHandle, SessionPhase, TurnMode,
};
use crate::core::tools::ToolDispatcher;

/// Observable conversation activity, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    SessionStarted {
        session_id: String,
    },
    PhaseChanged {
        from: SessionPhase,
        to: SessionPhase,
    },
    UserTranscript {
        text: String,
        language: Option<String>,
    },
    AssistantTextDelta {
        response_id: String,
        delta: String,
    },
    AssistantText {
        response_id: String,
        text: String,
    },
    AssistantTranscriptDelta {
        response_id: String,
        delta: String,
    },
    AssistantTranscript {
        response_id: String,
        transcript: String,
    },
    ToolCalled {
        call_id: String,
        name: String,
        output: Value,
        is_error: bool,
    },
    Interrupted {
        reason: InterruptReason,
    },
    InterruptConfirmed,
    Ended {
        reason: EndReason,
    },
}

/// A tool call whose result has not been acknowledged by the server yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments_json: String,
}

#[derive(Debug, Clone, Copy)]
struct Closing {
    deadline: Instant,
    continuation_sent: bool,
}

pub(crate) struct ConversationLoop {
    settings: EngineSettings,
    session: SessionHandle,
    playback: PlaybackHandle,
    flags: Arc<SessionFlags>,
    counters: Arc<SessionCounters>,
    interrupts: InterruptController,
    dispatcher: Arc<ToolDispatcher>,
    events: broadcast::Sender<ConversationEvent>,

    phase: SessionPhase,
    session_id: Option<String>,
    active_response: Option<String>,
    /// call_id or item_id -> function name, from `response.output_item.added`
    function_names: HashMap<String, String>,
    unacked: HashMap<String, PendingToolCall>,
    continuation_pending: bool,
    closing: Option<Closing>,
}

impl ConversationLoop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        settings: EngineSettings,
        session: SessionHandle,
        playback: PlaybackHandle,
        flags: Arc<SessionFlags>,
        counters: Arc<SessionCounters>,
        dispatcher: Arc<ToolDispatcher>,
        events: broadcast::Sender<ConversationEvent>,
    ) -> Self {
        let interrupts = InterruptController::new(
            flags.clone(),
            settings.suppression_timeout,
            settings.cancel_send_timeout,
        );
        Self {
            settings,
            session,
            playback,
            flags,
            counters,
            interrupts,
            dispatcher,
            events,
            phase: SessionPhase::Connecting,
            session_id: None,
            active_response: None,
            function_names: HashMap::new(),
            unacked: HashMap::new(),
            continuation_pending: false,
            closing: None,
        }
    }

    pub(crate) fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    pub(crate) fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Drive the conversation until it ends.
    pub(crate) async fn run(
        &mut self,
        mut server: mpsc::UnboundedReceiver<ServerEvent>,
        mut control: mpsc::UnboundedReceiver<EngineMessage>,
        mut interrupt_requests: mpsc::Receiver<InterruptRequest>,
        cancel: CancellationToken,
    ) -> EngineResult<EndReason> {
        self.transition(PhaseEvent::Handshake);
        let result = loop {
            let closing_deadline = self.closing.map(|c| c.deadline);
            let suppression_deadline = self.interrupts.deadline();

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break Ok(EndReason::Shutdown),

                _ = sleep_until(closing_deadline) => {
                    info!("Closing grace period over, ending conversation");
                    break Ok(EndReason::ConversationEnded);
                }

                Some(request) = interrupt_requests.recv() => self.on_interrupt(request),

                Some(message) = control.recv() => {
                    if let Some(reason) = self.on_engine_message(message).await {
                        break Ok(reason);
                    }
                }

                event = server.recv() => match event {
                    Some(event) => self.on_server_event(event).await,
                    None if self.closing.is_some() => {
                        debug!("Connection closed during closing grace period");
                        break Ok(EndReason::ConversationEnded);
                    }
                    None => {
                        error!("Realtime connection lost");
                        break Err(EngineError::ConnectionLost);
                    }
                },

                _ = sleep_until(suppression_deadline) => self.on_suppression_timeout(),
            }
        };

        self.flags.set_input_open(false);
        self.transition(PhaseEvent::Disconnected);
        if let Ok(reason) = &result {
            self.emit(ConversationEvent::Ended { reason: *reason });
        }
        result
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn emit(&self, event: ConversationEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn transition(&mut self, event: PhaseEvent) {
        match self.phase.apply(event) {
            Ok(next) if next != self.phase => {
                debug!(from = %self.phase, to = %next, ?event, "Phase change");
                let from = self.phase;
                self.phase = next;
                self.emit(ConversationEvent::PhaseChanged { from, to: next });
            }
            Ok(_) => {}
            Err(e) => debug!("Ignoring event: {}", e),
        }
    }

    fn confirm_cancel(&mut self, via: &str) {
        if let Some(reason) = self.interrupts.confirm() {
            info!(via, %reason, "Interrupt confirmed");
            self.transition(PhaseEvent::CancelConfirmed);
            self.emit(ConversationEvent::InterruptConfirmed);
        }
    }

    fn is_closing(&self) -> bool {
        self.closing.is_some()
    }

    // =========================================================================
    // Interrupts
    // =========================================================================

    fn on_interrupt(&mut self, request: InterruptRequest) {
        let outcome = self.interrupts.begin(
            request,
            self.active_response.as_deref(),
            &self.session,
            &self.playback,
        );
        match outcome {
            InterruptOutcome::Started { .. } => {
                SessionCounters::incr(&self.counters.interrupts);
                self.transition(PhaseEvent::InterruptIssued);
                self.emit(ConversationEvent::Interrupted {
                    reason: request.reason,
                });
            }
            InterruptOutcome::LocalFlushOnly => {
                SessionCounters::incr(&self.counters.interrupts);
                info!(reason = %request.reason, "Interrupted local playback");
                self.emit(ConversationEvent::Interrupted {
                    reason: request.reason,
                });
            }
            InterruptOutcome::AlreadyInterrupting => {
                debug!("Interrupt already in progress");
            }
            InterruptOutcome::Ignored => {
                debug!(reason = %request.reason, "Nothing to interrupt");
            }
            InterruptOutcome::Failed(e) => {
                warn!("Failed to request cancellation: {}", e);
            }
        }
    }

    fn on_suppression_timeout(&mut self) {
        self.interrupts.force_rearm();
        self.transition(PhaseEvent::CancelConfirmed);
        self.emit(ConversationEvent::InterruptConfirmed);
    }

    // =========================================================================
    // Task reports
    // =========================================================================

    async fn on_engine_message(&mut self, message: EngineMessage) -> Option<EndReason> {
        match message {
            EngineMessage::CaptureStopped(None) => {
                debug!("Capture task finished");
                None
            }
            EngineMessage::CaptureStopped(Some(AudioError::EndOfStream)) => {
                info!("Audio input ended");
                Some(EndReason::InputEnded)
            }
            EngineMessage::CaptureStopped(Some(e)) => {
                error!("Capture failed, ending session: {}", e);
                Some(EndReason::CaptureFailed)
            }
            EngineMessage::PlaybackStopped(None) => None,
            EngineMessage::PlaybackStopped(Some(e)) => {
                error!("Playback failed, ending session: {}", e);
                Some(EndReason::PlaybackFailed)
            }
            EngineMessage::LocalSpeechStarted => {
                self.transition(PhaseEvent::SpeechStarted);
                None
            }
            EngineMessage::LocalUtteranceQueued { duration } => {
                debug!(duration_ms = duration.as_millis() as u64, "Utterance queued for transcription");
                self.transition(PhaseEvent::SpeechStopped);
                None
            }
            EngineMessage::LocalUtteranceDiscarded => {
                self.transition(PhaseEvent::TurnAbandoned);
                None
            }
            EngineMessage::Transcribed(transcription) => {
                if transcription.is_blank() {
                    debug!("Empty transcription, turn abandoned");
                    self.transition(PhaseEvent::TurnAbandoned);
                    return None;
                }
                if self.is_closing() {
                    debug!("Ignoring transcription while closing");
                    return None;
                }
                info!(text = %transcription.text, language = ?transcription.language, "User said");
                self.emit(ConversationEvent::UserTranscript {
                    text: transcription.text.clone(),
                    language: transcription.language.clone(),
                });
                if let Err(e) = self.session.send_user_text(&transcription.text).await {
                    warn!("Failed to send transcription: {}", e);
                    return None;
                }
                if let Err(e) = self
                    .session
                    .create_response(Some(&self.settings.response_modalities))
                    .await
                {
                    warn!("Failed to request response: {}", e);
                }
                None
            }
            EngineMessage::TranscriptionFailed(e) => {
                warn!("Transcription failed: {}", e);
                self.transition(PhaseEvent::TurnAbandoned);
                None
            }
        }
    }

    // =========================================================================
    // Server events
    // =========================================================================

    async fn on_server_event(&mut self, event: ServerEvent) {
        trace!(event_type = event.event_type(), "Server event");
        match event {
            ServerEvent::SessionCreated { session } => {
                info!(session_id = %session.id, model = ?session.model, "Session created");
                self.emit(ConversationEvent::SessionStarted {
                    session_id: session.id.clone(),
                });
                self.session_id = Some(session.id);
            }

            ServerEvent::SessionUpdated { .. } => {
                if !self.flags.is_input_open() && !self.is_closing() {
                    info!(turn_mode = %self.settings.turn_mode, "Session configured, listening");
                    self.flags.set_input_open(true);
                }
                self.transition(PhaseEvent::ConfigAcknowledged);
            }

            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                debug!(audio_start_ms, "Speech started");
                // The server cancels its own response on user speech; stop
                // whatever is still audible locally.
                if self.flags.is_ai_speaking() || self.flags.is_playback_active() {
                    if let Some(id) = self.active_response.clone() {
                        self.interrupts.fence(&id);
                    }
                    self.flags.set_ai_speaking(false);
                    self.playback.flush();
                }
                self.transition(PhaseEvent::SpeechStarted);
            }

            ServerEvent::SpeechStopped { audio_end_ms, .. } => {
                debug!(audio_end_ms, "Speech stopped");
                self.transition(PhaseEvent::SpeechStopped);
            }

            ServerEvent::InputAudioBufferCommitted { item_id, .. } => {
                debug!(?item_id, "Input audio committed");
                self.transition(PhaseEvent::SpeechStopped);
            }

            ServerEvent::InputAudioBufferCleared => {}

            ServerEvent::TranscriptionCompleted { transcript, .. } => {
                let text = transcript.trim();
                if !text.is_empty() {
                    info!(text, "User said");
                    self.emit(ConversationEvent::UserTranscript {
                        text: text.to_string(),
                        language: None,
                    });
                }
            }

            ServerEvent::TranscriptionFailed { error, .. } => {
                warn!(message = %error.message, "Input transcription failed");
            }

            ServerEvent::ConversationItemCreated { item, .. } => {
                if item.item_type == "function_call_output"
                    && let Some(call_id) = item.call_id.as_deref()
                    && let Some(call) = self.unacked.remove(call_id)
                {
                    debug!(call_id, name = %call.name, "Function result acknowledged");
                }
            }

            ServerEvent::ResponseCreated { response } => {
                if self.interrupts.is_pending()
                    && self.interrupts.pending_response() != Some(response.id.as_str())
                {
                    // A newer response means the old one is finished server side.
                    self.confirm_cancel("superseded");
                }
                debug!(response_id = %response.id, "Response started");
                self.active_response = Some(response.id);
                self.transition(PhaseEvent::ResponseCreated);
            }

            ServerEvent::ResponseDone { response } => {
                if self.active_response.as_deref() == Some(response.id.as_str()) {
                    self.active_response = None;
                }
                if response.is_cancelled() {
                    debug!(response_id = %response.id, "Response cancelled");
                    self.flags.set_ai_speaking(false);
                    self.confirm_cancel("response.done");
                } else {
                    debug!(response_id = %response.id, status = %response.status, "Response done");
                    self.flags.set_ai_speaking(false);
                    self.transition(PhaseEvent::ResponseDone);
                }
                if self.continuation_pending {
                    self.continuation_pending = false;
                    self.send_continuation().await;
                }
            }

            ServerEvent::ResponseCancelled { response_id } => {
                if let Some(id) = &response_id
                    && self.active_response.as_deref() == Some(id.as_str())
                {
                    self.active_response = None;
                }
                self.flags.set_ai_speaking(false);
                self.confirm_cancel("response.cancelled");
            }

            ServerEvent::OutputItemAdded { item, .. } => {
                if item.item_type == "function_call"
                    && let Some(name) = item.name
                {
                    if let Some(call_id) = item.call_id {
                        self.function_names.insert(call_id, name.clone());
                    }
                    if let Some(item_id) = item.id {
                        self.function_names.insert(item_id, name);
                    }
                }
            }

            ServerEvent::OutputItemDone { .. } => {}

            ServerEvent::TextDelta {
                response_id, delta, ..
            } => {
                if !self.interrupts.is_fenced(&response_id) {
                    self.emit(ConversationEvent::AssistantTextDelta { response_id, delta });
                }
            }

            ServerEvent::TextDone {
                response_id, text, ..
            } => {
                if !self.interrupts.is_fenced(&response_id) {
                    self.emit(ConversationEvent::AssistantText { response_id, text });
                }
            }

            ServerEvent::AudioTranscriptDelta {
                response_id, delta, ..
            } => {
                if !self.interrupts.is_fenced(&response_id) {
                    self.emit(ConversationEvent::AssistantTranscriptDelta { response_id, delta });
                }
            }

            ServerEvent::AudioTranscriptDone {
                response_id,
                transcript,
                ..
            } => {
                if !self.interrupts.is_fenced(&response_id) {
                    info!(response_id = %response_id, transcript = %transcript, "Assistant said");
                    self.emit(ConversationEvent::AssistantTranscript {
                        response_id,
                        transcript,
                    });
                }
            }

            ServerEvent::AudioDelta {
                response_id, delta, ..
            } => self.on_audio_delta(&response_id, &delta),

            ServerEvent::AudioDone { response_id, .. } => {
                if !self.interrupts.should_drop_audio(&response_id) {
                    self.playback.end_of_response();
                }
                self.flags.set_ai_speaking(false);
            }

            ServerEvent::FunctionCallArgumentsDelta { call_id, delta, .. } => {
                trace!(call_id = %call_id, len = delta.len(), "Function arguments delta");
            }

            ServerEvent::FunctionCallArgumentsDone {
                response_id,
                item_id,
                call_id,
                name,
                arguments,
            } => {
                self.on_function_call(&response_id, item_id, call_id, name, arguments)
                    .await;
            }

            ServerEvent::RateLimitsUpdated { rate_limits } => {
                for limit in &rate_limits {
                    trace!(name = %limit.name, remaining = limit.remaining, "Rate limit");
                }
            }

            ServerEvent::Error { error } => self.on_error(error),

            ServerEvent::Unknown => {}
        }
    }

    fn on_audio_delta(&mut self, response_id: &str, delta: &str) {
        SessionCounters::incr(&self.counters.deltas_received);
        if self.interrupts.should_drop_audio(response_id) {
            SessionCounters::incr(&self.counters.deltas_dropped);
            trace!(response_id, "Dropping audio delta");
            return;
        }
        match ServerEvent::decode_audio_delta(delta) {
            Ok(pcm) => {
                self.flags.set_ai_speaking(true);
                self.playback.enqueue(Bytes::from(pcm));
            }
            Err(e) => {
                SessionCounters::incr(&self.counters.deltas_dropped);
                warn!(response_id, "Undecodable audio delta: {}", e);
            }
        }
    }

    fn on_error(&mut self, error: ApiError) {
        if self.interrupts.is_cancel_race(&error) {
            debug!(message = %error.message, "Cancel raced a finished response");
            self.confirm_cancel("error");
            return;
        }
        warn!(
            error_type = %error.error_type,
            code = ?error.code,
            event_id = ?error.event_id,
            "Server error: {}",
            error.message
        );
    }

    // =========================================================================
    // Tool calls
    // =========================================================================

    async fn on_function_call(
        &mut self,
        response_id: &str,
        item_id: Option<String>,
        call_id: String,
        name: Option<String>,
        arguments: String,
    ) {
        if self.interrupts.is_fenced(response_id) {
            debug!(call_id = %call_id, "Skipping function call of cancelled response");
            return;
        }
        if self.is_closing() {
            debug!(call_id = %call_id, "Skipping function call while closing");
            return;
        }

        let name = name
            .filter(|n| !n.is_empty())
            .or_else(|| self.function_names.get(&call_id).cloned())
            .or_else(|| item_id.and_then(|id| self.function_names.get(&id).cloned()))
            .unwrap_or_default();

        let call = PendingToolCall {
            call_id: call_id.clone(),
            name: name.clone(),
            arguments_json: arguments,
        };
        info!(call_id = %call.call_id, name = %call.name, arguments = %call.arguments_json, "Function call");
        SessionCounters::incr(&self.counters.tool_calls);

        let outcome = self.dispatcher.dispatch(&call.name, &call.arguments_json);
        self.emit(ConversationEvent::ToolCalled {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            output: outcome.output.clone(),
            is_error: outcome.is_error,
        });

        if let Err(e) = self
            .session
            .submit_function_result(&call.call_id, &outcome.output_json())
            .await
        {
            warn!(call_id = %call.call_id, "Failed to submit function result: {}", e);
            return;
        }
        self.function_names.remove(&call.call_id);
        self.unacked.insert(call.call_id.clone(), call);

        if outcome.terminates {
            let grace = self.settings.end_conversation_grace;
            info!(grace_ms = grace.as_millis() as u64, "Conversation end requested");
            self.flags.set_input_open(false);
            self.closing = Some(Closing {
                deadline: Instant::now() + grace,
                continuation_sent: false,
            });
        }

        if self.active_response.is_some() {
            self.continuation_pending = true;
        } else {
            self.send_continuation().await;
        }
    }

    /// Ask the server to carry on after tool results.
    async fn send_continuation(&mut self) {
        if let Some(closing) = self.closing.as_mut() {
            // Only the closing utterance, and only inside the grace period.
            if closing.continuation_sent || Instant::now() >= closing.deadline {
                return;
            }
            closing.continuation_sent = true;
        }
        let modalities = match self.settings.turn_mode {
            TurnMode::RemoteVad => None,
            TurnMode::LocalVad => Some(self.settings.response_modalities.as_slice()),
        };
        if let Err(e) = self.session.create_response(modalities).await {
            warn!("Failed to request continuation: {}", e);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
