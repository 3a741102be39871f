//! Microphone side: a blocking reader feeding an async router.
//!
//! The reader only pulls frames off the device and hands them over without
//! waiting; when the router falls behind, frames are dropped at the reader.
//! The router decides per frame where the audio goes:
//!
//! 1. input not yet open (session unconfigured) -> discarded
//! 2. AI speaking and no full duplex -> discarded after the barge-in check
//! 3. RemoteVad -> one `input_audio_buffer.append`, bounded by a send timeout
//! 4. LocalVad -> the utterance segmenter

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::EngineMessage;
use super::flags::SessionFlags;
use super::interrupt::{BargeInDetector, InterruptHandle, InterruptReason};
use super::stats::SessionCounters;
use crate::core::audio::{
    AudioDevice, AudioFrame, AudioResult, CapturePreprocessor, FrameDirection, FrameSequencer,
    rms_energy,
};
use crate::core::realtime::{RealtimeError, SessionHandle};
use crate::core::stt::Transcriber;
use crate::core::vad::{SegmenterEvent, Utterance, UtteranceSegmenter};

// =============================================================================
// Reader
// =============================================================================

/// Start the blocking device reader. It stops between frames once `cancel`
/// fires or the router is gone.
pub(crate) fn spawn_capture_reader(
    device: Arc<dyn AudioDevice>,
    frames: mpsc::Sender<Bytes>,
    counters: Arc<SessionCounters>,
    cancel: CancellationToken,
    report: mpsc::UnboundedSender<EngineMessage>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let result = run_reader(device.as_ref(), &frames, &counters, &cancel);
        if let Err(e) = &result {
            if cancel.is_cancelled() {
                debug!("Capture stopped during shutdown: {}", e);
                return;
            }
            error!("Capture stopped: {}", e);
        }
        let _ = report.send(EngineMessage::CaptureStopped(result.err()));
    })
}

fn run_reader(
    device: &dyn AudioDevice,
    frames: &mpsc::Sender<Bytes>,
    counters: &SessionCounters,
    cancel: &CancellationToken,
) -> AudioResult<()> {
    let mut input = device.open_input()?;
    debug!(device = device.name(), "Capture started");

    while !cancel.is_cancelled() {
        let pcm = input.read_frame()?;
        SessionCounters::incr(&counters.frames_captured);
        match frames.try_send(Bytes::from(pcm)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                SessionCounters::incr(&counters.frames_dropped);
                trace!("Capture queue full, dropping frame");
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }

    debug!("Capture finished");
    Ok(())
}

// =============================================================================
// Router
// =============================================================================

pub(crate) enum CaptureRoute {
    Remote {
        session: SessionHandle,
        send_timeout: Duration,
    },
    Local {
        segmenter: UtteranceSegmenter,
        utterances: mpsc::Sender<Utterance>,
    },
}

pub(crate) struct CaptureRouter {
    route: CaptureRoute,
    flags: Arc<SessionFlags>,
    counters: Arc<SessionCounters>,
    preprocessor: CapturePreprocessor,
    barge_in: Option<BargeInDetector>,
    interrupts: InterruptHandle,
    report: mpsc::UnboundedSender<EngineMessage>,
    sequencer: FrameSequencer,
    sample_rate: u32,
    gated: bool,
}

impl CaptureRouter {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        route: CaptureRoute,
        flags: Arc<SessionFlags>,
        counters: Arc<SessionCounters>,
        preprocessor: CapturePreprocessor,
        barge_in: Option<BargeInDetector>,
        interrupts: InterruptHandle,
        report: mpsc::UnboundedSender<EngineMessage>,
        sample_rate: u32,
    ) -> Self {
        Self {
            route,
            flags,
            counters,
            preprocessor,
            barge_in,
            interrupts,
            report,
            sequencer: FrameSequencer::new(),
            sample_rate,
            gated: false,
        }
    }

    pub(crate) async fn run(mut self, mut frames: mpsc::Receiver<Bytes>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(pcm) => self.route_frame(pcm).await,
                    None => break,
                },
            }
        }
        debug!("Capture router stopped");
    }

    async fn route_frame(&mut self, pcm: Bytes) {
        let pcm = self.preprocessor.apply(pcm);

        if !self.flags.is_input_open() {
            SessionCounters::incr(&self.counters.frames_dropped);
            return;
        }

        let ai_audible = self.flags.is_ai_speaking() || self.flags.is_playback_active();
        if let Some(detector) = self.barge_in.as_mut() {
            if ai_audible {
                if detector.observe(rms_energy(&pcm)) {
                    info!("Energy barge-in detected");
                    self.interrupts.request(InterruptReason::LocalVadEnergy);
                }
            } else {
                detector.reset();
            }
        }

        if self.flags.echo_gate_closed() {
            if !self.gated {
                self.gated = true;
                if let CaptureRoute::Local { segmenter, .. } = &mut self.route {
                    segmenter.reset();
                }
                trace!("Echo gate closed");
            }
            SessionCounters::incr(&self.counters.frames_dropped);
            return;
        }
        self.gated = false;

        match &mut self.route {
            CaptureRoute::Remote {
                session,
                send_timeout,
            } => match session.send_audio_within(&pcm, *send_timeout).await {
                Ok(()) => SessionCounters::incr(&self.counters.frames_sent),
                Err(RealtimeError::Timeout(_)) => {
                    SessionCounters::incr(&self.counters.frames_dropped);
                    debug!("Socket congested, dropping captured frame");
                }
                Err(RealtimeError::SessionClosed) => {
                    SessionCounters::incr(&self.counters.frames_dropped);
                    trace!("Session closed, dropping captured frame");
                }
                Err(e) => {
                    SessionCounters::incr(&self.counters.frames_dropped);
                    warn!("Failed to send audio: {}", e);
                }
            },
            CaptureRoute::Local {
                segmenter,
                utterances,
            } => {
                let frame = AudioFrame::new(
                    self.sequencer.next_seq(),
                    FrameDirection::Capture,
                    self.sample_rate,
                    pcm,
                );
                let message = match segmenter.push_frame(frame) {
                    None => return,
                    Some(SegmenterEvent::SpeechStarted) => EngineMessage::LocalSpeechStarted,
                    Some(SegmenterEvent::NoiseDiscarded { buffered }) => {
                        debug!(buffered_ms = buffered.as_millis() as u64, "Utterance too short, discarded");
                        EngineMessage::LocalUtteranceDiscarded
                    }
                    Some(SegmenterEvent::UtteranceReady(utterance)) => {
                        let duration = utterance.duration();
                        match utterances.try_send(utterance) {
                            Ok(()) => EngineMessage::LocalUtteranceQueued { duration },
                            Err(_) => {
                                warn!("Transcriber busy, dropping utterance");
                                EngineMessage::LocalUtteranceDiscarded
                            }
                        }
                    }
                };
                let _ = self.report.send(message);
            }
        }
    }
}

// =============================================================================
// Transcription worker
// =============================================================================

/// Transcribe utterances one at a time, in capture order.
pub(crate) fn spawn_transcription_worker(
    transcriber: Arc<dyn Transcriber>,
    mut utterances: mpsc::Receiver<Utterance>,
    cancel: CancellationToken,
    report: mpsc::UnboundedSender<EngineMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let utterance = tokio::select! {
                _ = cancel.cancelled() => break,
                next = utterances.recv() => match next {
                    Some(u) => u,
                    None => break,
                },
            };

            let samples = utterance.samples();
            debug!(
                transcriber = transcriber.name(),
                duration_ms = utterance.duration().as_millis() as u64,
                "Transcribing utterance"
            );
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                result = transcriber.transcribe(&samples, utterance.sample_rate()) => match result {
                    Ok(transcription) => EngineMessage::Transcribed(transcription),
                    Err(e) => EngineMessage::TranscriptionFailed(e),
                },
            };
            if report.send(message).is_err() {
                break;
            }
        }
    })
}
