//! Barge-in: interrupt sources and the cancel/confirm controller.
//!
//! An interruption has a local phase and a confirmation phase. Locally the
//! engine mutes inbound audio, marks the AI silent, empties playback and
//! queues a `response.cancel` without waiting. Audio deltas stay muted until
//! the server confirms the cancel through any of:
//!
//! - `response.cancelled`
//! - `response.done` with status `cancelled`
//! - an `error` echoing the cancel's `event_id`
//! - an `error` saying there was no active response
//! - a newer response starting
//!
//! Deltas of the cancelled response stay fenced after confirmation, so a
//! late or forced re-arm never lets stale audio through.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::flags::SessionFlags;
use super::playback::PlaybackHandle;
use crate::core::realtime::openai::ApiError;
use crate::core::realtime::{RealtimeError, SessionHandle};

/// Cancelled response ids remembered for fencing.
const FENCE_CAPACITY: usize = 8;

/// Error codes the server uses when a cancel finds nothing to cancel.
const CANCEL_RACE_CODES: &[&str] = &["response_cancel_not_active"];

/// Error message fragments meaning the same thing, matched case-insensitively.
const CANCEL_RACE_MESSAGES: &[&str] = &["no active response", "cancellation failed"];

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptReason {
    LocalKeypress,
    LocalVadEnergy,
}

impl std::fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterruptReason::LocalKeypress => f.write_str("local_keypress"),
            InterruptReason::LocalVadEnergy => f.write_str("local_vad_energy"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InterruptRequest {
    pub reason: InterruptReason,
    pub issued_at: Instant,
}

impl InterruptRequest {
    pub fn new(reason: InterruptReason) -> Self {
        Self {
            reason,
            issued_at: Instant::now(),
        }
    }
}

/// Cloneable sender used by interrupt sources.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: mpsc::Sender<InterruptRequest>,
}

impl InterruptHandle {
    pub(crate) fn new(tx: mpsc::Sender<InterruptRequest>) -> Self {
        Self { tx }
    }

    /// Raise an interrupt. Never waits; returns false if the request was
    /// not delivered (engine gone or a burst of requests already queued).
    pub fn request(&self, reason: InterruptReason) -> bool {
        self.tx.try_send(InterruptRequest::new(reason)).is_ok()
    }
}

// =============================================================================
// Sources
// =============================================================================

/// Raise an interrupt for every line read from stdin.
pub fn spawn_keyboard_source(
    handle: InterruptHandle,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(_)) => {
                        debug!("Keypress interrupt");
                        handle.request(InterruptReason::LocalKeypress);
                    }
                    Ok(None) => {
                        debug!("stdin closed, keyboard interrupts disabled");
                        break;
                    }
                    Err(e) => {
                        warn!("stdin read failed: {}", e);
                        break;
                    }
                },
            }
        }
    })
}

/// Consecutive-loud-frames detector used while the AI is speaking.
#[derive(Debug, Clone)]
pub struct BargeInDetector {
    threshold: f32,
    min_frames: u32,
    consecutive: u32,
}

impl BargeInDetector {
    pub fn new(threshold: f32, min_frames: u32) -> Self {
        Self {
            threshold,
            min_frames: min_frames.max(1),
            consecutive: 0,
        }
    }

    /// Feed one frame's RMS. Returns true exactly once per loud run.
    pub fn observe(&mut self, rms: f32) -> bool {
        if rms >= self.threshold {
            self.consecutive += 1;
            self.consecutive == self.min_frames
        } else {
            self.consecutive = 0;
            false
        }
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

// =============================================================================
// Controller
// =============================================================================

#[derive(Debug, Clone)]
struct PendingCancel {
    event_id: String,
    response_id: String,
    reason: InterruptReason,
    deadline: Option<Instant>,
}

/// What [`InterruptController::begin`] did.
#[derive(Debug)]
pub enum InterruptOutcome {
    /// Local phase done, cancel queued
    Started { event_id: String },
    /// A cancel is already outstanding
    AlreadyInterrupting,
    /// No response in flight, only local playback was emptied
    LocalFlushOnly,
    /// Nothing to interrupt
    Ignored,
    /// The cancel could not be queued; suppression was lifted again
    Failed(RealtimeError),
}

/// Owned by the event loop; the only writer of the suppress flag.
#[derive(Debug)]
pub struct InterruptController {
    flags: std::sync::Arc<SessionFlags>,
    pending: Option<PendingCancel>,
    fenced: VecDeque<String>,
    suppression_timeout: Option<Duration>,
    cancel_send_timeout: Duration,
}

impl InterruptController {
    pub fn new(
        flags: std::sync::Arc<SessionFlags>,
        suppression_timeout: Option<Duration>,
        cancel_send_timeout: Duration,
    ) -> Self {
        Self {
            flags,
            pending: None,
            fenced: VecDeque::with_capacity(FENCE_CAPACITY),
            suppression_timeout,
            cancel_send_timeout,
        }
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_response(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.response_id.as_str())
    }

    /// Run the local phase and queue the cancel.
    pub fn begin(
        &mut self,
        request: InterruptRequest,
        active_response: Option<&str>,
        session: &SessionHandle,
        playback: &PlaybackHandle,
    ) -> InterruptOutcome {
        if self.pending.is_some() {
            return InterruptOutcome::AlreadyInterrupting;
        }

        let Some(response_id) = active_response else {
            if self.flags.is_playback_active() {
                playback.flush();
                return InterruptOutcome::LocalFlushOnly;
            }
            return InterruptOutcome::Ignored;
        };

        // Mute first: any delta handled after this point is dropped.
        self.flags.suppress();
        self.flags.set_ai_speaking(false);
        playback.flush();
        self.fence(response_id);

        let event_id = match session.cancel_response(Some(response_id), self.cancel_send_timeout) {
            Ok(id) => id,
            Err(e) => {
                self.flags.release_suppression();
                return InterruptOutcome::Failed(e);
            }
        };

        info!(
            response_id,
            event_id = %event_id,
            reason = %request.reason,
            latency_us = request.issued_at.elapsed().as_micros() as u64,
            "Interrupt issued"
        );

        self.pending = Some(PendingCancel {
            event_id: event_id.clone(),
            response_id: response_id.to_string(),
            reason: request.reason,
            deadline: self.suppression_timeout.map(|t| Instant::now() + t),
        });
        InterruptOutcome::Started { event_id }
    }

    /// Remember a response whose remaining audio must never play.
    pub fn fence(&mut self, response_id: &str) {
        if self.fenced.iter().any(|id| id == response_id) {
            return;
        }
        if self.fenced.len() == FENCE_CAPACITY {
            self.fenced.pop_front();
        }
        self.fenced.push_back(response_id.to_string());
    }

    #[inline]
    pub fn is_fenced(&self, response_id: &str) -> bool {
        self.fenced.iter().any(|id| id == response_id)
    }

    /// Whether an audio delta of `response_id` must be dropped.
    #[inline]
    pub fn should_drop_audio(&self, response_id: &str) -> bool {
        self.flags.is_suppressed() || self.is_fenced(response_id)
    }

    /// An error that means the outstanding cancel is resolved.
    pub fn is_cancel_race(&self, error: &ApiError) -> bool {
        if let (Some(pending), Some(event_id)) = (&self.pending, &error.event_id)
            && pending.event_id == *event_id
        {
            return true;
        }
        if error
            .code
            .as_deref()
            .is_some_and(|c| CANCEL_RACE_CODES.contains(&c))
        {
            return true;
        }
        let message = error.message.to_lowercase();
        CANCEL_RACE_MESSAGES.iter().any(|m| message.contains(m))
    }

    /// Clear suppression. Returns the reason of the interrupt that was
    /// outstanding, if any.
    pub fn confirm(&mut self) -> Option<InterruptReason> {
        self.flags.release_suppression();
        self.pending.take().map(|p| {
            debug!(response_id = %p.response_id, "Cancel confirmed");
            p.reason
        })
    }

    /// Deadline of the outstanding cancel, if it has one.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().and_then(|p| p.deadline)
    }

    /// Give up waiting for the server and unmute. The cancelled response
    /// stays fenced.
    pub fn force_rearm(&mut self) {
        if let Some(p) = self.pending.take() {
            warn!(
                response_id = %p.response_id,
                event_id = %p.event_id,
                "No cancel confirmation received, re-arming playback"
            );
        }
        self.flags.release_suppression();
    }
}

// =============================================================================
// Tests
// =============================================================================
