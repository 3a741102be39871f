use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Live counters shared by the engine tasks.
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub frames_captured: AtomicU64,
    pub frames_sent: AtomicU64,
    /// Captured frames discarded by the echo gate, closed input or a slow socket
    pub frames_dropped: AtomicU64,
    pub deltas_received: AtomicU64,
    /// Audio deltas hidden by an interruption
    pub deltas_dropped: AtomicU64,
    pub playback_frames: AtomicU64,
    pub interrupts: AtomicU64,
    pub tool_calls: AtomicU64,
}

impl SessionCounters {
    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Why a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The assistant called the terminating tool
    ConversationEnded,
    /// Shutdown was requested by the caller
    Shutdown,
    /// The audio input has no more frames
    InputEnded,
    CaptureFailed,
    PlaybackFailed,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndReason::ConversationEnded => "conversation_ended",
            EndReason::Shutdown => "shutdown",
            EndReason::InputEnded => "input_ended",
            EndReason::CaptureFailed => "capture_failed",
            EndReason::PlaybackFailed => "playback_failed",
        };
        f.write_str(s)
    }
}

/// Returned by [`DuplexEngine::run`](super::DuplexEngine::run).
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Option<String>,
    pub end_reason: EndReason,
    pub duration: Duration,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub deltas_played: u64,
    pub deltas_dropped: u64,
    pub playback_frames: u64,
    pub interrupts: u64,
    pub tool_calls: u64,
}

impl SessionSummary {
    pub(crate) fn from_counters(
        session_id: Option<String>,
        end_reason: EndReason,
        duration: Duration,
        counters: &SessionCounters,
    ) -> Self {
        let received = SessionCounters::get(&counters.deltas_received);
        let dropped = SessionCounters::get(&counters.deltas_dropped);
        Self {
            session_id,
            end_reason,
            duration,
            frames_sent: SessionCounters::get(&counters.frames_sent),
            frames_dropped: SessionCounters::get(&counters.frames_dropped),
            deltas_played: received.saturating_sub(dropped),
            deltas_dropped: dropped,
            playback_frames: SessionCounters::get(&counters.playback_frames),
            interrupts: SessionCounters::get(&counters.interrupts),
            tool_calls: SessionCounters::get(&counters.tool_calls),
        }
    }
}
