//! Cross-task session state.
//!
//! Each flag has exactly one writer task and every transition is a single
//! atomic store or swap:
//!
//! | flag              | writer          |
//! |-------------------|-----------------|
//! | `suppress_inbound`| event loop      |
//! | `ai_speaking`     | event loop      |
//! | `input_open`      | event loop      |
//! | `playback_epoch`  | event loop      |
//! | `playback_active` | playback thread |

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SessionFlags {
    suppress_inbound: AtomicBool,
    ai_speaking: AtomicBool,
    playback_active: AtomicBool,
    input_open: AtomicBool,
    playback_epoch: AtomicU64,
    full_duplex: bool,
}

impl SessionFlags {
    pub fn new(full_duplex: bool) -> Self {
        Self {
            full_duplex,
            ..Default::default()
        }
    }

    /// Start dropping inbound audio. Returns the previous value.
    #[inline]
    pub fn suppress(&self) -> bool {
        self.suppress_inbound.swap(true, Ordering::AcqRel)
    }

    /// Stop dropping inbound audio. Returns the previous value.
    #[inline]
    pub fn release_suppression(&self) -> bool {
        self.suppress_inbound.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_suppressed(&self) -> bool {
        self.suppress_inbound.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_ai_speaking(&self, speaking: bool) {
        self.ai_speaking.store(speaking, Ordering::Release);
    }

    #[inline]
    pub fn is_ai_speaking(&self) -> bool {
        self.ai_speaking.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_playback_active(&self, active: bool) {
        self.playback_active.store(active, Ordering::Release);
    }

    #[inline]
    pub fn is_playback_active(&self) -> bool {
        self.playback_active.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_input_open(&self, open: bool) {
        self.input_open.store(open, Ordering::Release);
    }

    #[inline]
    pub fn is_input_open(&self) -> bool {
        self.input_open.load(Ordering::Acquire)
    }

    /// Captured audio must not leave the client right now.
    #[inline]
    pub fn echo_gate_closed(&self) -> bool {
        !self.full_duplex && (self.is_ai_speaking() || self.is_playback_active())
    }

    /// Invalidate everything queued for playback. Returns the new epoch.
    #[inline]
    pub fn bump_playback_epoch(&self) -> u64 {
        self.playback_epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    pub fn playback_epoch(&self) -> u64 {
        self.playback_epoch.load(Ordering::Acquire)
    }
}
