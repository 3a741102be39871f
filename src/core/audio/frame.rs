//! PCM16 audio frames and helpers.
//!
//! All audio handled by the engine is 16-bit signed little-endian mono.
//! Frames own their bytes and are moved between tasks, never aliased.

use bytes::{Bytes, BytesMut};
use std::time::Duration;

/// Which way a frame is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    /// Microphone to network/segmenter
    Capture,
    /// Network to speaker
    Playback,
}

impl std::fmt::Display for FrameDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameDirection::Capture => write!(f, "capture"),
            FrameDirection::Playback => write!(f, "playback"),
        }
    }
}

/// A fixed-length PCM16 mono buffer tagged with a sequence number.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    seq: u64,
    direction: FrameDirection,
    sample_rate: u32,
    data: Bytes,
}

impl AudioFrame {
    pub fn new(seq: u64, direction: FrameDirection, sample_rate: u32, data: impl Into<Bytes>) -> Self {
        Self {
            seq,
            direction,
            sample_rate,
            data: data.into(),
        }
    }

    /// Build a capture frame from samples.
    pub fn from_samples(seq: u64, direction: FrameDirection, sample_rate: u32, samples: &[i16]) -> Self {
        Self::new(seq, direction, sample_rate, samples_to_pcm(samples))
    }

    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[inline]
    pub fn direction(&self) -> FrameDirection {
        self.direction
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Playing time of this frame at its sample rate.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.sample_count() as f64 / self.sample_rate as f64)
    }

    /// Root-mean-square energy on the raw i16 scale.
    pub fn rms(&self) -> f32 {
        rms_energy(&self.data)
    }

    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }
}

/// Root-mean-square energy of PCM16 little-endian bytes.
///
/// Computed on the raw sample scale (0..=32768), so thresholds such as
/// `300.0` compare directly against typical microphone levels.
pub fn rms_energy(pcm: &[u8]) -> f32 {
    if pcm.len() < 2 {
        return 0.0;
    }

    let mut sum_squares = 0.0f64;
    let mut count = 0usize;
    for chunk in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]) as f64;
        sum_squares += sample * sample;
        count += 1;
    }

    (sum_squares / count as f64).sqrt() as f32
}

pub fn samples_to_pcm(samples: &[i16]) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out.freeze()
}

pub fn pcm_to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Monotonic sequence source for one direction of audio.
#[derive(Debug, Default)]
pub struct FrameSequencer {
    next: u64,
}

impl FrameSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next;
        self.next += 1;
        seq
    }
}

/// Splits variable-length PCM into fixed-size frames.
///
/// Server audio deltas arrive in arbitrary lengths; the output device
/// expects whole frames. Leftover bytes wait for the next push.
#[derive(Debug)]
pub struct FrameChunker {
    frame_bytes: usize,
    pending: BytesMut,
}

impl FrameChunker {
    pub fn new(frame_samples: usize) -> Self {
        let frame_bytes = frame_samples.max(1) * 2;
        Self {
            frame_bytes,
            pending: BytesMut::with_capacity(frame_bytes * 2),
        }
    }

    /// Append bytes and drain every complete frame.
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(data);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_bytes {
            frames.push(self.pending.split_to(self.frame_bytes).freeze());
        }
        frames
    }

    /// Flush the partial tail, padded with silence.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            return None;
        }
        self.pending.resize(self.frame_bytes, 0);
        Some(self.pending.split().freeze())
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }
}
