//! Per-frame capture conditioning: noise gate, then gain.

use bytes::{Bytes, BytesMut};

use super::frame::rms_energy;

/// Optional noise gate and gain applied to captured PCM16 frames.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CapturePreprocessor {
    /// Frames with RMS below this are replaced by silence
    pub noise_gate: Option<f32>,
    /// Linear gain, clamped to the i16 range
    pub gain: Option<f32>,
}

impl CapturePreprocessor {
    pub fn new(noise_gate: Option<f32>, gain: Option<f32>) -> Self {
        Self { noise_gate, gain }
    }

    #[inline]
    pub fn is_passthrough(&self) -> bool {
        self.noise_gate.is_none() && self.gain.is_none_or(|g| g == 1.0)
    }

    pub fn apply(&self, pcm: Bytes) -> Bytes {
        if self.is_passthrough() {
            return pcm;
        }

        if let Some(gate) = self.noise_gate
            && rms_energy(&pcm) < gate
        {
            return Bytes::from(vec![0u8; pcm.len()]);
        }

        match self.gain {
            Some(gain) if gain != 1.0 => {
                let mut out = BytesMut::with_capacity(pcm.len());
                for pair in pcm.chunks_exact(2) {
                    let sample = i16::from_le_bytes([pair[0], pair[1]]) as f32 * gain;
                    let clamped = sample.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                    out.extend_from_slice(&clamped.to_le_bytes());
                }
                out.freeze()
            }
            _ => pcm,
        }
    }
}
