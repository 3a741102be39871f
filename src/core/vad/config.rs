//! Segmenter configuration types

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the energy-based utterance segmenter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// RMS energy (raw i16 scale) above which a frame counts as speech
    pub energy_threshold: f32,

    /// Trailing silence that closes an utterance (seconds)
    pub silence_duration_secs: f32,

    /// Utterances with less speech than this are discarded as noise (seconds)
    pub min_speech_duration_secs: f32,

    /// Background audio kept ahead of speech start (ms)
    pub pre_roll_ms: u32,

    /// Sample rate of incoming frames (Hz)
    pub sample_rate: u32,

    /// Frame size in samples
    pub frame_samples: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 300.0,
            silence_duration_secs: 1.0,
            min_speech_duration_secs: 0.3,
            pre_roll_ms: 300,
            sample_rate: 16000,
            frame_samples: 1024, // 64ms at 16kHz
        }
    }
}

impl SegmenterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duration of one frame
    pub fn frame_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_samples as f64 / self.sample_rate as f64)
    }

    pub fn silence_duration(&self) -> Duration {
        secs_to_duration(self.silence_duration_secs)
    }

    pub fn min_speech_duration(&self) -> Duration {
        secs_to_duration(self.min_speech_duration_secs)
    }

    /// Number of background frames retained as pre-roll
    pub fn pre_roll_frames(&self) -> usize {
        let frame_ms = self.frame_duration().as_secs_f64() * 1000.0;
        if frame_ms <= 0.0 {
            return 0;
        }
        (self.pre_roll_ms as f64 / frame_ms).ceil() as usize
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.energy_threshold.is_finite() || self.energy_threshold <= 0.0 {
            anyhow::bail!("energy_threshold must be a positive number");
        }
        if !self.silence_duration_secs.is_finite() || self.silence_duration_secs <= 0.0 {
            anyhow::bail!("silence_duration_secs must be greater than 0");
        }
        if !self.min_speech_duration_secs.is_finite() || self.min_speech_duration_secs < 0.0 {
            anyhow::bail!("min_speech_duration_secs must not be negative");
        }
        if self.sample_rate == 0 {
            anyhow::bail!("sample_rate must be greater than 0");
        }
        if self.frame_samples == 0 {
            anyhow::bail!("frame_samples must be greater than 0");
        }
        Ok(())
    }
}

/// Negative and NaN become zero, values too large for a `Duration` saturate.
fn secs_to_duration(secs: f32) -> Duration {
    Duration::try_from_secs_f32(secs.max(0.0)).unwrap_or(Duration::MAX)
}
