//! Audio device abstraction.
//!
//! The engine talks to hardware through two blocking halves:
//!
//! - [`AudioInput::read_frame`] returns one fixed-size PCM16 mono chunk
//! - [`AudioOutput::write_frame`] queues one chunk for the speaker
//!
//! Both halves are created from an [`AudioDevice`] so the playback task can
//! tear down and rebuild its output stream when an interruption needs the
//! hardware buffer emptied.

mod frame;
mod preprocess;
mod wav;

#[cfg(feature = "audio-device")]
mod cpal_device;

pub use frame::{
    AudioFrame, FrameChunker, FrameDirection, FrameSequencer, pcm_to_samples, rms_energy,
    samples_to_pcm,
};
pub use preprocess::CapturePreprocessor;
pub use wav::WavFileDevice;

#[cfg(feature = "audio-device")]
pub use cpal_device::CpalDevice;

use thiserror::Error;

/// Errors raised by audio devices.
#[derive(Debug, Error)]
pub enum AudioError {
    /// No usable device or stream configuration
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Reading from the input stream failed
    #[error("Audio read failed: {0}")]
    ReadFailed(String),

    /// Writing to the output stream failed
    #[error("Audio write failed: {0}")]
    WriteFailed(String),

    /// Input has no more frames
    #[error("Audio input reached end of stream")]
    EndOfStream,

    /// Sample rate or channel layout does not match the session
    #[error("Audio format mismatch: {0}")]
    FormatMismatch(String),
}

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// Frame geometry shared by a device and the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Capture sample rate (Hz)
    pub input_sample_rate: u32,
    /// Playback sample rate (Hz)
    pub output_sample_rate: u32,
    /// Samples per captured frame
    pub frame_samples: usize,
    /// Samples per playback write
    pub playback_frame_samples: usize,
}

impl AudioFormat {
    #[inline]
    pub fn input_frame_bytes(&self) -> usize {
        self.frame_samples * 2
    }

    #[inline]
    pub fn playback_frame_bytes(&self) -> usize {
        self.playback_frame_samples * 2
    }

    /// Duration of one playback write, the upper bound on flush latency.
    pub fn playback_frame_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(
            self.playback_frame_samples as f64 / self.output_sample_rate.max(1) as f64,
        )
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            input_sample_rate: 24000,
            output_sample_rate: 24000,
            frame_samples: 1024,
            playback_frame_samples: 4800,
        }
    }
}

/// Blocking capture half.
pub trait AudioInput: Send {
    /// Block until one full frame is available.
    fn read_frame(&mut self) -> AudioResult<Vec<u8>>;
}

/// Blocking playback half.
pub trait AudioOutput: Send {
    /// Block until the frame has been accepted by the device.
    fn write_frame(&mut self, pcm: &[u8]) -> AudioResult<()>;

    /// Discard everything queued in the device.
    ///
    /// Returns `Ok(false)` when the backend has no flush primitive; the
    /// caller then drops this stream and opens a fresh one.
    fn flush(&mut self) -> AudioResult<bool> {
        Ok(false)
    }
}

/// Duplex audio hardware.
pub trait AudioDevice: Send + Sync {
    fn format(&self) -> AudioFormat;

    fn open_input(&self) -> AudioResult<Box<dyn AudioInput>>;

    fn open_output(&self) -> AudioResult<Box<dyn AudioOutput>>;

    fn name(&self) -> &str {
        "audio-device"
    }
}
