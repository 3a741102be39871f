//! In-memory audio device
//!
//! The microphone replays frames pushed by the test and produces silence
//! when its queue is empty. Playback records every written frame.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use waav_duplex::core::audio::{
    AudioDevice, AudioError, AudioFormat, AudioInput, AudioOutput, pcm_to_samples,
};

#[derive(Default)]
struct Shared {
    input: Mutex<VecDeque<Vec<u8>>>,
    end_when_drained: AtomicBool,
    written: Mutex<Vec<Vec<u8>>>,
    output_opens: AtomicUsize,
    flushes: AtomicUsize,
}

/// Scripted microphone and recording speaker.
#[derive(Clone)]
pub struct MemoryAudioDevice {
    format: AudioFormat,
    pace: Duration,
    shared: Arc<Shared>,
}

impl MemoryAudioDevice {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            pace: Duration::from_millis(2),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Delay before each captured frame is returned.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// Queue microphone frames, played before falling back to silence.
    pub fn push_input<I>(&self, frames: I)
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        self.shared.input.lock().extend(frames);
    }

    /// Report end of stream once queued input has been read.
    pub fn end_input_when_drained(&self) {
        self.shared.end_when_drained.store(true, Ordering::SeqCst);
    }

    pub fn pending_input(&self) -> usize {
        self.shared.input.lock().len()
    }

    /// Frames written to the speaker so far.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.shared.written.lock().clone()
    }

    /// All played samples, in order.
    pub fn played_samples(&self) -> Vec<i16> {
        self.shared
            .written
            .lock()
            .iter()
            .flat_map(|f| pcm_to_samples(f))
            .collect()
    }

    pub fn output_opens(&self) -> usize {
        self.shared.output_opens.load(Ordering::SeqCst)
    }
}

impl AudioDevice for MemoryAudioDevice {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn open_input(&self) -> Result<Box<dyn AudioInput>, AudioError> {
        Ok(Box::new(MemoryInput {
            frame_bytes: self.format.input_frame_bytes(),
            pace: self.pace,
            shared: self.shared.clone(),
        }))
    }

    fn open_output(&self) -> Result<Box<dyn AudioOutput>, AudioError> {
        self.shared.output_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryOutput {
            shared: self.shared.clone(),
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemoryInput {
    frame_bytes: usize,
    pace: Duration,
    shared: Arc<Shared>,
}

impl AudioInput for MemoryInput {
    fn read_frame(&mut self) -> Result<Vec<u8>, AudioError> {
        if !self.pace.is_zero() {
            std::thread::sleep(self.pace);
        }
        if let Some(frame) = self.shared.input.lock().pop_front() {
            return Ok(frame);
        }
        if self.shared.end_when_drained.load(Ordering::SeqCst) {
            return Err(AudioError::EndOfStream);
        }
        Ok(vec![0u8; self.frame_bytes])
    }
}

struct MemoryOutput {
    shared: Arc<Shared>,
}

impl AudioOutput for MemoryOutput {
    fn write_frame(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        self.shared.written.lock().push(pcm.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> Result<bool, AudioError> {
        self.shared.flushes.fetch_add(1, Ordering::SeqCst);
        // No flush primitive: the engine reopens the stream.
        Ok(false)
    }
}
