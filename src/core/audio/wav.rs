//! WAV-file backed audio device.
//!
//! Capture replays a mono PCM16 WAV file at real-time pace and then keeps
//! producing silence, like an idle microphone. Playback is appended to an
//! optional WAV recording. Useful for headless runs and reproducible demos.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{AudioDevice, AudioError, AudioFormat, AudioInput, AudioOutput, AudioResult};

type SharedWriter = Arc<Mutex<Option<WavWriter<BufWriter<File>>>>>;

/// Audio device reading from and recording to WAV files.
pub struct WavFileDevice {
    format: AudioFormat,
    input_path: PathBuf,
    output_path: Option<PathBuf>,
    realtime: bool,
    trailing_silence: Option<Duration>,
    writer: SharedWriter,
}

impl WavFileDevice {
    /// Create a device replaying `input_path`.
    ///
    /// The file must be mono 16-bit PCM at `format.input_sample_rate`.
    pub fn new(format: AudioFormat, input_path: impl Into<PathBuf>) -> Self {
        Self {
            format,
            input_path: input_path.into(),
            output_path: None,
            realtime: true,
            trailing_silence: None,
            writer: Arc::new(Mutex::new(None)),
        }
    }

    /// Record playback to `path`.
    pub fn with_recording(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Pace reads and writes at the frame duration (default: on).
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Stop capture with end-of-stream after this much silence past EOF.
    ///
    /// Without a limit the device idles on silence until shutdown.
    pub fn with_trailing_silence(mut self, limit: Duration) -> Self {
        self.trailing_silence = Some(limit);
        self
    }

    /// Finish the WAV header of the recording.
    pub fn finalize(&self) -> AudioResult<()> {
        if let Some(writer) = self.writer.lock().take() {
            writer
                .finalize()
                .map_err(|e| AudioError::WriteFailed(format!("failed to finalize recording: {e}")))?;
            info!("Playback recording finalized");
        }
        Ok(())
    }

    fn ensure_writer(&self) -> AudioResult<()> {
        let Some(path) = &self.output_path else {
            return Ok(());
        };
        let mut guard = self.writer.lock();
        if guard.is_none() {
            let spec = WavSpec {
                channels: 1,
                sample_rate: self.format.output_sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            };
            let writer = WavWriter::create(path, spec).map_err(|e| {
                AudioError::DeviceUnavailable(format!("cannot create {}: {e}", path.display()))
            })?;
            *guard = Some(writer);
        }
        Ok(())
    }
}

impl AudioDevice for WavFileDevice {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn open_input(&self) -> AudioResult<Box<dyn AudioInput>> {
        let input = WavInput::open(
            &self.input_path,
            self.format,
            self.realtime,
            self.trailing_silence,
        )?;
        Ok(Box::new(input))
    }

    fn open_output(&self) -> AudioResult<Box<dyn AudioOutput>> {
        self.ensure_writer()?;
        let pace = self.realtime.then(|| self.format.playback_frame_duration());
        Ok(Box::new(WavOutput {
            writer: self.writer.clone(),
            pace,
        }))
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}

struct WavInput {
    samples: std::vec::IntoIter<i16>,
    frame_samples: usize,
    frame_duration: Duration,
    realtime: bool,
    next_deadline: Option<Instant>,
    silence_left: Option<Duration>,
}

impl WavInput {
    fn open(
        path: &Path,
        format: AudioFormat,
        realtime: bool,
        trailing_silence: Option<Duration>,
    ) -> AudioResult<Self> {
        let reader = WavReader::open(path).map_err(|e| {
            AudioError::DeviceUnavailable(format!("cannot open {}: {e}", path.display()))
        })?;
        let spec = reader.spec();
        if spec.channels != 1 || spec.bits_per_sample != 16 || spec.sample_format != SampleFormat::Int
        {
            return Err(AudioError::FormatMismatch(format!(
                "expected mono 16-bit PCM, got {} channel(s) {}-bit {:?}",
                spec.channels, spec.bits_per_sample, spec.sample_format
            )));
        }
        if spec.sample_rate != format.input_sample_rate {
            return Err(AudioError::FormatMismatch(format!(
                "file is {}Hz, session captures at {}Hz",
                spec.sample_rate, format.input_sample_rate
            )));
        }

        let samples = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AudioError::ReadFailed(e.to_string()))?;
        debug!(samples = samples.len(), path = %path.display(), "Loaded capture file");

        Ok(Self {
            samples: samples.into_iter(),
            frame_samples: format.frame_samples,
            frame_duration: Duration::from_secs_f64(
                format.frame_samples as f64 / format.input_sample_rate.max(1) as f64,
            ),
            realtime,
            next_deadline: None,
            silence_left: trailing_silence,
        })
    }

    fn pace(&mut self) {
        if !self.realtime {
            return;
        }
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now) + self.frame_duration;
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline);
    }
}

impl AudioInput for WavInput {
    fn read_frame(&mut self) -> AudioResult<Vec<u8>> {
        let mut pcm = Vec::with_capacity(self.frame_samples * 2);
        let mut taken = 0;
        for sample in self.samples.by_ref().take(self.frame_samples) {
            pcm.extend_from_slice(&sample.to_le_bytes());
            taken += 1;
        }

        if taken == 0 {
            if let Some(left) = self.silence_left.as_mut() {
                if left.is_zero() {
                    return Err(AudioError::EndOfStream);
                }
                *left = left.saturating_sub(self.frame_duration);
            }
        }

        pcm.resize(self.frame_samples * 2, 0);
        self.pace();
        Ok(pcm)
    }
}

struct WavOutput {
    writer: SharedWriter,
    pace: Option<Duration>,
}

impl AudioOutput for WavOutput {
    fn write_frame(&mut self, pcm: &[u8]) -> AudioResult<()> {
        if let Some(writer) = self.writer.lock().as_mut() {
            for pair in pcm.chunks_exact(2) {
                writer
                    .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                    .map_err(|e| AudioError::WriteFailed(e.to_string()))?;
            }
        }
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }
        Ok(())
    }

    fn flush(&mut self) -> AudioResult<bool> {
        // Nothing is buffered beyond the frame being written.
        Ok(true)
    }
}
