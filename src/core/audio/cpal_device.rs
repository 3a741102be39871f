//! System microphone and speaker through cpal.
//!
//! cpal streams are not `Send`, so each half parks its stream on a
//! dedicated thread and exchanges samples through shared queues. The
//! output queue is ours, which gives playback a real flush primitive.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::{AudioDevice, AudioError, AudioFormat, AudioInput, AudioOutput, AudioResult};

/// Chunks buffered between the input callback and `read_frame`.
const INPUT_QUEUE_CHUNKS: usize = 64;

/// Default input/output device of the default host.
pub struct CpalDevice {
    format: AudioFormat,
}

impl CpalDevice {
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }
}

impl AudioDevice for CpalDevice {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn open_input(&self) -> AudioResult<Box<dyn AudioInput>> {
        Ok(Box::new(CpalInput::open(self.format)?))
    }

    fn open_output(&self) -> AudioResult<Box<dyn AudioOutput>> {
        Ok(Box::new(CpalOutput::open(self.format)?))
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

fn mono_config(sample_rate: u32) -> StreamConfig {
    StreamConfig {
        channels: 1,
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Default,
    }
}

/// Owns a stream thread; dropping the guard stops the stream.
struct StreamGuard {
    stop: Option<SyncSender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn a thread that builds a stream, reports the outcome, then parks
/// until the guard is dropped.
fn spawn_stream<F>(name: &str, build: F) -> AudioResult<StreamGuard>
where
    F: FnOnce() -> AudioResult<cpal::Stream> + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::sync_channel::<AudioResult<()>>(1);
    let (stop_tx, stop_rx) = mpsc::sync_channel::<()>(1);

    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match build() {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(AudioError::DeviceUnavailable(format!(
                    "failed to start stream: {e}"
                ))));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            // Returns once the guard drops its sender.
            let _ = stop_rx.recv();
            drop(stream);
        })
        .map_err(|e| AudioError::DeviceUnavailable(format!("cannot spawn stream thread: {e}")))?;

    let guard = StreamGuard {
        stop: Some(stop_tx),
        handle: Some(handle),
    };

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(guard),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(AudioError::DeviceUnavailable(
            "stream thread exited before start".to_string(),
        )),
    }
}

struct CpalInput {
    chunks: Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    frame_samples: usize,
    _guard: StreamGuard,
}

impl CpalInput {
    fn open(format: AudioFormat) -> AudioResult<Self> {
        let (tx, rx) = mpsc::sync_channel::<Vec<i16>>(INPUT_QUEUE_CHUNKS);
        let sample_rate = format.input_sample_rate;

        let guard = spawn_stream("cpal-input", move || {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| AudioError::DeviceUnavailable("no default input device".into()))?;
            info!(
                device = device.name().unwrap_or_default(),
                sample_rate, "Opening input stream"
            );
            device
                .build_input_stream(
                    &mono_config(sample_rate),
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let chunk: Vec<i16> = data
                            .iter()
                            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                            .collect();
                        if tx.try_send(chunk).is_err() {
                            debug!("input queue full, dropping chunk");
                        }
                    },
                    |err| error!("audio input stream error: {err}"),
                    None,
                )
                .map_err(|e| AudioError::DeviceUnavailable(format!("failed to build input stream: {e}")))
        })?;

        Ok(Self {
            chunks: rx,
            pending: VecDeque::with_capacity(format.frame_samples * 2),
            frame_samples: format.frame_samples,
            _guard: guard,
        })
    }
}

impl AudioInput for CpalInput {
    fn read_frame(&mut self) -> AudioResult<Vec<u8>> {
        while self.pending.len() < self.frame_samples {
            let chunk = self
                .chunks
                .recv()
                .map_err(|_| AudioError::ReadFailed("input stream closed".to_string()))?;
            self.pending.extend(chunk);
        }
        let mut pcm = Vec::with_capacity(self.frame_samples * 2);
        for sample in self.pending.drain(..self.frame_samples) {
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(pcm)
    }
}

struct PlaybackQueue {
    samples: Mutex<VecDeque<i16>>,
    drained: Condvar,
}

struct CpalOutput {
    queue: Arc<PlaybackQueue>,
    max_queued: usize,
    _guard: StreamGuard,
}

impl CpalOutput {
    fn open(format: AudioFormat) -> AudioResult<Self> {
        let queue = Arc::new(PlaybackQueue {
            samples: Mutex::new(VecDeque::with_capacity(format.playback_frame_samples * 2)),
            drained: Condvar::new(),
        });
        let callback_queue = queue.clone();
        let sample_rate = format.output_sample_rate;

        let guard = spawn_stream("cpal-output", move || {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| AudioError::DeviceUnavailable("no default output device".into()))?;
            info!(
                device = device.name().unwrap_or_default(),
                sample_rate, "Opening output stream"
            );
            device
                .build_output_stream(
                    &mono_config(sample_rate),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut samples = callback_queue.samples.lock();
                        for out in data.iter_mut() {
                            *out = samples
                                .pop_front()
                                .map(|s| s as f32 / i16::MAX as f32)
                                .unwrap_or(0.0);
                        }
                        drop(samples);
                        callback_queue.drained.notify_all();
                    },
                    |err| error!("audio output stream error: {err}"),
                    None,
                )
                .map_err(|e| AudioError::DeviceUnavailable(format!("failed to build output stream: {e}")))
        })?;

        Ok(Self {
            queue,
            max_queued: format.playback_frame_samples,
            _guard: guard,
        })
    }
}

impl AudioOutput for CpalOutput {
    fn write_frame(&mut self, pcm: &[u8]) -> AudioResult<()> {
        let mut samples = self.queue.samples.lock();
        while samples.len() >= self.max_queued {
            let timed_out = self
                .queue
                .drained
                .wait_for(&mut samples, std::time::Duration::from_secs(2))
                .timed_out();
            if timed_out {
                warn!("output stream stalled, queue not draining");
                return Err(AudioError::WriteFailed("output stream stalled".to_string()));
            }
        }
        samples.extend(
            pcm.chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );
        Ok(())
    }

    fn flush(&mut self) -> AudioResult<bool> {
        self.queue.samples.lock().clear();
        self.queue.drained.notify_all();
        Ok(true)
    }
}
