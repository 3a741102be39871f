//! Speaker task.
//!
//! A blocking thread owns the output stream. Decoded deltas arrive tagged
//! with the playback epoch current when they were queued; a flush bumps the
//! epoch, so everything queued before it is skipped without being written.
//! On the first command of a newer epoch the thread empties the device,
//! either through the backend's flush or by dropping the stream and opening
//! a new one. No write happens while the stream is being rebuilt.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use super::EngineMessage;
use super::flags::SessionFlags;
use super::stats::SessionCounters;
use crate::core::audio::{AudioDevice, AudioFormat, AudioOutput, AudioResult, FrameChunker};

#[derive(Debug)]
pub enum PlaybackCommand {
    Play { epoch: u64, pcm: Bytes },
    /// Pad and write whatever partial frame is left
    EndOfResponse { epoch: u64 },
    Flush { epoch: u64 },
}

impl PlaybackCommand {
    fn epoch(&self) -> u64 {
        match self {
            PlaybackCommand::Play { epoch, .. }
            | PlaybackCommand::EndOfResponse { epoch }
            | PlaybackCommand::Flush { epoch } => *epoch,
        }
    }
}

/// Event-loop side of the playback task.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    tx: mpsc::UnboundedSender<PlaybackCommand>,
    flags: Arc<SessionFlags>,
}

impl PlaybackHandle {
    /// A handle whose commands land on the returned receiver.
    pub fn detached(flags: Arc<SessionFlags>) -> (Self, mpsc::UnboundedReceiver<PlaybackCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, flags }, rx)
    }

    /// Queue decoded PCM16 for the speaker.
    pub fn enqueue(&self, pcm: Bytes) {
        let epoch = self.flags.playback_epoch();
        if self.tx.send(PlaybackCommand::Play { epoch, pcm }).is_err() {
            trace!("Playback task gone, dropping audio");
        }
    }

    pub fn end_of_response(&self) {
        let epoch = self.flags.playback_epoch();
        let _ = self.tx.send(PlaybackCommand::EndOfResponse { epoch });
    }

    /// Discard everything queued or buffered for the speaker.
    pub fn flush(&self) {
        let epoch = self.flags.bump_playback_epoch();
        debug!(epoch, "Flushing playback");
        let _ = self.tx.send(PlaybackCommand::Flush { epoch });
    }
}

/// Start the playback thread. It stops when every handle is dropped.
pub(crate) fn spawn_playback(
    device: Arc<dyn AudioDevice>,
    flags: Arc<SessionFlags>,
    counters: Arc<SessionCounters>,
    report: mpsc::UnboundedSender<EngineMessage>,
) -> (PlaybackHandle, JoinHandle<()>) {
    let format = device.format();
    let (handle, rx) = PlaybackHandle::detached(flags.clone());
    let start_epoch = flags.playback_epoch();

    let task = tokio::task::spawn_blocking(move || {
        let result = run_playback(device.as_ref(), rx, &flags, &counters, format, start_epoch);
        if let Err(e) = &result {
            error!("Playback stopped: {}", e);
        }
        let _ = report.send(EngineMessage::PlaybackStopped(result.err()));
    });

    (handle, task)
}

/// Drain playback commands until every handle is gone. Playback is never
/// reported active once this returns, whichever way it exits.
fn run_playback(
    device: &dyn AudioDevice,
    rx: mpsc::UnboundedReceiver<PlaybackCommand>,
    flags: &SessionFlags,
    counters: &SessionCounters,
    format: AudioFormat,
    start_epoch: u64,
) -> AudioResult<()> {
    let result = playback_loop(device, rx, flags, counters, format, start_epoch);
    flags.set_playback_active(false);
    result
}

fn playback_loop(
    device: &dyn AudioDevice,
    mut rx: mpsc::UnboundedReceiver<PlaybackCommand>,
    flags: &SessionFlags,
    counters: &SessionCounters,
    format: AudioFormat,
    start_epoch: u64,
) -> AudioResult<()> {
    let mut output = Some(device.open_output()?);
    let mut chunker = FrameChunker::new(format.playback_frame_samples);
    let mut epoch = start_epoch;
    debug!(device = device.name(), "Playback started");

    loop {
        let command = match rx.try_recv() {
            Ok(command) => command,
            Err(TryRecvError::Empty) => {
                flags.set_playback_active(false);
                match rx.blocking_recv() {
                    Some(command) => command,
                    None => break,
                }
            }
            Err(TryRecvError::Disconnected) => break,
        };

        let command_epoch = command.epoch();
        if command_epoch < epoch {
            trace!(command_epoch, epoch, "Skipping flushed playback command");
            continue;
        }
        if command_epoch > epoch {
            epoch = command_epoch;
            chunker.clear();
            reset_output(device, &mut output)?;
        }

        match command {
            PlaybackCommand::Play { pcm, .. } => {
                flags.set_playback_active(true);
                for frame in chunker.push(&pcm) {
                    if !write_current(&mut output, &frame, epoch, flags, counters)? {
                        chunker.clear();
                        break;
                    }
                }
            }
            PlaybackCommand::EndOfResponse { .. } => {
                if let Some(tail) = chunker.finish() {
                    write_current(&mut output, &tail, epoch, flags, counters)?;
                }
            }
            PlaybackCommand::Flush { .. } => {}
        }
    }

    debug!("Playback finished");
    Ok(())
}

/// Write one frame unless a flush has been requested since it was queued.
fn write_current(
    output: &mut Option<Box<dyn AudioOutput>>,
    frame: &[u8],
    epoch: u64,
    flags: &SessionFlags,
    counters: &SessionCounters,
) -> AudioResult<bool> {
    if flags.playback_epoch() != epoch {
        return Ok(false);
    }
    let Some(out) = output.as_mut() else {
        return Ok(false);
    };
    out.write_frame(frame)?;
    SessionCounters::incr(&counters.playback_frames);
    Ok(true)
}

fn reset_output(
    device: &dyn AudioDevice,
    output: &mut Option<Box<dyn AudioOutput>>,
) -> AudioResult<()> {
    if let Some(out) = output.as_mut()
        && out.flush()?
    {
        return Ok(());
    }
    // Old stream is gone before the new one opens.
    output.take();
    *output = Some(device.open_output()?);
    debug!("Playback stream rebuilt");
    Ok(())
}
