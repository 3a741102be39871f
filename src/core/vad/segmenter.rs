//! Energy-based utterance segmenter.
//!
//! A leaky-bucket endpointer: frames above the energy threshold open or
//! extend an utterance, and a run of quiet frames longer than the silence
//! window closes it. Time is measured on the audio clock (sum of frame
//! durations) so segmentation is deterministic for a given input.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use super::config::SegmenterConfig;
use crate::core::audio::AudioFrame;

/// One closed span of speech.
#[derive(Debug, Clone)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
    speech_frames: usize,
    speech_duration: Duration,
    sample_rate: u32,
}

impl Utterance {
    /// Pre-roll frames followed by the speech frames, in capture order.
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    /// Number of frames that were above the energy threshold.
    pub fn speech_frames(&self) -> usize {
        self.speech_frames
    }

    /// Pre-roll frames taken from the background buffer.
    pub fn pre_roll_frames(&self) -> usize {
        self.frames.len() - self.speech_frames
    }

    pub fn speech_duration(&self) -> Duration {
        self.speech_duration
    }

    /// Total playing time including pre-roll.
    pub fn duration(&self) -> Duration {
        self.frames.iter().map(AudioFrame::duration).sum()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Concatenated PCM16 bytes.
    pub fn to_pcm(&self) -> Bytes {
        let len = self.frames.iter().map(|f| f.data().len()).sum();
        let mut out = BytesMut::with_capacity(len);
        for frame in &self.frames {
            out.extend_from_slice(frame.data());
        }
        out.freeze()
    }

    pub fn samples(&self) -> Vec<i16> {
        self.frames.iter().flat_map(|f| f.samples()).collect()
    }
}

/// Boundary events produced by [`UtteranceSegmenter::push_frame`].
#[derive(Debug, Clone)]
pub enum SegmenterEvent {
    /// First frame above threshold
    SpeechStarted,
    /// Utterance closed with enough speech to transcribe
    UtteranceReady(Utterance),
    /// Utterance closed but its buffer, pre-roll included, was too short
    NoiseDiscarded { buffered: Duration },
}

/// Local turn detector for the LocalVad mode.
#[derive(Debug)]
pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    speaking: bool,
    silence: Duration,
    speech: Duration,
    speech_frames: usize,
    buffer: Vec<AudioFrame>,
    background: VecDeque<AudioFrame>,
    pre_roll_capacity: usize,
}

impl UtteranceSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        let pre_roll_capacity = config.pre_roll_frames();
        Self {
            config,
            speaking: false,
            silence: Duration::ZERO,
            speech: Duration::ZERO,
            speech_frames: 0,
            buffer: Vec::new(),
            background: VecDeque::with_capacity(pre_roll_capacity + 1),
            pre_roll_capacity,
        }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    #[inline]
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feed one captured frame.
    pub fn push_frame(&mut self, frame: AudioFrame) -> Option<SegmenterEvent> {
        let energy = frame.rms();
        trace!(seq = frame.seq(), energy, "segmenter frame");

        if energy > self.config.energy_threshold {
            let started = !self.speaking;
            if started {
                self.speaking = true;
                self.buffer.extend(self.background.drain(..));
                debug!(energy, pre_roll = self.buffer.len(), "Local speech started");
            }
            self.speech += frame.duration();
            self.speech_frames += 1;
            self.silence = Duration::ZERO;
            self.buffer.push(frame);
            return started.then_some(SegmenterEvent::SpeechStarted);
        }

        if self.speaking {
            self.silence += frame.duration();
            if self.silence >= self.config.silence_duration() {
                return Some(self.close());
            }
            return None;
        }

        if self.pre_roll_capacity > 0 {
            if self.background.len() == self.pre_roll_capacity {
                self.background.pop_front();
            }
            self.background.push_back(frame);
        }
        None
    }

    /// Close any open utterance, e.g. at end of input.
    pub fn flush(&mut self) -> Option<SegmenterEvent> {
        if self.speaking {
            Some(self.close())
        } else {
            self.background.clear();
            None
        }
    }

    /// Drop all state, including pre-roll.
    pub fn reset(&mut self) {
        self.speaking = false;
        self.silence = Duration::ZERO;
        self.speech = Duration::ZERO;
        self.speech_frames = 0;
        self.buffer.clear();
        self.background.clear();
    }

    fn close(&mut self) -> SegmenterEvent {
        let speech = self.speech;
        let speech_frames = self.speech_frames;
        let frames = std::mem::take(&mut self.buffer);
        self.reset();

        let buffered: Duration = frames.iter().map(AudioFrame::duration).sum();
        if buffered < self.config.min_speech_duration() {
            debug!(
                buffered_ms = buffered.as_millis() as u64,
                speech_ms = speech.as_millis() as u64,
                "Discarding short utterance as noise"
            );
            return SegmenterEvent::NoiseDiscarded { buffered };
        }

        debug!(
            speech_ms = speech.as_millis() as u64,
            frames = frames.len(),
            "Utterance ready"
        );
        SegmenterEvent::UtteranceReady(Utterance {
            frames,
            speech_frames,
            speech_duration: speech,
            sample_rate: self.config.sample_rate,
        })
    }
}
