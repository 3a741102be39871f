//! Integration tests for the local utterance segmenter
//!
//! Frames are 20ms at 16kHz; the energy threshold sits between the
//! silent (0) and loud (3000) fixture frames.

mod fixtures;

use std::time::Duration;

use fixtures::*;
use waav_duplex::core::audio::{AudioFrame, FrameDirection};
use waav_duplex::core::vad::{SegmenterConfig, SegmenterEvent, UtteranceSegmenter};

fn config() -> SegmenterConfig {
    SegmenterConfig {
        energy_threshold: 500.0,
        silence_duration_secs: 0.2,
        min_speech_duration_secs: 0.1,
        pre_roll_ms: 60,
        sample_rate: LOCAL_SAMPLE_RATE,
        frame_samples: LOCAL_FRAME_SAMPLES,
    }
}

fn run(frames: Vec<Vec<u8>>, segmenter: &mut UtteranceSegmenter) -> Vec<SegmenterEvent> {
    frames
        .into_iter()
        .enumerate()
        .filter_map(|(seq, pcm)| {
            segmenter.push_frame(AudioFrame::new(
                seq as u64,
                FrameDirection::Capture,
                LOCAL_SAMPLE_RATE,
                pcm,
            ))
        })
        .collect()
}

#[test]
fn test_single_utterance_with_pre_roll() {
    let mut segmenter = UtteranceSegmenter::new(config());
    let events = run(
        utterance_frames(5, 10, 20, LOCAL_FRAME_SAMPLES),
        &mut segmenter,
    );

    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], SegmenterEvent::SpeechStarted));
    let SegmenterEvent::UtteranceReady(utterance) = &events[1] else {
        panic!("expected an utterance, got {:?}", events[1]);
    };
    assert_eq!(utterance.speech_frames(), 10);
    // 60ms of pre-roll at 20ms frames
    assert_eq!(utterance.pre_roll_frames(), 3);
    assert_eq!(utterance.speech_duration(), Duration::from_millis(200));
    assert_eq!(utterance.sample_rate(), LOCAL_SAMPLE_RATE);
    assert!(!segmenter.is_speaking());
}

#[test]
fn test_quiet_input_produces_nothing() {
    let mut segmenter = UtteranceSegmenter::new(config());
    let quiet: Vec<Vec<u8>> = (0..200)
        .map(|_| constant_frame(LOCAL_FRAME_SAMPLES, 200))
        .collect();
    assert!(run(quiet, &mut segmenter).is_empty());
    assert!(segmenter.flush().is_none());
}

#[test]
fn test_short_burst_is_discarded_as_noise() {
    let mut segmenter = UtteranceSegmenter::new(config());
    // 2 background + 2 loud frames = 80ms buffered, under the 100ms minimum
    let events = run(utterance_frames(2, 2, 20, LOCAL_FRAME_SAMPLES), &mut segmenter);
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[1],
        SegmenterEvent::NoiseDiscarded { buffered } if buffered == Duration::from_millis(80)
    ));
}

#[test]
fn test_pre_roll_counts_toward_minimum_length() {
    let mut segmenter = UtteranceSegmenter::new(config());
    // 3 pre-roll + 3 loud frames = 120ms buffered, only 60ms of it above threshold
    let events = run(utterance_frames(5, 3, 20, LOCAL_FRAME_SAMPLES), &mut segmenter);
    let SegmenterEvent::UtteranceReady(utterance) = &events[1] else {
        panic!("expected an utterance, got {:?}", events[1]);
    };
    assert_eq!(utterance.pre_roll_frames(), 3);
    assert_eq!(utterance.speech_frames(), 3);
    assert_eq!(utterance.duration(), Duration::from_millis(120));
}

#[test]
fn test_short_pause_does_not_split() {
    let mut segmenter = UtteranceSegmenter::new(config());
    let mut frames = utterance_frames(0, 8, 5, LOCAL_FRAME_SAMPLES);
    frames.extend(utterance_frames(0, 8, 20, LOCAL_FRAME_SAMPLES));
    let events = run(frames, &mut segmenter);

    let utterances: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SegmenterEvent::UtteranceReady(u) => Some(u),
            _ => None,
        })
        .collect();
    assert_eq!(utterances.len(), 1);
    assert_eq!(utterances[0].speech_frames(), 16);
}

#[test]
fn test_two_utterances_back_to_back() {
    let mut segmenter = UtteranceSegmenter::new(config());
    let mut frames = utterance_frames(3, 10, 15, LOCAL_FRAME_SAMPLES);
    frames.extend(utterance_frames(3, 6, 15, LOCAL_FRAME_SAMPLES));
    let events = run(frames, &mut segmenter);

    let ready: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            SegmenterEvent::UtteranceReady(u) => Some(u.speech_frames()),
            _ => None,
        })
        .collect();
    assert_eq!(ready, vec![10, 6]);
}

#[test]
fn test_flush_closes_open_utterance() {
    let mut segmenter = UtteranceSegmenter::new(config());
    let events = run(utterance_frames(0, 10, 0, LOCAL_FRAME_SAMPLES), &mut segmenter);
    assert_eq!(events.len(), 1);
    assert!(segmenter.is_speaking());

    match segmenter.flush() {
        Some(SegmenterEvent::UtteranceReady(u)) => {
            assert_eq!(u.speech_frames(), 10);
            assert_eq!(u.samples().len(), 10 * LOCAL_FRAME_SAMPLES);
        }
        other => panic!("expected an utterance, got {other:?}"),
    }
}
