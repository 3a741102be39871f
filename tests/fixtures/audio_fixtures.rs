//! Audio Test Fixtures
//!
//! Programmatically generated PCM16 mono audio so tests have no file
//! dependencies and exact control over frame energy.
//!
//! Two frame shapes are used throughout:
//! - Remote turns: 24kHz capture, 480-sample frames (20ms)
//! - Local turns: 16kHz capture, 320-sample frames (20ms)

use std::f32::consts::PI;

use waav_duplex::core::audio::AudioFormat;

/// Realtime API sample rate
pub const REMOTE_SAMPLE_RATE: u32 = 24000;

/// Local transcription sample rate
pub const LOCAL_SAMPLE_RATE: u32 = 16000;

/// 20ms at 24kHz
pub const REMOTE_FRAME_SAMPLES: usize = 480;

/// 20ms at 16kHz
pub const LOCAL_FRAME_SAMPLES: usize = 320;

/// Format for RemoteVad engine tests.
pub fn remote_format() -> AudioFormat {
    AudioFormat {
        input_sample_rate: REMOTE_SAMPLE_RATE,
        output_sample_rate: REMOTE_SAMPLE_RATE,
        frame_samples: REMOTE_FRAME_SAMPLES,
        playback_frame_samples: 480,
    }
}

/// Format for LocalVad engine tests.
pub fn local_format() -> AudioFormat {
    AudioFormat {
        input_sample_rate: LOCAL_SAMPLE_RATE,
        output_sample_rate: REMOTE_SAMPLE_RATE,
        frame_samples: LOCAL_FRAME_SAMPLES,
        playback_frame_samples: 480,
    }
}

/// Generate silence (zeros)
pub fn generate_silence(duration_samples: usize) -> Vec<i16> {
    vec![0i16; duration_samples]
}

/// Generate a sine wave tone
pub fn generate_sine_wave(
    duration_samples: usize,
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
) -> Vec<i16> {
    let max_amplitude = amplitude * i16::MAX as f32;
    let angular_freq = 2.0 * PI * frequency / sample_rate as f32;

    (0..duration_samples)
        .map(|i| ((angular_freq * i as f32).sin() * max_amplitude) as i16)
        .collect()
}

/// A constant-valued frame; its RMS equals `value`.
pub fn constant_frame(samples: usize, value: i16) -> Vec<u8> {
    samples_to_bytes(&vec![value; samples])
}

/// A frame well above the default speech threshold.
pub fn loud_frame(samples: usize) -> Vec<u8> {
    constant_frame(samples, 3000)
}

pub fn silent_frame(samples: usize) -> Vec<u8> {
    constant_frame(samples, 0)
}

/// `quiet` silent frames, `loud` loud frames, then `trailing` silent frames.
pub fn utterance_frames(quiet: usize, loud: usize, trailing: usize, samples: usize) -> Vec<Vec<u8>> {
    let mut frames = Vec::with_capacity(quiet + loud + trailing);
    frames.extend((0..quiet).map(|_| silent_frame(samples)));
    frames.extend((0..loud).map(|_| loud_frame(samples)));
    frames.extend((0..trailing).map(|_| silent_frame(samples)));
    frames
}

/// Convert i16 samples to little-endian bytes
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Convert little-endian bytes back to i16 samples
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Calculate RMS (Root Mean Square) of samples
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Write a mono PCM16 WAV file.
pub fn write_wav(path: &std::path::Path, samples: &[i16], sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_silent() {
        assert_eq!(calculate_rms(&generate_silence(480)), 0.0);
    }

    #[test]
    fn test_constant_frame_rms() {
        let frame = constant_frame(480, 1234);
        assert_eq!(frame.len(), 960);
        assert!((calculate_rms(&bytes_to_samples(&frame)) - 1234.0).abs() < 0.5);
    }

    #[test]
    fn test_sine_wave_amplitude() {
        let tone = generate_sine_wave(24000, 440.0, 0.5, REMOTE_SAMPLE_RATE);
        let peak = tone.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak > 16000 && peak <= 16384);
    }
}
