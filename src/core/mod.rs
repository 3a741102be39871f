pub mod audio;
pub mod realtime;
pub mod stt;
pub mod tools;
pub mod vad;

// Re-export commonly used types for convenience
pub use audio::{AudioDevice, AudioError, AudioFormat, AudioInput, AudioOutput, WavFileDevice};

pub use realtime::{
    ProtocolSession, RealtimeConfig, RealtimeError, RealtimeResult, ServerEvent, SessionHandle,
    SessionPhase, TurnMode,
};

pub use stt::{TranscribeError, Transcriber, Transcription, WhisperApiTranscriber};

pub use tools::{ToolDispatcher, ToolOutcome};

pub use vad::{SegmenterConfig, SegmenterEvent, Utterance, UtteranceSegmenter};
