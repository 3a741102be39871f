//! OpenAI Realtime API protocol.
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse
//!
//! # Audio Format
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz.

mod client;
mod config;
mod messages;

pub use client::{ProtocolSession, SessionHandle, WS_CHANNEL_CAPACITY};
pub use config::{
    Modality, OPENAI_INPUT_TRANSCRIPTION_MODEL, OPENAI_REALTIME_DEFAULT_MODEL,
    OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat,
    OpenAIRealtimeVoice,
};
pub use messages::{
    ApiError, ClientEvent, ContentPart, ConversationItem, InputAudioTranscription, RateLimit,
    Response, ResponseConfig, ServerEvent, Session, SessionConfig, ToolDef, TurnDetection,
};
