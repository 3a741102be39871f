//! Realtime protocol session.
//!
//! - [`ProtocolSession`] owns the WebSocket to the Realtime API
//! - [`SessionHandle`] is the cloneable sending side used by engine tasks
//! - [`SessionPhase`] tracks where the conversation is
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian at 24kHz, base64 encoded on the wire.

mod base;
pub mod openai;
mod state;

pub use base::{
    RealtimeConfig, RealtimeError, RealtimeResult, RemoteVadSettings, TurnMode,
};
pub use openai::{
    ClientEvent, Modality, OPENAI_REALTIME_SAMPLE_RATE, OpenAIRealtimeVoice, ProtocolSession,
    ServerEvent, SessionHandle, ToolDef,
};
pub use state::{InvalidTransition, PhaseEvent, SessionPhase};
