use thiserror::Error;

use crate::config::ConfigError;
use crate::core::audio::AudioError;
use crate::core::realtime::RealtimeError;
use crate::core::stt::TranscribeError;
use crate::core::tools::ToolError;

/// Errors that end a duplex session.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Transcribe(#[from] TranscribeError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid engine configuration: {0}")]
    InvalidConfiguration(String),

    /// The realtime connection dropped mid-conversation; never retried
    #[error("Connection to the realtime service was lost")]
    ConnectionLost,
}

pub type EngineResult<T> = Result<T, EngineError>;
