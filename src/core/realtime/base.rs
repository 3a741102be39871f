//! Base types for a realtime voice session.
//!
//! # Audio Format
//!
//! Audio exchanged with the Realtime API is PCM 16-bit signed little-endian
//! mono at 24kHz.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;
use zeroize::Zeroizing;

use super::openai::{
    InputAudioTranscription, Modality, OPENAI_INPUT_TRANSCRIPTION_MODEL,
    OPENAI_REALTIME_DEFAULT_MODEL, OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat,
    OpenAIRealtimeVoice, SessionConfig, ToolDef, TurnDetection,
};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the server failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Handshake rejected with 401/403
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Unexpected or malformed server traffic
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// The transport closed; sessions are never resumed
    #[error("Session closed")]
    SessionClosed,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Turn Mode
// =============================================================================

/// Who decides where a user turn ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    /// Audio is streamed and the server segments turns
    #[default]
    RemoteVad,
    /// Turns are segmented and transcribed locally, then sent as text
    LocalVad,
}

impl fmt::Display for TurnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnMode::RemoteVad => write!(f, "remote_vad"),
            TurnMode::LocalVad => write!(f, "local_vad"),
        }
    }
}

/// Server VAD tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RemoteVadSettings {
    /// Activation threshold (0.0 - 1.0)
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for RemoteVadSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Everything needed to open and configure one realtime session.
#[derive(Clone)]
pub struct RealtimeConfig {
    /// API key for authentication
    pub api_key: Zeroizing<String>,

    /// WebSocket endpoint without the model query
    pub endpoint: String,

    pub model: String,

    pub voice: OpenAIRealtimeVoice,

    /// System instructions for the assistant
    pub instructions: Option<String>,

    /// Response modalities
    pub modalities: Vec<Modality>,

    pub turn_mode: TurnMode,

    /// Only used with [`TurnMode::RemoteVad`]
    pub remote_vad: RemoteVadSettings,

    /// Server-side transcript of user audio, RemoteVad only
    pub input_transcription_model: Option<String>,

    /// Tool definitions for function calling
    pub tools: Vec<ToolDef>,

    /// Temperature for response generation
    pub temperature: Option<f32>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_key: Zeroizing::new(String::new()),
            endpoint: OPENAI_REALTIME_URL.to_string(),
            model: OPENAI_REALTIME_DEFAULT_MODEL.to_string(),
            voice: OpenAIRealtimeVoice::default(),
            instructions: None,
            modalities: vec![Modality::Text, Modality::Audio],
            turn_mode: TurnMode::default(),
            remote_vad: RemoteVadSettings::default(),
            input_transcription_model: Some(OPENAI_INPUT_TRANSCRIPTION_MODEL.to_string()),
            tools: Vec::new(),
            temperature: None,
        }
    }
}

impl fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("modalities", &self.modalities)
            .field("turn_mode", &self.turn_mode)
            .field("remote_vad", &self.remote_vad)
            .field("tools", &self.tools.len())
            .finish()
    }
}

impl RealtimeConfig {
    pub fn validate(&self) -> RealtimeResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "API key is required".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "model is required".to_string(),
            ));
        }
        if self.modalities.is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "at least one modality is required".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.remote_vad.threshold) {
            return Err(RealtimeError::InvalidConfiguration(format!(
                "server VAD threshold must be within 0.0..=1.0, got {}",
                self.remote_vad.threshold
            )));
        }
        self.ws_url()?;
        Ok(())
    }

    /// Endpoint with the `model` query parameter applied.
    pub fn ws_url(&self) -> RealtimeResult<Url> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| {
            RealtimeError::InvalidConfiguration(format!("invalid endpoint '{}': {e}", self.endpoint))
        })?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(RealtimeError::InvalidConfiguration(format!(
                "endpoint must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }
        let has_model = url.query_pairs().any(|(k, _)| k == "model");
        if !has_model {
            url.query_pairs_mut().append_pair("model", &self.model);
        }
        Ok(url)
    }

    /// Body of the initial `session.update`.
    ///
    /// RemoteVad enables server turn detection and server-side input
    /// transcription. LocalVad sends `turn_detection: null` and no input
    /// format since user turns arrive as text items.
    pub fn session_config(&self) -> SessionConfig {
        let (turn_detection, input_audio_format, input_audio_transcription) = match self.turn_mode {
            TurnMode::RemoteVad => (
                Some(TurnDetection::ServerVad {
                    threshold: Some(self.remote_vad.threshold),
                    prefix_padding_ms: Some(self.remote_vad.prefix_padding_ms),
                    silence_duration_ms: Some(self.remote_vad.silence_duration_ms),
                    create_response: None,
                    interrupt_response: None,
                }),
                Some(OpenAIRealtimeAudioFormat::Pcm16.as_str().to_string()),
                self.input_transcription_model
                    .as_ref()
                    .map(|model| InputAudioTranscription {
                        model: model.clone(),
                    }),
            ),
            TurnMode::LocalVad => (None, None, None),
        };

        SessionConfig {
            modalities: Some(Modality::to_strings(&self.modalities)),
            instructions: self.instructions.clone(),
            voice: Some(self.voice.as_str().to_string()),
            input_audio_format,
            output_audio_format: Some(OpenAIRealtimeAudioFormat::Pcm16.as_str().to_string()),
            input_audio_transcription,
            turn_detection,
            tools: (!self.tools.is_empty()).then(|| self.tools.clone()),
            tool_choice: (!self.tools.is_empty()).then(|| "auto".to_string()),
            temperature: self.temperature,
        }
    }
}
