use serde::{Deserialize, Deserializer};
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// Every field is optional; anything left out falls back to the
/// environment and then to built-in defaults.
///
/// # Example YAML structure
/// ```yaml
/// realtime:
///   api_key: "sk-..."
///   model: "gpt-4o-realtime-preview"
///   voice: "shimmer"
///   modalities: ["text", "audio"]
///
/// turn:
///   mode: "local_vad"
///   remote:
///     threshold: 0.5
///     prefix_padding_ms: 300
///     silence_duration_ms: 500
///   local:
///     energy_threshold: 300.0
///     silence_duration_secs: 1.0
///     min_speech_duration_secs: 0.3
///     pre_roll_ms: 300
///
/// audio:
///   input_sample_rate: 16000
///   full_duplex: false
///   noise_gate: 150.0
///
/// interruption:
///   keyboard: true
///   energy_barge_in: true
///   barge_in_threshold: 2000.0
///   suppression_timeout_ms: null
///
/// session:
///   end_conversation_grace_ms: 2000
///
/// transcription:
///   language: "en"
///
/// tools:
///   menu_path: "data/restaurant_menu.json"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub realtime: Option<RealtimeYaml>,
    pub turn: Option<TurnYaml>,
    pub audio: Option<AudioYaml>,
    pub interruption: Option<InterruptionYaml>,
    pub session: Option<SessionYaml>,
    pub transcription: Option<TranscriptionYaml>,
    pub tools: Option<ToolsYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub modalities: Option<Vec<String>>,
    pub input_transcription_model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TurnYaml {
    /// "remote_vad" or "local_vad"
    pub mode: Option<String>,
    pub remote: Option<RemoteTurnYaml>,
    pub local: Option<LocalTurnYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RemoteTurnYaml {
    pub threshold: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LocalTurnYaml {
    pub energy_threshold: Option<f32>,
    pub silence_duration_secs: Option<f32>,
    pub min_speech_duration_secs: Option<f32>,
    pub pre_roll_ms: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub input_sample_rate: Option<u32>,
    pub output_sample_rate: Option<u32>,
    pub frame_samples: Option<usize>,
    pub playback_buffer_samples: Option<usize>,
    pub noise_gate: Option<f32>,
    pub gain: Option<f32>,
    pub full_duplex: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct InterruptionYaml {
    pub keyboard: Option<bool>,
    pub energy_barge_in: Option<bool>,
    pub barge_in_threshold: Option<f32>,
    pub barge_in_min_frames: Option<u32>,
    /// Absent: default; `null`: no timeout
    #[serde(deserialize_with = "nullable")]
    pub suppression_timeout_ms: Option<Option<u64>>,
    pub cancel_send_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub end_conversation_grace_ms: Option<u64>,
    pub frame_send_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TranscriptionYaml {
    pub model: Option<String>,
    pub language: Option<String>,
    pub endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsYaml {
    pub menu_path: Option<String>,
    pub books_path: Option<String>,
}

/// Keep an explicit `null` apart from a missing key.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents)
            .map_err(|e| ConfigError::ParseFailed(format!("Failed to parse YAML config: {e}")))
    }
}
