//! Configuration for the duplex client
//!
//! Values come from a YAML file, environment variables, `.env` values and
//! built-in defaults, in that priority order. The `.env` file is loaded into
//! the environment by the binary before any of this runs.
//!
//! # Example
//! ```rust,no_run
//! use waav_duplex::config::ClientConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variables filling the gaps
//! let config = ClientConfig::from_file(Path::new("client.yaml"))?;
//! println!("turn mode: {}", config.turn_mode);
//! # Ok(())
//! # }
//! ```

mod yaml;

pub use yaml::YamlConfig;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use zeroize::Zeroizing;

use crate::core::audio::{AudioFormat, CapturePreprocessor};
use crate::core::realtime::openai::{
    OPENAI_INPUT_TRANSCRIPTION_MODEL, OPENAI_REALTIME_DEFAULT_MODEL, OPENAI_REALTIME_URL,
};
use crate::core::realtime::{
    Modality, OPENAI_REALTIME_SAMPLE_RATE, OpenAIRealtimeVoice, RealtimeConfig, RemoteVadSettings,
    TurnMode,
};
use crate::core::stt::{OPENAI_TRANSCRIPTION_URL, WhisperApiConfig};
use crate::core::vad::SegmenterConfig;
use crate::engine::{BargeInSettings, EngineSettings};

/// Sample rate used for LocalVad capture when none is configured.
pub const LOCAL_VAD_DEFAULT_SAMPLE_RATE: u32 = 16000;

pub const DEFAULT_INSTRUCTIONS: &str = "You are a friendly multilingual voice assistant. \
Always answer in the language the user speaks. You can look up the weather, \
recommend dishes from the Dragon Phoenix House restaurant menu, and search \
and recommend books. Use the available functions for concrete questions. \
When the user clearly wants to end the conversation, say a short goodbye and \
call end_conversation. Keep replies brief, natural and warm.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    ReadFailed { path: String, message: String },

    #[error("{0}")]
    ParseFailed(String),

    #[error("Missing required configuration: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Resolved client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    // Realtime session
    pub openai_api_key: Option<Zeroizing<String>>,
    pub realtime_endpoint: String,
    pub model: String,
    pub voice: OpenAIRealtimeVoice,
    pub instructions: String,
    pub modalities: Vec<Modality>,
    pub input_transcription_model: Option<String>,
    pub temperature: Option<f32>,

    // Turn taking
    pub turn_mode: TurnMode,
    pub remote_vad: RemoteVadSettings,
    pub segmenter: SegmenterConfig,

    // Audio
    pub audio: AudioFormat,
    pub noise_gate: Option<f32>,
    pub gain: Option<f32>,
    pub full_duplex: bool,

    // Interruption
    pub keyboard_interrupt: bool,
    pub energy_barge_in: bool,
    pub barge_in: BargeInSettings,
    /// `None` never forces a re-arm
    pub suppression_timeout: Option<Duration>,
    pub cancel_send_timeout: Duration,

    // Session
    pub end_conversation_grace: Duration,
    pub frame_send_timeout: Duration,

    // Local transcription
    pub transcription_model: String,
    pub transcription_language: Option<String>,
    pub transcription_endpoint: String,
    pub transcription_timeout: Duration,

    // Tool data
    pub menu_path: Option<PathBuf>,
    pub books_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            realtime_endpoint: OPENAI_REALTIME_URL.to_string(),
            model: OPENAI_REALTIME_DEFAULT_MODEL.to_string(),
            voice: OpenAIRealtimeVoice::Shimmer,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            modalities: vec![Modality::Text, Modality::Audio],
            input_transcription_model: Some(OPENAI_INPUT_TRANSCRIPTION_MODEL.to_string()),
            temperature: None,
            turn_mode: TurnMode::RemoteVad,
            remote_vad: RemoteVadSettings::default(),
            segmenter: SegmenterConfig::default(),
            audio: AudioFormat::default(),
            noise_gate: None,
            gain: None,
            full_duplex: false,
            keyboard_interrupt: true,
            energy_barge_in: false,
            barge_in: BargeInSettings::default(),
            suppression_timeout: Some(Duration::from_millis(3000)),
            cancel_send_timeout: Duration::from_millis(500),
            end_conversation_grace: Duration::from_millis(2000),
            frame_send_timeout: Duration::from_millis(50),
            transcription_model: "whisper-1".to_string(),
            transcription_language: None,
            transcription_endpoint: OPENAI_TRANSCRIPTION_URL.to_string(),
            transcription_timeout: Duration::from_secs(30),
            menu_path: None,
            books_path: None,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("realtime_endpoint", &self.realtime_endpoint)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("modalities", &self.modalities)
            .field("turn_mode", &self.turn_mode)
            .field("remote_vad", &self.remote_vad)
            .field("segmenter", &self.segmenter)
            .field("audio", &self.audio)
            .field("full_duplex", &self.full_duplex)
            .field("keyboard_interrupt", &self.keyboard_interrupt)
            .field("energy_barge_in", &self.energy_barge_in)
            .field("suppression_timeout", &self.suppression_timeout)
            .field("end_conversation_grace", &self.end_conversation_grace)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Load configuration from environment variables only.
    ///
    /// Recognized variables:
    /// - `OPENAI_API_KEY`
    /// - `OPENAI_REALTIME_URL`, `OPENAI_REALTIME_MODEL`, `OPENAI_REALTIME_VOICE`
    /// - `TURN_MODE` (`remote_vad` | `local_vad`)
    /// - `FULL_DUPLEX`, `ENERGY_BARGE_IN`
    /// - `SUPPRESSION_TIMEOUT_MS` (`0` or `none` disables)
    /// - `END_CONVERSATION_GRACE_MS`
    /// - `TRANSCRIPTION_LANGUAGE`
    /// - `MENU_PATH`, `BOOKS_PATH`
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::merge(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file; environment variables fill what it leaves unset.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = YamlConfig::from_file(path)?;
        let config = Self::merge(Some(yaml))?;
        config.validate()?;
        Ok(config)
    }

    fn merge(yaml: Option<YamlConfig>) -> Result<Self, ConfigError> {
        let yaml = yaml.unwrap_or_default();
        let mut config = ClientConfig::default();

        // Realtime
        let realtime = yaml.realtime.unwrap_or_default();
        config.openai_api_key = realtime
            .api_key
            .or_else(|| env_string("OPENAI_API_KEY"))
            .filter(|k| !k.trim().is_empty())
            .map(Zeroizing::new);
        if let Some(endpoint) = realtime.endpoint.or_else(|| env_string("OPENAI_REALTIME_URL")) {
            config.realtime_endpoint = endpoint;
        }
        if let Some(model) = realtime.model.or_else(|| env_string("OPENAI_REALTIME_MODEL")) {
            config.model = model;
        }
        if let Some(voice) = realtime.voice.or_else(|| env_string("OPENAI_REALTIME_VOICE")) {
            config.voice = OpenAIRealtimeVoice::parse(&voice).ok_or_else(|| {
                ConfigError::invalid("realtime.voice", format!("unknown voice '{voice}'"))
            })?;
        }
        if let Some(instructions) = realtime.instructions {
            config.instructions = instructions;
        }
        if let Some(modalities) = realtime.modalities {
            config.modalities = modalities
                .iter()
                .map(|m| parse_modality(m))
                .collect::<Result<_, _>>()?;
        }
        if let Some(model) = realtime.input_transcription_model {
            config.input_transcription_model = (!model.is_empty()).then_some(model);
        }
        config.temperature = realtime.temperature;

        // Turn taking
        let turn = yaml.turn.unwrap_or_default();
        if let Some(mode) = turn.mode.or_else(|| env_string("TURN_MODE")) {
            config.turn_mode = parse_turn_mode(&mode)?;
        }
        if let Some(remote) = turn.remote {
            let defaults = RemoteVadSettings::default();
            config.remote_vad = RemoteVadSettings {
                threshold: remote.threshold.unwrap_or(defaults.threshold),
                prefix_padding_ms: remote.prefix_padding_ms.unwrap_or(defaults.prefix_padding_ms),
                silence_duration_ms: remote
                    .silence_duration_ms
                    .unwrap_or(defaults.silence_duration_ms),
            };
        }
        if let Some(local) = turn.local {
            let defaults = SegmenterConfig::default();
            config.segmenter = SegmenterConfig {
                energy_threshold: local.energy_threshold.unwrap_or(defaults.energy_threshold),
                silence_duration_secs: local
                    .silence_duration_secs
                    .unwrap_or(defaults.silence_duration_secs),
                min_speech_duration_secs: local
                    .min_speech_duration_secs
                    .unwrap_or(defaults.min_speech_duration_secs),
                pre_roll_ms: local.pre_roll_ms.unwrap_or(defaults.pre_roll_ms),
                ..defaults
            };
        }

        // Audio
        let audio = yaml.audio.unwrap_or_default();
        let default_input_rate = match config.turn_mode {
            TurnMode::RemoteVad => OPENAI_REALTIME_SAMPLE_RATE,
            TurnMode::LocalVad => LOCAL_VAD_DEFAULT_SAMPLE_RATE,
        };
        config.audio = AudioFormat {
            input_sample_rate: audio.input_sample_rate.unwrap_or(default_input_rate),
            output_sample_rate: audio
                .output_sample_rate
                .unwrap_or(OPENAI_REALTIME_SAMPLE_RATE),
            frame_samples: audio.frame_samples.unwrap_or(config.audio.frame_samples),
            playback_frame_samples: audio
                .playback_buffer_samples
                .unwrap_or(config.audio.playback_frame_samples),
        };
        config.segmenter.sample_rate = config.audio.input_sample_rate;
        config.segmenter.frame_samples = config.audio.frame_samples;
        config.noise_gate = audio.noise_gate;
        config.gain = audio.gain;
        if let Some(full_duplex) = audio.full_duplex.or(env_bool("FULL_DUPLEX")?) {
            config.full_duplex = full_duplex;
        }

        // Interruption
        let interruption = yaml.interruption.unwrap_or_default();
        if let Some(keyboard) = interruption.keyboard {
            config.keyboard_interrupt = keyboard;
        }
        if let Some(barge_in) = interruption.energy_barge_in.or(env_bool("ENERGY_BARGE_IN")?) {
            config.energy_barge_in = barge_in;
        }
        if let Some(threshold) = interruption.barge_in_threshold {
            config.barge_in.threshold = threshold;
        }
        if let Some(frames) = interruption.barge_in_min_frames {
            config.barge_in.min_frames = frames;
        }
        match interruption.suppression_timeout_ms {
            Some(ms) => config.suppression_timeout = timeout_ms(ms),
            None => {
                if let Some(raw) = env_string("SUPPRESSION_TIMEOUT_MS") {
                    config.suppression_timeout = parse_optional_ms("SUPPRESSION_TIMEOUT_MS", &raw)?;
                }
            }
        }
        if let Some(ms) = interruption.cancel_send_timeout_ms {
            config.cancel_send_timeout = Duration::from_millis(ms);
        }

        // Session
        let session = yaml.session.unwrap_or_default();
        if let Some(ms) = session
            .end_conversation_grace_ms
            .or(env_parse("END_CONVERSATION_GRACE_MS")?)
        {
            config.end_conversation_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = session.frame_send_timeout_ms {
            config.frame_send_timeout = Duration::from_millis(ms);
        }

        // Transcription
        let transcription = yaml.transcription.unwrap_or_default();
        if let Some(model) = transcription.model {
            config.transcription_model = model;
        }
        config.transcription_language = transcription
            .language
            .or_else(|| env_string("TRANSCRIPTION_LANGUAGE"));
        if let Some(endpoint) = transcription.endpoint {
            config.transcription_endpoint = endpoint;
        }
        if let Some(secs) = transcription.timeout_secs {
            config.transcription_timeout = Duration::from_secs(secs);
        }

        // Tools
        let tools = yaml.tools.unwrap_or_default();
        config.menu_path = tools.menu_path.or_else(|| env_string("MENU_PATH")).map(PathBuf::from);
        config.books_path = tools
            .books_path
            .or_else(|| env_string("BOOKS_PATH"))
            .map(PathBuf::from);

        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.openai_api_key.is_none() {
            return Err(ConfigError::MissingField(
                "OPENAI_API_KEY (or realtime.api_key)".to_string(),
            ));
        }
        if !self.realtime_endpoint.starts_with("ws://") && !self.realtime_endpoint.starts_with("wss://")
        {
            return Err(ConfigError::invalid(
                "realtime.endpoint",
                format!("must use ws:// or wss://, got '{}'", self.realtime_endpoint),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::invalid("realtime.model", "must not be empty"));
        }
        if self.modalities.is_empty() {
            return Err(ConfigError::invalid(
                "realtime.modalities",
                "at least one modality is required",
            ));
        }
        if !(0.0..=1.0).contains(&self.remote_vad.threshold) {
            return Err(ConfigError::invalid(
                "turn.remote.threshold",
                format!("must be within 0.0..=1.0, got {}", self.remote_vad.threshold),
            ));
        }
        if self.turn_mode == TurnMode::RemoteVad
            && self.audio.input_sample_rate != OPENAI_REALTIME_SAMPLE_RATE
        {
            return Err(ConfigError::invalid(
                "audio.input_sample_rate",
                format!(
                    "remote_vad streams capture as-is and needs {OPENAI_REALTIME_SAMPLE_RATE}Hz, got {}",
                    self.audio.input_sample_rate
                ),
            ));
        }
        if self.audio.output_sample_rate != OPENAI_REALTIME_SAMPLE_RATE {
            return Err(ConfigError::invalid(
                "audio.output_sample_rate",
                format!(
                    "response audio is {OPENAI_REALTIME_SAMPLE_RATE}Hz, got {}",
                    self.audio.output_sample_rate
                ),
            ));
        }
        if self.audio.frame_samples == 0 || self.audio.playback_frame_samples == 0 {
            return Err(ConfigError::invalid(
                "audio",
                "frame_samples and playback_buffer_samples must be positive",
            ));
        }
        if let Some(gain) = self.gain
            && !(gain.is_finite() && gain > 0.0)
        {
            return Err(ConfigError::invalid("audio.gain", format!("must be positive, got {gain}")));
        }
        if self.turn_mode == TurnMode::LocalVad {
            self.segmenter
                .validate()
                .map_err(|e| ConfigError::invalid("turn.local", e.to_string()))?;
        }
        if self.energy_barge_in && self.barge_in.min_frames == 0 {
            return Err(ConfigError::invalid(
                "interruption.barge_in_min_frames",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Settings for [`RealtimeConfig`]; tools are filled in by the engine.
    pub fn to_realtime_config(&self) -> Result<RealtimeConfig, ConfigError> {
        let api_key = self
            .openai_api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingField("OPENAI_API_KEY".to_string()))?;
        Ok(RealtimeConfig {
            api_key,
            endpoint: self.realtime_endpoint.clone(),
            model: self.model.clone(),
            voice: self.voice,
            instructions: Some(self.instructions.clone()),
            modalities: self.modalities.clone(),
            turn_mode: self.turn_mode,
            remote_vad: self.remote_vad,
            input_transcription_model: self.input_transcription_model.clone(),
            tools: Vec::new(),
            temperature: self.temperature,
        })
    }

    pub fn to_engine_settings(&self) -> EngineSettings {
        EngineSettings {
            turn_mode: self.turn_mode,
            segmenter: self.segmenter,
            preprocess: CapturePreprocessor::new(self.noise_gate, self.gain),
            full_duplex: self.full_duplex,
            energy_barge_in: self.energy_barge_in.then_some(self.barge_in),
            suppression_timeout: self.suppression_timeout,
            cancel_send_timeout: self.cancel_send_timeout,
            end_conversation_grace: self.end_conversation_grace,
            frame_send_timeout: self.frame_send_timeout,
            response_modalities: self.modalities.clone(),
            ..EngineSettings::default()
        }
    }

    /// Whisper API settings for LocalVad turns; shares the realtime key.
    pub fn to_whisper_config(&self) -> Result<WhisperApiConfig, ConfigError> {
        let api_key = self
            .openai_api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingField("OPENAI_API_KEY".to_string()))?;
        Ok(WhisperApiConfig {
            api_key,
            endpoint: self.transcription_endpoint.clone(),
            model: self.transcription_model.clone(),
            language: self.transcription_language.clone(),
            timeout: self.transcription_timeout,
        })
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    env_string(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::invalid(key, format!("'{raw}': {e}")))
        })
        .transpose()
}

fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = env_string(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::invalid(key, format!("'{raw}' is not a boolean"))),
    }
}

fn timeout_ms(ms: Option<u64>) -> Option<Duration> {
    ms.filter(|&ms| ms > 0).map(Duration::from_millis)
}

fn parse_optional_ms(key: &str, raw: &str) -> Result<Option<Duration>, ConfigError> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("none") || raw.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    let ms = raw
        .parse::<u64>()
        .map_err(|e| ConfigError::invalid(key, format!("'{raw}': {e}")))?;
    Ok(timeout_ms(Some(ms)))
}

fn parse_turn_mode(raw: &str) -> Result<TurnMode, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "remote_vad" | "remote" | "server_vad" => Ok(TurnMode::RemoteVad),
        "local_vad" | "local" => Ok(TurnMode::LocalVad),
        other => Err(ConfigError::invalid(
            "turn.mode",
            format!("expected remote_vad or local_vad, got '{other}'"),
        )),
    }
}

fn parse_modality(raw: &str) -> Result<Modality, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "text" => Ok(Modality::Text),
        "audio" => Ok(Modality::Audio),
        other => Err(ConfigError::invalid(
            "realtime.modalities",
            format!("unknown modality '{other}'"),
        )),
    }
}
