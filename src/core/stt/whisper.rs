//! OpenAI transcription API client.
//!
//! - Endpoint: `POST https://api.openai.com/v1/audio/transcriptions`
//! - Body: multipart form with a WAV `file`, `model` and `response_format`
//! - Response: `verbose_json`, which carries the detected language

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::{TranscribeError, TranscribeResult, Transcriber, Transcription};

/// Default transcription endpoint.
pub const OPENAI_TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Settings for [`WhisperApiTranscriber`].
#[derive(Clone)]
pub struct WhisperApiConfig {
    pub api_key: Zeroizing<String>,
    pub endpoint: String,
    /// Model name (e.g., "whisper-1")
    pub model: String,
    /// ISO-639-1 hint; detected when unset
    pub language: Option<String>,
    pub timeout: Duration,
}

impl Default for WhisperApiConfig {
    fn default() -> Self {
        Self {
            api_key: Zeroizing::new(String::new()),
            endpoint: OPENAI_TRANSCRIPTION_URL.to_string(),
            model: "whisper-1".to_string(),
            language: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for WhisperApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperApiConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("language", &self.language)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTranscriptionResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
    #[serde(rename = "type", default)]
    error_type: String,
}

/// Transcriber backed by the OpenAI transcription API.
pub struct WhisperApiTranscriber {
    config: WhisperApiConfig,
    http_client: reqwest::Client,
}

impl WhisperApiTranscriber {
    pub fn new(config: WhisperApiConfig) -> TranscribeResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(TranscribeError::AuthenticationFailed(
                "API key is required for the transcription API".to_string(),
            ));
        }
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TranscribeError::RequestFailed(format!("HTTP client: {e}")))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &WhisperApiConfig {
        &self.config
    }
}

/// Encode mono PCM16 samples as an in-memory WAV file.
pub(crate) fn encode_wav(samples: &[i16], sample_rate: u32) -> TranscribeResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| TranscribeError::InvalidAudio(e.to_string()))?;
        for sample in samples {
            writer
                .write_sample(*sample)
                .map_err(|e| TranscribeError::InvalidAudio(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| TranscribeError::InvalidAudio(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

#[async_trait]
impl Transcriber for WhisperApiTranscriber {
    async fn transcribe(&self, samples: &[i16], sample_rate: u32) -> TranscribeResult<Transcription> {
        if samples.is_empty() {
            return Err(TranscribeError::InvalidAudio("no samples".to_string()));
        }
        let wav_data = encode_wav(samples, sample_rate)?;
        info!(
            bytes = wav_data.len(),
            model = %self.config.model,
            "Sending utterance to transcription API"
        );

        let file_part = Part::bytes(wav_data)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscribeError::InvalidAudio(format!("Invalid MIME type: {e}")))?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json");
        if let Some(language) = &self.config.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .http_client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key.as_str()))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscribeError::RequestFailed(format!("Request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TranscribeError::RequestFailed(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<OpenAIErrorResponse>(&body) {
                Ok(err) => format!("{} ({})", err.error.message, err.error.error_type),
                Err(_) => format!("{status}: {body}"),
            };
            return Err(if status.as_u16() == 401 {
                TranscribeError::AuthenticationFailed(message)
            } else {
                TranscribeError::RequestFailed(message)
            });
        }

        let parsed: VerboseTranscriptionResponse = serde_json::from_str(&body)
            .map_err(|e| TranscribeError::BadResponse(format!("Failed to parse response: {e}")))?;

        debug!(
            chars = parsed.text.len(),
            duration = ?parsed.duration,
            language = ?parsed.language,
            "Transcription complete"
        );

        Ok(Transcription {
            text: parsed.text.trim().to_string(),
            language: parsed.language.or_else(|| self.config.language.clone()),
        })
    }

    fn name(&self) -> &str {
        "openai-whisper"
    }
}
