//! Transcription of locally segmented utterances.
//!
//! The engine treats transcription as an opaque call:
//! `transcribe(samples) -> (text, language)`. Two implementations ship:
//!
//! - [`WhisperApiTranscriber`] posts WAV audio to the OpenAI transcription API
//! - [`BlockingTranscriber`] runs any blocking closure (a local model) on the
//!   blocking thread pool

mod whisper;

pub use whisper::{OPENAI_TRANSCRIPTION_URL, WhisperApiConfig, WhisperApiTranscriber};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by transcribers.
#[derive(Debug, Error)]
pub enum TranscribeError {
    /// The request could not be completed
    #[error("Transcription request failed: {0}")]
    RequestFailed(String),

    /// The service answered with something unusable
    #[error("Bad transcription response: {0}")]
    BadResponse(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Samples could not be encoded
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),
}

pub type TranscribeResult<T> = Result<T, TranscribeError>;

/// Recognized text of one utterance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    /// Detected or configured language, when known
    pub language: Option<String>,
}

impl Transcription {
    pub fn new(text: impl Into<String>, language: Option<String>) -> Self {
        Self {
            text: text.into(),
            language,
        }
    }

    /// True when there is nothing worth sending.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Converts finished utterance samples to text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, samples: &[i16], sample_rate: u32) -> TranscribeResult<Transcription>;

    fn name(&self) -> &str {
        "transcriber"
    }
}

type BlockingFn = dyn Fn(&[i16], u32) -> TranscribeResult<Transcription> + Send + Sync;

/// Adapter for blocking transcription backends.
#[derive(Clone)]
pub struct BlockingTranscriber {
    name: String,
    func: Arc<BlockingFn>,
}

impl BlockingTranscriber {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[i16], u32) -> TranscribeResult<Transcription> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl std::fmt::Debug for BlockingTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingTranscriber")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl Transcriber for BlockingTranscriber {
    async fn transcribe(&self, samples: &[i16], sample_rate: u32) -> TranscribeResult<Transcription> {
        let func = self.func.clone();
        let samples = samples.to_vec();
        tokio::task::spawn_blocking(move || func(&samples, sample_rate))
            .await
            .map_err(|e| TranscribeError::RequestFailed(format!("transcription task failed: {e}")))?
    }

    fn name(&self) -> &str {
        &self.name
    }
}
