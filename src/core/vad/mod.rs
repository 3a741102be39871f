//! Local voice activity detection.
//!
//! Used only when turns are segmented on the client. Frames are classified
//! by RMS energy and grouped into utterances bounded by silence, which are
//! then handed to a [`Transcriber`](crate::core::stt::Transcriber).
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_duplex::core::vad::{SegmenterConfig, SegmenterEvent, UtteranceSegmenter};
//!
//! let mut segmenter = UtteranceSegmenter::new(SegmenterConfig::default());
//! if let Some(SegmenterEvent::UtteranceReady(utterance)) = segmenter.push_frame(frame) {
//!     transcriber.transcribe(&utterance.samples(), utterance.sample_rate()).await?;
//! }
//! ```

pub mod config;
mod segmenter;

pub use config::SegmenterConfig;
pub use segmenter::{SegmenterEvent, Utterance, UtteranceSegmenter};
