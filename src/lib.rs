pub mod config;
pub mod core;
pub mod engine;

// Re-export commonly used items for convenience
pub use config::{ClientConfig, ConfigError};
pub use core::*;
pub use engine::{
    ConversationEvent, DuplexEngine, EngineError, EngineResult, EngineSettings, InterruptReason,
    SessionSummary,
};
