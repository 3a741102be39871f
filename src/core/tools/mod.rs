//! Local functions the remote assistant can call.
//!
//! Each [`Tool`] declares its JSON-schema parameters, which are sent with
//! the session configuration, and accepts exactly those arguments. The
//! [`ToolDispatcher`] never fails: unknown names and bad arguments come
//! back as structured `{"error": ...}` results so the conversation carries
//! on.

mod books;
mod dispatcher;
mod menu;
mod session;
mod weather;

pub use books::{Book, BookCatalog, SearchBooksTool};
pub use dispatcher::{ToolDispatcher, ToolOutcome};
pub use menu::{Dish, MenuCatalog, MenuCategory, QueryMenuTool, SpicyLevel};
pub use session::{END_CONVERSATION, EndConversationTool};
pub use weather::{GetWeatherTool, WeatherCondition, WeatherDate};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::core::realtime::ToolDef;

/// Errors raised while executing a tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown function: {0}")]
    UnknownTool(String),

    /// Arguments did not match the declared schema
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Backing data could not be loaded
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("{0}")]
    Execution(String),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// A function exposed to the assistant.
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the argument object.
    fn parameters(&self) -> Value;

    /// Run the tool. Arguments are the already-parsed JSON object.
    fn call(&self, arguments: Value) -> ToolResult<Value>;

    /// Whether a call ends the conversation.
    fn terminates_conversation(&self) -> bool {
        false
    }

    fn definition(&self) -> ToolDef {
        ToolDef {
            tool_type: "function".to_string(),
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            parameters: Some(self.parameters()),
        }
    }
}

/// Deserialize an argument object, treating `null` as `{}`.
pub(crate) fn parse_args<T: DeserializeOwned>(arguments: Value) -> ToolResult<T> {
    let arguments = if arguments.is_null() {
        Value::Object(Default::default())
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
