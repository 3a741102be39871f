//! Name-to-tool registry.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, warn};

use super::books::{BookCatalog, SearchBooksTool};
use super::menu::{MenuCatalog, QueryMenuTool};
use super::session::EndConversationTool;
use super::weather::GetWeatherTool;
use super::{Tool, ToolError, ToolResult};
use crate::core::realtime::ToolDef;

/// Result of one dispatched call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// JSON object sent back as the function call output
    pub output: Value,
    /// The call ended the conversation
    pub terminates: bool,
    pub is_error: bool,
}

impl ToolOutcome {
    fn error(err: &ToolError) -> Self {
        let message = match err {
            ToolError::UnknownTool(name) => format!("unknown function: {name}"),
            other => format!("function execution error: {other}"),
        };
        Self {
            output: json!({ "error": message }),
            terminates: false,
            is_error: true,
        }
    }

    /// JSON text for `function_call_output`.
    pub fn output_json(&self) -> String {
        self.output.to_string()
    }
}

/// Fixed registry of tools, snapshotted into the session configuration.
#[derive(Clone)]
pub struct ToolDispatcher {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolDispatcher {
    /// An empty registry.
    pub fn empty() -> Self {
        Self { tools: Vec::new() }
    }

    /// The four standard tools with the built-in catalogues.
    pub fn standard() -> ToolResult<Self> {
        Self::with_catalogs(None, None)
    }

    /// The four standard tools, optionally reading catalogues from disk.
    pub fn with_catalogs(menu_path: Option<&Path>, books_path: Option<&Path>) -> ToolResult<Self> {
        let menu = match menu_path {
            Some(path) => MenuCatalog::from_path(path)?,
            None => MenuCatalog::builtin()?,
        };
        let books = match books_path {
            Some(path) => BookCatalog::from_path(path)?,
            None => BookCatalog::builtin()?,
        };
        Ok(Self::empty()
            .register(EndConversationTool)
            .register(GetWeatherTool)
            .register(QueryMenuTool::new(menu))
            .register(SearchBooksTool::new(books)))
    }

    /// Add a tool; a later tool with the same name replaces the earlier one.
    pub fn register<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Whether calling `name` ends the conversation.
    pub fn is_terminating(&self, name: &str) -> bool {
        self.find(name).is_some_and(|t| t.terminates_conversation())
    }

    /// Schemas for `session.update`.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Run `name` with the raw JSON argument string. Never fails.
    pub fn dispatch(&self, name: &str, arguments_json: &str) -> ToolOutcome {
        let Some(tool) = self.find(name) else {
            warn!(tool = name, "Unknown function requested");
            return ToolOutcome::error(&ToolError::UnknownTool(name.to_string()));
        };

        let arguments = if arguments_json.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str::<Value>(arguments_json) {
                Ok(v) => v,
                Err(e) => {
                    let err = ToolError::InvalidArguments(format!("arguments are not JSON: {e}"));
                    warn!(tool = name, "{}", err);
                    return ToolOutcome::error(&err);
                }
            }
        };

        match tool.call(arguments) {
            Ok(output) => {
                debug!(tool = name, "Function executed");
                ToolOutcome {
                    output,
                    terminates: tool.terminates_conversation(),
                    is_error: false,
                }
            }
            Err(err) => {
                warn!(tool = name, error = %err, "Function failed");
                ToolOutcome::error(&err)
            }
        }
    }
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("tools", &self.names())
            .finish()
    }
}
