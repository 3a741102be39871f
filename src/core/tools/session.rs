use serde::Deserialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{Tool, ToolError, ToolResult, parse_args};

pub const END_CONVERSATION: &str = "end_conversation";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

/// Ends the conversation after the assistant's closing words.
#[derive(Debug, Default, Clone, Copy)]
pub struct EndConversationTool;

impl Tool for EndConversationTool {
    fn name(&self) -> &'static str {
        END_CONVERSATION
    }

    fn description(&self) -> &'static str {
        "End the conversation. Call this when the user clearly wants to stop, says goodbye, or the conversation is complete."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn call(&self, arguments: Value) -> ToolResult<Value> {
        let NoArgs {} = parse_args(arguments)?;
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(json!({
            "status": "conversation_ended",
            "message": "Goodbye! Have a wonderful day!",
            "timestamp": timestamp
        }))
    }

    fn terminates_conversation(&self) -> bool {
        true
    }
}
