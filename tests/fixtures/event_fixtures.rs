//! Server event fixtures
//!
//! Events are built from the wire JSON so tests exercise the same
//! deserialization path as a live session.

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde_json::{Value, json};

use waav_duplex::core::realtime::ServerEvent;

use super::audio_fixtures::constant_frame;

pub fn event(value: Value) -> ServerEvent {
    serde_json::from_value(value).expect("fixture must deserialize")
}

pub fn session_created(id: &str) -> ServerEvent {
    event(json!({
        "type": "session.created",
        "session": { "id": id, "model": "gpt-4o-realtime-preview" }
    }))
}

pub fn session_updated(id: &str) -> ServerEvent {
    event(json!({
        "type": "session.updated",
        "session": { "id": id }
    }))
}

pub fn speech_started() -> ServerEvent {
    event(json!({
        "type": "input_audio_buffer.speech_started",
        "audio_start_ms": 120,
        "item_id": "item_user"
    }))
}

pub fn response_created(response_id: &str) -> ServerEvent {
    event(json!({
        "type": "response.created",
        "response": { "id": response_id, "status": "in_progress" }
    }))
}

pub fn response_done(response_id: &str, status: &str) -> ServerEvent {
    event(json!({
        "type": "response.done",
        "response": { "id": response_id, "status": status }
    }))
}

pub fn response_cancelled(response_id: &str) -> ServerEvent {
    event(json!({
        "type": "response.cancelled",
        "response_id": response_id
    }))
}

/// Base64 of `samples` PCM16 samples all equal to `value`.
pub fn audio_payload(samples: usize, value: i16) -> String {
    BASE64_STANDARD.encode(constant_frame(samples, value))
}

pub fn audio_delta(response_id: &str, samples: usize, value: i16) -> ServerEvent {
    event(json!({
        "type": "response.audio.delta",
        "response_id": response_id,
        "item_id": "item_audio",
        "delta": audio_payload(samples, value)
    }))
}

pub fn audio_done(response_id: &str) -> ServerEvent {
    event(json!({
        "type": "response.audio.done",
        "response_id": response_id,
        "item_id": "item_audio"
    }))
}

pub fn transcript_done(response_id: &str, transcript: &str) -> ServerEvent {
    event(json!({
        "type": "response.audio_transcript.done",
        "response_id": response_id,
        "item_id": "item_audio",
        "transcript": transcript
    }))
}

pub fn function_item_added(response_id: &str, call_id: &str, name: &str) -> ServerEvent {
    event(json!({
        "type": "response.output_item.added",
        "response_id": response_id,
        "output_index": 0,
        "item": {
            "id": format!("item_{call_id}"),
            "type": "function_call",
            "call_id": call_id,
            "name": name
        }
    }))
}

/// `name` is omitted from the event when `None`.
pub fn function_call_done(
    response_id: &str,
    call_id: &str,
    name: Option<&str>,
    arguments: Value,
) -> ServerEvent {
    let mut value = json!({
        "type": "response.function_call_arguments.done",
        "response_id": response_id,
        "item_id": format!("item_{call_id}"),
        "call_id": call_id,
        "arguments": arguments.to_string()
    });
    if let Some(name) = name {
        value["name"] = json!(name);
    }
    event(value)
}

pub fn function_output_created(call_id: &str) -> ServerEvent {
    event(json!({
        "type": "conversation.item.created",
        "item": {
            "id": format!("item_out_{call_id}"),
            "type": "function_call_output",
            "call_id": call_id,
            "output": "{}"
        }
    }))
}

pub fn error_event(message: &str, code: Option<&str>, event_id: Option<&str>) -> ServerEvent {
    event(json!({
        "type": "error",
        "error": {
            "type": "invalid_request_error",
            "code": code,
            "message": message,
            "event_id": event_id
        }
    }))
}
