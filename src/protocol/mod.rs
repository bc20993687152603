//! Hook wire format: decode one request from the host, encode one response.

pub mod tool_input;

pub use tool_input::{EditOp, ToolInput};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::eval::HookResponse;

/// Exit code for an approved operation (stdout shown in the transcript).
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for a non-blocking failure (protocol error, engine error, timeout).
pub const EXIT_ERROR: i32 = 1;
/// Exit code for a blocked operation (stderr is fed back to the agent).
pub const EXIT_BLOCKING: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    PreToolUse,
    PostToolUse,
    Notification,
    Stop,
    SubagentStop,
    PreCompact,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::PreToolUse,
        EventType::PostToolUse,
        EventType::Notification,
        EventType::Stop,
        EventType::SubagentStop,
        EventType::PreCompact,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::PreToolUse => "PreToolUse",
            EventType::PostToolUse => "PostToolUse",
            EventType::Notification => "Notification",
            EventType::Stop => "Stop",
            EventType::SubagentStop => "SubagentStop",
            EventType::PreCompact => "PreCompact",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }

    /// Events that carry `tool_name` and `tool_input`.
    pub fn is_tool_event(self) -> bool {
        matches!(self, EventType::PreToolUse | EventType::PostToolUse)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty hook input")]
    Empty,
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("hook input is not a JSON object")]
    NotAnObject,
    #[error("missing hook_event_name")]
    MissingEvent,
    #[error("unknown hook event type: {0}")]
    UnknownEvent(String),
    #[error("{event} message missing required field `{field}`")]
    MissingField {
        event: EventType,
        field: &'static str,
    },
}

/// A decoded hook request. Immutable once built.
#[derive(Debug, Clone)]
pub struct HookMessage {
    pub session_id: String,
    pub transcript_path: String,
    pub event_type: EventType,
    /// Present for tool events; empty otherwise.
    pub tool_name: String,
    pub tool_input: ToolInput,
    pub tool_output: Option<Value>,
    pub tool_error: Option<String>,
    /// Event-specific fields for non-tool events (notification text, stop reason, ...).
    pub details: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    transcript_path: String,
    hook_event_name: Option<String>,
    tool_name: Option<String>,
    #[serde(default)]
    tool_input: Value,
    #[serde(default)]
    tool_output: Option<Value>,
    #[serde(default)]
    tool_error: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, Value>,
}

/// Decode a raw request document.
///
/// This is the only place request shape is validated: malformed JSON, a
/// missing or unknown event name, or a tool event without `tool_name` are
/// errors. Anything finer-grained (tool input shape) degrades to
/// [`ToolInput::Other`] instead.
pub fn decode(bytes: &[u8]) -> Result<HookMessage, ProtocolError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ProtocolError::Empty);
    }
    let value: Value = serde_json::from_slice(bytes)?;
    if !value.is_object() {
        return Err(ProtocolError::NotAnObject);
    }
    let raw: RawMessage = serde_json::from_value(value)?;

    let name = raw.hook_event_name.ok_or(ProtocolError::MissingEvent)?;
    let event_type = EventType::parse(&name).ok_or(ProtocolError::UnknownEvent(name))?;

    let tool_name = match (event_type.is_tool_event(), raw.tool_name) {
        (true, Some(name)) if !name.is_empty() => name,
        (true, _) => {
            return Err(ProtocolError::MissingField {
                event: event_type,
                field: "tool_name",
            });
        }
        (false, name) => name.unwrap_or_default(),
    };

    let tool_input = ToolInput::from_value(&tool_name, raw.tool_input);
    let tool_error = raw.tool_error.filter(|e| !e.is_empty());

    Ok(HookMessage {
        session_id: raw.session_id,
        transcript_path: raw.transcript_path,
        event_type,
        tool_name,
        tool_input,
        tool_output: raw.tool_output,
        tool_error,
        details: raw.rest,
    })
}

/// Serialize a response as a single JSON line.
pub fn encode_response(response: &HookResponse) -> String {
    // HookResponse contains only strings, bools and an enum: serialization cannot fail.
    serde_json::to_string(response).unwrap_or_else(|_| String::from("{}"))
}
