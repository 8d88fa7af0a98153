//! Projection of run state into user-facing display messages.
//!
//! Most of what the upstream graph produces is internal bookkeeping. Only a
//! handful of shapes are shown to the user; everything else projects to
//! `None` and is dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::jockey::RunState;

/// Maximum number of JSON-string layers peeled off message content.
pub const MAX_JSON_UNWRAP_DEPTH: usize = 5;

/// Strings that name a stream channel rather than carry content.
const CONTROL_TOKENS: [&str; 2] = ["values", "metadata"];

/// Actors whose human-typed messages are narrated to the user.
const NARRATORS: [&str; 2] = ["instructor", "planner"];

const TOOL_CALL_TYPE: &str = "tool_call";
const COMBINE_CLIPS_TOOL: &str = "combine-clips";
const VIDEO_SEARCH_TOOL: &str = "simple-video-search";

pub const CONNECTING_TEXT: &str = "Connecting to Jockey server...";
pub const COMPLETE_TEXT: &str = "Processing complete.";
pub const AI_MASK_TEXT: &str = "✨ AI processing complete.";
pub const VIDEO_READY_TEXT: &str = "🎥 Your video is ready!";
pub const VIDEO_SEARCH_TEXT: &str = "🔍 Analyzing videos to find the perfect clip...";
const NARRATION_PREFIX: &str = "🎬\n\n";

const COMPLETE_NAME: &str = "complete";
pub const UPSTREAM_ERROR_NAME: &str = "upstream-error";

/// A message as shown to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMessage {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// JSON-encoded auxiliary payload (the raw tool call for "video-ready").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl DisplayMessage {
    fn new(text: impl Into<String>, kind: &str, name: Option<&str>) -> Self {
        Self {
            text: text.into(),
            kind: kind.to_string(),
            name: name.map(str::to_string),
            data: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(text, "system", None)
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self::new(text, "system", Some("status"))
    }

    /// Terminal error: the session ends with it.
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(text, "error", None)
    }

    /// Error notice reported by upstream while the run keeps streaming.
    pub fn upstream_error(text: impl Into<String>) -> Self {
        Self::new(text, "error", Some(UPSTREAM_ERROR_NAME))
    }

    pub fn connecting() -> Self {
        Self::status(CONNECTING_TEXT)
    }

    pub fn complete() -> Self {
        Self::new(COMPLETE_TEXT, "system", Some(COMPLETE_NAME))
    }

    fn video_ready(tool_call: &Value) -> Self {
        Self {
            data: Some(Value::Array(vec![tool_call.clone()]).to_string()),
            ..Self::new(VIDEO_READY_TEXT, "system", Some("video-ready"))
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == "error"
    }

    /// Whether this message ends its session (completion or terminal error).
    pub fn is_terminal(&self) -> bool {
        match self.name.as_deref() {
            Some(COMPLETE_NAME) => true,
            None => self.is_error(),
            Some(_) => false,
        }
    }
}

/// Result of peeling JSON-string layers off a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Unwrapped {
    /// Decoding reached a non-string JSON value.
    Value(Value),
    /// Text that does not decode further (or the depth limit was reached).
    Text(String),
}

/// Decode `raw` as JSON repeatedly while the result is still a string, at
/// most `max_depth` times.
pub fn unwrap_json_string(raw: &str, max_depth: usize) -> Unwrapped {
    let mut current = raw.to_string();
    for _ in 0..max_depth {
        match serde_json::from_str::<Value>(&current) {
            Ok(Value::String(inner)) => current = inner,
            Ok(value) => return Unwrapped::Value(value),
            Err(_) => break,
        }
    }
    Unwrapped::Text(current)
}

/// Project a raw stream item: an event name, a plain line, or a JSON object.
pub fn project(value: &Value) -> Option<DisplayMessage> {
    match value {
        Value::String(text) => project_text(text),
        Value::Object(map) => project_object(map),
        _ => None,
    }
}

/// Project the most recent displayable chat message of a run state.
pub fn project_state(state: &RunState) -> Option<DisplayMessage> {
    let message = state
        .chat_history
        .iter()
        .rev()
        .find(|msg| msg.kind != "system" && msg.has_content())?;

    let kind = if message.kind.is_empty() {
        "unknown"
    } else {
        message.kind.as_str()
    };
    project_message(kind, message.name.as_deref(), &message.content)
}

fn project_text(text: &str) -> Option<DisplayMessage> {
    let token = text.trim().to_lowercase();
    if CONTROL_TOKENS.contains(&token.as_str()) {
        return None;
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => project_object(&map),
        Ok(_) => None,
        Err(_) => Some(DisplayMessage::system(text)),
    }
}

fn project_object(map: &Map<String, Value>) -> Option<DisplayMessage> {
    let content = map.get("content")?;
    let kind = map.get("type").and_then(Value::as_str).unwrap_or_default();
    let name = map.get("name").and_then(Value::as_str);
    project_message(kind, name, content)
}

fn project_message(kind: &str, name: Option<&str>, content: &Value) -> Option<DisplayMessage> {
    if is_blank(content) {
        return None;
    }

    if kind == "human" && name.is_some_and(|n| NARRATORS.contains(&n)) {
        let body = match content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Some(DisplayMessage::new(
            format!("{}{}", NARRATION_PREFIX, body),
            kind,
            name,
        ));
    }

    // AI output is never shown verbatim.
    if kind == "ai" {
        return Some(DisplayMessage::new(AI_MASK_TEXT, kind, name));
    }

    let decoded;
    let content = match content {
        Value::String(raw) => match unwrap_json_string(raw, MAX_JSON_UNWRAP_DEPTH) {
            Unwrapped::Value(value) => {
                decoded = value;
                &decoded
            }
            Unwrapped::Text(_) => return None,
        },
        other => other,
    };

    content.as_array()?.iter().find_map(project_tool_call)
}

fn project_tool_call(item: &Value) -> Option<DisplayMessage> {
    if item.get("type").and_then(Value::as_str) != Some(TOOL_CALL_TYPE) {
        return None;
    }
    match item.get("name").and_then(Value::as_str)? {
        COMBINE_CLIPS_TOOL => Some(DisplayMessage::video_ready(item)),
        VIDEO_SEARCH_TOOL => Some(DisplayMessage::status(VIDEO_SEARCH_TEXT)),
        _ => None,
    }
}

/// Falsy content: null, false, zero, or an empty string/array/object.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}
