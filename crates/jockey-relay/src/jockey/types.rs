//! Jockey API types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Worker the upstream graph falls back to when no other worker is named.
pub const DEFAULT_NEXT_WORKER: &str = "planner";

/// How the upstream run should stream its progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    #[default]
    Messages,
    Events,
    Values,
    All,
}

impl StreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamMode::Messages => "messages",
            StreamMode::Events => "events",
            StreamMode::Values => "values",
            StreamMode::All => "all",
        }
    }
}

/// One chat turn in a run's history.
///
/// `content` is kept as raw JSON: upstream sends plain strings, JSON encoded
/// strings and lists of tool-call records interchangeably. Unknown fields
/// (ids, kwargs, metadata) are carried through untouched so corrections sent
/// back upstream do not lose them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    /// Build the opening user message for a run.
    pub fn user(content: impl Into<String>) -> Self {
        let mut extra = Map::new();
        extra.insert("additional_kwargs".to_string(), Value::Object(Map::new()));
        extra.insert("response_metadata".to_string(), Value::Object(Map::new()));
        extra.insert(
            "id".to_string(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
        extra.insert("example".to_string(), Value::Bool(false));

        Self {
            kind: "user".to_string(),
            content: Value::String(content.into()),
            name: Some(String::new()),
            extra,
        }
    }

    /// Whether the message carries any content worth looking at.
    pub fn has_content(&self) -> bool {
        match &self.content {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            _ => true,
        }
    }
}

/// Authoritative conversation state for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub chat_history: Vec<ChatMessage>,
    pub next_worker: String,
    pub made_plan: bool,
    pub active_plan: Option<Value>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            chat_history: Vec::new(),
            next_worker: DEFAULT_NEXT_WORKER.to_string(),
            made_plan: false,
            active_plan: None,
        }
    }
}

impl RunState {
    /// Initial state for a new run: a single user turn addressed to the planner.
    pub fn initial(index_id: &str, text: &str) -> Self {
        Self {
            chat_history: vec![ChatMessage::user(format!("{} {}", index_id, text))],
            ..Self::default()
        }
    }
}

/// Partial state sent back upstream as a run correction.
///
/// Only fields carrying information are serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_history: Option<Vec<ChatMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_worker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub made_plan: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_plan: Option<Value>,
}

impl RunStatePatch {
    pub fn is_empty(&self) -> bool {
        self.chat_history.is_none()
            && self.next_worker.is_none()
            && self.made_plan.is_none()
            && self.active_plan.is_none()
    }
}

/// Body of `POST /runs/stream`.
#[derive(Debug, Clone, Serialize)]
pub struct RunStreamBody<'a> {
    pub assistant_id: &'a str,
    pub index_id: &'a str,
    pub thread_id: &'a str,
    pub input: &'a RunState,
}

/// Query string of `POST /runs/stream`.
#[derive(Debug, Clone, Serialize)]
pub struct RunStreamQuery<'a> {
    #[serde(rename = "streamMode")]
    pub stream_mode: &'a str,
    pub thread_id: &'a str,
    pub index_id: &'a str,
}

/// Body of `POST /runs?run_id=..`.
#[derive(Debug, Clone, Serialize)]
pub struct RunUpdateBody<'a> {
    pub values: &'a RunStatePatch,
}

/// Everything needed to start one upstream run.
#[derive(Debug, Clone)]
pub struct RunTarget {
    pub assistant_id: String,
    pub index_id: String,
    pub thread_id: String,
    pub stream_mode: StreamMode,
    pub input: RunState,
}

/// Assistant descriptor returned by `POST /assistants/search`.
///
/// The upstream schema is loose; anything beyond the id is passed through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantInfo {
    #[serde(default)]
    pub assistant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
