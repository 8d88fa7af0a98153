//! Conversation state reduction.
//!
//! Upstream sends loosely shaped partial states. [`ensure_valid_state`]
//! turns one into a well-formed [`RunState`]; [`Reducer`] merges it into the
//! session's state, detects genuinely new chat content, and derives the
//! correction to post back when the update names a run.

use std::collections::HashSet;

use log::debug;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::projector::{self, DisplayMessage};
pub use crate::jockey::{ChatMessage, DEFAULT_NEXT_WORKER, RunState, RunStatePatch};

const CHAT_HISTORY: &str = "chat_history";
const NEXT_WORKER: &str = "next_worker";
const MADE_PLAN: &str = "made_plan";
const ACTIVE_PLAN: &str = "active_plan";
const RUN_ID: &str = "run_id";

/// Normalize a raw update into a complete, valid run state.
///
/// Missing fields take their defaults, a scalar `chat_history` is wrapped in
/// a list, a blank `next_worker` becomes the planner and a blank
/// `active_plan` becomes no plan.
pub fn ensure_valid_state(update: &Map<String, Value>) -> RunState {
    let chat_history = match update.get(CHAT_HISTORY) {
        Some(Value::Array(items)) => items.iter().map(to_chat_message).collect(),
        Some(other) if is_truthy(other) => vec![to_chat_message(other)],
        _ => Vec::new(),
    };

    let next_worker = match update.get(NEXT_WORKER) {
        Some(Value::String(worker)) if !worker.is_empty() => worker.clone(),
        _ => DEFAULT_NEXT_WORKER.to_string(),
    };

    let made_plan = update
        .get(MADE_PLAN)
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let active_plan = match update.get(ACTIVE_PLAN) {
        None | Some(Value::Null) => None,
        Some(Value::String(plan)) if plan.is_empty() => None,
        Some(plan) => Some(plan.clone()),
    };

    RunState {
        chat_history,
        next_worker,
        made_plan,
        active_plan,
    }
}

/// Merge a raw update into `current`: fields present in the update win.
///
/// The result always satisfies the run state invariants, whatever the
/// update contains.
pub fn reduce(current: &RunState, update: &Map<String, Value>) -> RunState {
    let candidate = ensure_valid_state(update);
    let mut next = current.clone();

    if update.contains_key(CHAT_HISTORY) {
        next.chat_history = candidate.chat_history;
    }
    if update.contains_key(NEXT_WORKER) {
        next.next_worker = candidate.next_worker;
    }
    if update.contains_key(MADE_PLAN) {
        next.made_plan = candidate.made_plan;
    }
    if update.contains_key(ACTIVE_PLAN) {
        next.active_plan = candidate.active_plan;
    }

    if next.next_worker.is_empty() {
        next.next_worker = DEFAULT_NEXT_WORKER.to_string();
    }
    if next.active_plan.as_ref().and_then(Value::as_str) == Some("") {
        next.active_plan = None;
    }
    next
}

/// A correction to post upstream for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub run_id: String,
    pub values: RunStatePatch,
}

/// Build the correction for an update that carries a run id.
///
/// Only fields carrying information are included; when nothing qualifies
/// the patch falls back to the chat history, then to the defaults.
pub fn correction_for(update: &Map<String, Value>) -> Option<Correction> {
    let run_id = match update.get(RUN_ID) {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => return None,
    };

    let validated = ensure_valid_state(update);
    let mut values = RunStatePatch {
        chat_history: (!validated.chat_history.is_empty()).then(|| validated.chat_history.clone()),
        next_worker: Some(validated.next_worker.clone()),
        made_plan: Some(validated.made_plan),
        active_plan: validated.active_plan.clone(),
    };

    if values.is_empty() {
        if validated.chat_history.is_empty() {
            values.made_plan = Some(false);
            values.next_worker = Some(DEFAULT_NEXT_WORKER.to_string());
        } else {
            values.chat_history = Some(validated.chat_history);
        }
    }

    (!values.is_empty()).then_some(Correction { run_id, values })
}

/// Outcome of applying one update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reduction {
    /// Message to show, present only when the update added unseen content.
    pub display: Option<DisplayMessage>,
    /// Correction to post upstream, present when the update names a run.
    pub correction: Option<Correction>,
}

/// Per-session reducer owning the authoritative run state.
#[derive(Debug)]
pub struct Reducer {
    state: RunState,
    last_chat_length: usize,
    seen_content: HashSet<String>,
}

impl Reducer {
    pub fn new(state: RunState) -> Self {
        Self {
            state,
            last_chat_length: 0,
            seen_content: HashSet::new(),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Apply a data update to the session state.
    pub fn apply(&mut self, update: &Map<String, Value>) -> Reduction {
        self.state = reduce(&self.state, update);

        let mut display = None;
        if update.contains_key(CHAT_HISTORY) {
            let history = &self.state.chat_history;
            if history.len() > self.last_chat_length {
                let mut new_content = false;
                for message in &history[self.last_chat_length..] {
                    if self.seen_content.insert(content_hash(&message.content)) {
                        new_content = true;
                    }
                }

                if new_content {
                    self.last_chat_length = history.len();
                    display = projector::project_state(&self.state);
                } else {
                    debug!("Chat history grew without new content; nothing to display");
                }
            }
        }

        Reduction {
            display,
            correction: correction_for(update),
        }
    }
}

fn content_hash(content: &Value) -> String {
    hex::encode(Sha256::digest(content.to_string().as_bytes()))
}

fn to_chat_message(value: &Value) -> ChatMessage {
    serde_json::from_value(value.clone()).unwrap_or_else(|_| ChatMessage {
        content: value.clone(),
        ..Default::default()
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}
