//! Line classification for the upstream run stream.
//!
//! The run stream is SSE-like but not strict SSE: besides `event: ` and
//! `data: ` lines the server interleaves heartbeats, bare error notices and
//! free-form text. Each line is classified on its own; the only state kept
//! across lines is the first-seen dedup of event names and plain lines.

use std::collections::HashSet;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Keep-alive line sent by the upstream server.
pub const HEARTBEAT_LINE: &str = ": heartbeat";

/// Lowercase marker of an upstream error notice.
const ERROR_MARKER: &str = ": error";

const EVENT_PREFIX: &str = "event: ";
const DATA_PREFIX: &str = "data: ";

/// Shape of a single line, before any session state is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// Empty line or heartbeat.
    Ignored,
    /// Error notice; carries the whole line.
    Error(&'a str),
    /// `event: <name>`; carries the name.
    EventMarker(&'a str),
    /// `data: <payload>`; carries the payload.
    Data(&'a str),
    /// Anything else.
    Plain(&'a str),
}

/// One line of the run stream after classification and dedup.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    EventMarker(String),
    Data(Map<String, Value>),
    Error(String),
    Plain(String),
}

/// A `data: ` payload that could not be used as a state update.
#[derive(Debug, Error)]
pub enum DataLineError {
    #[error("invalid JSON in data line: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("data line is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

/// Classify a raw line. Rules apply in order; the first match wins.
pub fn classify_line(line: &str) -> LineKind<'_> {
    let line = line.trim();

    if line.is_empty() || line == HEARTBEAT_LINE {
        return LineKind::Ignored;
    }
    if line.to_lowercase().contains(ERROR_MARKER) {
        return LineKind::Error(line);
    }
    if let Some(name) = line.strip_prefix(EVENT_PREFIX) {
        return LineKind::EventMarker(name.trim());
    }
    if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
        return LineKind::Data(payload.trim());
    }
    LineKind::Plain(line)
}

/// Decode a data payload into a JSON object.
pub fn decode_data(payload: &str) -> Result<Map<String, Value>, DataLineError> {
    match serde_json::from_str(payload)? {
        Value::Object(map) => Ok(map),
        Value::Array(_) => Err(DataLineError::NotAnObject("array")),
        Value::String(_) => Err(DataLineError::NotAnObject("string")),
        Value::Number(_) => Err(DataLineError::NotAnObject("number")),
        Value::Bool(_) => Err(DataLineError::NotAnObject("boolean")),
        Value::Null => Err(DataLineError::NotAnObject("null")),
    }
}

/// Stateful parser for one session's run stream.
#[derive(Debug, Default)]
pub struct LineParser {
    seen_events: HashSet<String>,
    seen_lines: HashSet<[u8; 32]>,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one line.
    ///
    /// Returns `Ok(None)` for ignored lines and for repeats of an event name
    /// or plain line already seen in this session. Unusable data payloads
    /// are returned as errors so the caller can log and drop them.
    pub fn parse(&mut self, line: &str) -> Result<Option<StreamEvent>, DataLineError> {
        let event = match classify_line(line) {
            LineKind::Ignored => None,
            LineKind::Error(raw) => Some(StreamEvent::Error(raw.to_string())),
            LineKind::EventMarker(name) => self
                .seen_events
                .insert(name.to_string())
                .then(|| StreamEvent::EventMarker(name.to_string())),
            LineKind::Data(payload) => Some(StreamEvent::Data(decode_data(payload)?)),
            LineKind::Plain(text) => {
                let digest: [u8; 32] = Sha256::digest(text.as_bytes()).into();
                self.seen_lines
                    .insert(digest)
                    .then(|| StreamEvent::Plain(text.to_string()))
            }
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_rules_in_order() {
        assert_eq!(classify_line(""), LineKind::Ignored);
        assert_eq!(classify_line("   "), LineKind::Ignored);
        assert_eq!(classify_line(": heartbeat"), LineKind::Ignored);
        // The error check runs before prefix matching.
        assert_eq!(classify_line("event: ERROR"), LineKind::Error("event: ERROR"));
        assert_eq!(
            classify_line("graph: Error: boom"),
            LineKind::Error("graph: Error: boom")
        );
        assert_eq!(classify_line("event: values"), LineKind::EventMarker("values"));
        assert_eq!(classify_line("data: {}"), LineKind::Data("{}"));
        assert_eq!(classify_line("hello\r"), LineKind::Plain("hello"));
    }

    #[test]
    fn test_event_markers_dedup_by_name() {
        let mut parser = LineParser::new();
        let events: Vec<_> = ["event: a", "event: a", "event: b"]
            .iter()
            .filter_map(|line| parser.parse(line).unwrap())
            .collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::EventMarker("a".to_string()),
                StreamEvent::EventMarker("b".to_string())
            ]
        );
    }

    #[test]
    fn test_plain_lines_dedup_by_content() {
        let mut parser = LineParser::new();
        assert!(parser.parse("working").unwrap().is_some());
        assert!(parser.parse("working").unwrap().is_none());
        assert!(parser.parse("still working").unwrap().is_some());
    }

    #[test]
    fn test_errors_are_never_deduplicated() {
        let mut parser = LineParser::new();
        assert!(parser.parse("upstream: ERROR x").unwrap().is_some());
        assert!(parser.parse("upstream: ERROR x").unwrap().is_some());
    }

    #[test]
    fn test_data_lines() {
        let mut parser = LineParser::new();
        let event = parser.parse("data: {\"next_worker\": \"editor\"}").unwrap();
        let mut expected = Map::new();
        expected.insert("next_worker".to_string(), json!("editor"));
        assert_eq!(event, Some(StreamEvent::Data(expected)));

        // Data lines are not deduplicated at this level.
        assert!(parser.parse("data: {}").unwrap().is_some());
        assert!(parser.parse("data: {}").unwrap().is_some());

        assert!(matches!(
            parser.parse("data: {not json"),
            Err(DataLineError::InvalidJson(_))
        ));
        assert!(matches!(
            parser.parse("data: [1, 2]"),
            Err(DataLineError::NotAnObject("array"))
        ));
    }
}
