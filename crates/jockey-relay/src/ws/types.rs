//! WebSocket message types.
//!
//! Outbound frames are either a [`DisplayMessage`](crate::relay::DisplayMessage)
//! serialized as-is or one of the small control frames below.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jockey::StreamMode;

/// Control frames sent from backend to frontend.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsControl {
    /// Heartbeat/keepalive ping.
    Ping,
}

/// Request to start a run on the connection's thread.
#[derive(Debug, Clone, Deserialize)]
pub struct RunCommand {
    pub text: String,
    #[serde(default)]
    pub index_id: Option<String>,
    #[serde(default)]
    pub assistant_id: Option<String>,
    #[serde(default)]
    pub stream_mode: Option<StreamMode>,
}

/// Commands sent from frontend to backend.
#[derive(Debug, Clone)]
pub enum WsCommand {
    /// Keepalive answer; carries no work.
    Pong,
    Run(RunCommand),
}

impl WsCommand {
    /// Parse a text frame.
    ///
    /// `{"type":"pong"}` is a pong; anything else must be a run command.
    pub fn parse(text: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| format!("Invalid JSON command: {}", e))?;

        if value.get("type").and_then(Value::as_str) == Some("pong") {
            return Ok(WsCommand::Pong);
        }

        let command: RunCommand =
            serde_json::from_value(value).map_err(|e| format!("Invalid command: {}", e))?;
        if command.text.trim().is_empty() {
            return Err("Text must not be empty".to_string());
        }
        Ok(WsCommand::Run(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_frame() {
        assert_eq!(
            serde_json::to_string(&WsControl::Ping).unwrap(),
            r#"{"type":"ping"}"#
        );
    }

    #[test]
    fn test_parse_commands() {
        assert!(matches!(WsCommand::parse(r#"{"type":"pong"}"#), Ok(WsCommand::Pong)));

        match WsCommand::parse(r#"{"text":"cut it","index_id":"idx","stream_mode":"values"}"#) {
            Ok(WsCommand::Run(cmd)) => {
                assert_eq!(cmd.text, "cut it");
                assert_eq!(cmd.index_id.as_deref(), Some("idx"));
                assert_eq!(cmd.stream_mode, Some(StreamMode::Values));
            }
            other => panic!("unexpected parse result: {:?}", other),
        }

        assert!(WsCommand::parse("not json").is_err());
        assert!(WsCommand::parse(r#"{"index_id":"idx"}"#).is_err());
        assert!(WsCommand::parse(r#"{"text":"  "}"#).is_err());
    }
}
