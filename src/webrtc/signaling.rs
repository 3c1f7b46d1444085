//! Signaling wire protocol
//!
//! JSON envelopes exchanged over the WebSocket channel:
//! - `{"type": "offer"|"answer", "sdp": "..."}`
//! - `{"type": "candidate", "candidate": {"candidate": "...", "sdpMid": ..., "sdpMLineIndex": ...}}`
//! - `{"command": "pause"|"play"|"text", "message": "..."}`

use crate::error::SignalingError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Negotiation role of one side of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// Generates the offer (the hub)
    Offerer,
    /// Replies with an answer (operator / recorder)
    Answerer,
}

/// Offer or answer tag of a negotiation object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
        }
    }
}

/// Opaque negotiation object routed verbatim between transport and peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Answer, sdp: sdp.into() }
    }
}

/// Connectivity candidate in browser-compatible JSON shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

/// Application command kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Pause,
    Play,
    Text,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Pause => write!(f, "pause"),
            CommandKind::Play => write!(f, "play"),
            CommandKind::Text => write!(f, "text"),
        }
    }
}

/// Control message relayed between endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "command")]
    pub kind: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Command {
    pub fn pause() -> Self {
        Self { kind: CommandKind::Pause, message: None }
    }

    pub fn play() -> Self {
        Self { kind: CommandKind::Play, message: None }
    }

    pub fn text(message: impl Into<String>) -> Self {
        Self { kind: CommandKind::Text, message: Some(message.into()) }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} {:?}", self.kind, message),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Signaling message carried over a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate(IceCandidate),
    Command(Command),
}

impl SignalingMessage {
    /// Parse a signaling message from a JSON text frame
    pub fn from_json(text: &str) -> Result<Self, SignalingError> {
        let value: Value = serde_json::from_str(text.trim())
            .map_err(|e| SignalingError::Malformed(format!("invalid JSON: {}", e)))?;

        if value.get("command").is_some() {
            let command: Command = serde_json::from_value(value)
                .map_err(|e| SignalingError::Malformed(format!("invalid command: {}", e)))?;
            return Ok(SignalingMessage::Command(command));
        }

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SignalingError::Malformed("missing \"type\" or \"command\" field".to_string()))?;

        match kind {
            "offer" | "answer" => {
                let sdp = value
                    .get("sdp")
                    .and_then(Value::as_str)
                    .ok_or_else(|| SignalingError::Malformed(format!("{} without sdp", kind)))?
                    .to_string();
                if kind == "offer" {
                    Ok(SignalingMessage::Offer { sdp })
                } else {
                    Ok(SignalingMessage::Answer { sdp })
                }
            }
            "candidate" => {
                let candidate = value
                    .get("candidate")
                    .cloned()
                    .ok_or_else(|| SignalingError::Malformed("candidate without payload".to_string()))?;
                let candidate: IceCandidate = serde_json::from_value(candidate)
                    .map_err(|e| SignalingError::Malformed(format!("invalid candidate: {}", e)))?;
                Ok(SignalingMessage::Candidate(candidate))
            }
            other => Err(SignalingError::Malformed(format!("unknown message type: {}", other))),
        }
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> String {
        match self {
            SignalingMessage::Offer { sdp } => json!({ "type": "offer", "sdp": sdp }).to_string(),
            SignalingMessage::Answer { sdp } => json!({ "type": "answer", "sdp": sdp }).to_string(),
            SignalingMessage::Candidate(candidate) => {
                json!({ "type": "candidate", "candidate": candidate }).to_string()
            }
            SignalingMessage::Command(command) => json!(command).to_string(),
        }
    }

    /// Wrap a local negotiation object
    pub fn description(desc: SessionDescription) -> Self {
        match desc.kind {
            SdpKind::Offer => SignalingMessage::Offer { sdp: desc.sdp },
            SdpKind::Answer => SignalingMessage::Answer { sdp: desc.sdp },
        }
    }

    /// Short label for log lines
    pub fn label(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::Candidate(_) => "candidate",
            SignalingMessage::Command(_) => "command",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offer() {
        let msg = SignalingMessage::from_json(r#"{"type": "offer", "sdp": "v=0\r\n..."}"#).unwrap();
        match msg {
            SignalingMessage::Offer { sdp } => assert!(sdp.starts_with("v=0")),
            _ => panic!("Expected Offer"),
        }
    }

    #[test]
    fn test_parse_candidate_with_nulls() {
        let json = r#"{"type":"candidate","candidate":{"candidate":"candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host","sdpMid":null,"sdpMLineIndex":null}}"#;
        let msg = SignalingMessage::from_json(json).unwrap();
        match msg {
            SignalingMessage::Candidate(c) => {
                assert!(c.candidate.contains("typ host"));
                assert_eq!(c.sdp_mid, None);
                assert_eq!(c.sdp_mline_index, None);
            }
            _ => panic!("Expected Candidate"),
        }
    }

    #[test]
    fn test_candidate_wire_shape() {
        let msg = SignalingMessage::Candidate(IceCandidate {
            candidate: "candidate:0".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        });
        let value: Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(value["type"], "candidate");
        assert_eq!(value["candidate"]["sdpMid"], "0");
        assert_eq!(value["candidate"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            SignalingMessage::from_json(r#"{"command":"pause"}"#).unwrap(),
            SignalingMessage::Command(Command::pause())
        );
        assert_eq!(
            SignalingMessage::from_json(r#"{"command":"text","message":"hello"}"#).unwrap(),
            SignalingMessage::Command(Command::text("hello"))
        );
    }

    #[test]
    fn test_command_serialization_omits_empty_message() {
        let json = SignalingMessage::Command(Command::play()).to_json();
        assert_eq!(json, r#"{"command":"play"}"#);
    }

    #[test]
    fn test_malformed_payloads() {
        for text in [
            "not json",
            r#"{"type":"offer"}"#,
            r#"{"type":"bogus"}"#,
            r#"{"command":"jump"}"#,
            r#"{"type":"candidate","candidate":{"sdpMid":"0"}}"#,
            r#"{"hello":"world"}"#,
        ] {
            match SignalingMessage::from_json(text) {
                Err(SignalingError::Malformed(_)) => {}
                other => panic!("{} should be malformed, got {:?}", text, other),
            }
        }
    }
}
