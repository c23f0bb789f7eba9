//! Session wire protocol.
//!
//! Text frames are JSON objects tagged by `type`. Binary frames carry a
//! little-endian `u32` header length, a JSON header, then raw payload.

use companion_agent::{ModeFlags, SessionEvent};
use companion_core::error::ProtocolError;
use companion_core::message::Citation;
use companion_core::mood::MoodVector;
use serde::{Deserialize, Serialize};

/// Inbound `type` values the connection understands.
const CLIENT_EVENT_TYPES: &[&str] = &[
    "ping",
    "text_message",
    "continue",
    "cancel",
    "retry",
    "set_persona",
    "set_model",
    "set_mode",
    "reset_memory",
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Ping,
    TextMessage {
        #[serde(default)]
        text: String,
        #[serde(default, rename = "forceBrowse")]
        force_browse: bool,
    },
    Continue,
    Cancel,
    Retry,
    SetPersona {
        #[serde(default)]
        key: String,
    },
    SetModel {
        #[serde(default = "default_which")]
        which: String,
    },
    SetMode {
        #[serde(default)]
        fast: bool,
    },
    ResetMemory,
}

fn default_which() -> String {
    "local".into()
}

/// Parse one text frame.
pub fn parse_client_event(text: &str) -> Result<ClientEvent, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;

    let kind = match value.get("type") {
        Some(serde_json::Value::String(kind)) => kind.clone(),
        Some(other) => return Err(ProtocolError::UnknownType(other.to_string())),
        None => {
            return Err(ProtocolError::Malformed {
                kind: "event".into(),
                reason: "missing type".into(),
            });
        }
    };
    if !CLIENT_EVENT_TYPES.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed {
        kind,
        reason: e.to_string(),
    })
}

/// Header of a binary frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BinaryHeader {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Split a binary frame into its header and payload.
pub fn parse_binary_frame(data: &[u8]) -> Result<(BinaryHeader, &[u8]), ProtocolError> {
    let malformed = |reason: &str| ProtocolError::Malformed {
        kind: "binary".into(),
        reason: reason.into(),
    };

    let len_bytes: [u8; 4] = data
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| malformed("frame shorter than length prefix"))?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    let header_end = 4usize
        .checked_add(header_len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| malformed("header length exceeds frame"))?;

    let header: BinaryHeader =
        serde_json::from_slice(&data[4..header_end]).map_err(|_| ProtocolError::InvalidJson)?;
    Ok((header, &data[header_end..]))
}

/// Transcription availability reported on connect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SttInfo {
    pub ok: bool,
    pub device: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    ServerInfo {
        version: &'static str,
        stt: SttInfo,
    },
    Personas {
        options: Vec<&'static str>,
    },
    StateUpdate {
        mood: MoodVector,
    },
    Pong {
        t: f64,
    },
    Processing {
        on: bool,
    },
    UtteranceStart {
        id: String,
        text: String,
        emotion: MoodVector,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        citations: Vec<Citation>,
        truncated: bool,
    },
    UtteranceEnd {
        id: String,
    },
    Canceled,
    PersonaSet {
        key: String,
    },
    ModelSet {
        which: String,
    },
    ModeSet {
        consistency_n: usize,
        auto_browsing: bool,
    },
    MemoryReset {
        ok: bool,
    },
    PartialTranscript {
        text: String,
    },
    Error {
        message: String,
    },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            t: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }

    pub fn mode_set(flags: ModeFlags) -> Self {
        Self::ModeSet {
            consistency_n: flags.consistency_n,
            auto_browsing: flags.auto_browsing,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Wire frames for one session event. An utterance becomes a
/// start/end pair.
pub fn frames_for(event: SessionEvent) -> Vec<ServerFrame> {
    match event {
        SessionEvent::Mood { mood } => vec![ServerFrame::StateUpdate { mood }],
        SessionEvent::Processing { on } => vec![ServerFrame::Processing { on }],
        SessionEvent::Utterance(u) => vec![
            ServerFrame::UtteranceStart {
                id: u.id.clone(),
                text: u.text,
                emotion: u.emotion,
                citations: u.citations,
                truncated: u.truncated,
            },
            ServerFrame::UtteranceEnd { id: u.id },
        ],
        SessionEvent::Canceled => vec![ServerFrame::Canceled],
    }
}
