//! Wire protocol for the `/ws/client` endpoint.
//!
//! Control and result frames are JSON text, discriminated by `type`. Audio
//! travels as base64 Opus inside the `audio` frame. Both directions are
//! closed sets; unknown discriminators are protocol errors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Room codes are exactly six characters from `A-Z2-9`.
pub const ROOM_ID_LEN: usize = 6;
/// Display names are trimmed and bounded.
pub const MAX_NAME_LEN: usize = 64;

/// Inbound client messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        room_id: String,
        language: String,
        name: String,
        /// Client device capabilities; accepted and ignored by the core.
        #[serde(default)]
        capabilities: Option<serde_json::Value>,
    },
    Audio {
        /// Base64-encoded Opus packet.
        data: String,
        /// Client-supplied millis, opaque to the server.
        #[serde(default)]
        timestamp: i64,
    },
    UtteranceEnd {
        #[serde(default)]
        timestamp: i64,
    },
    Leave,
    Ping,
}

/// Roster entry shared in `joined` and `participant_joined`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub id: String,
    pub name: String,
    pub language: String,
}

/// Outbound server messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Joined {
        room_id: String,
        participant_id: String,
        /// The OTHER members at the time of join.
        participants: Vec<ParticipantInfo>,
    },
    ParticipantJoined {
        participant: ParticipantInfo,
    },
    ParticipantLeft {
        participant_id: String,
    },
    Translation {
        speaker_id: String,
        speaker_name: String,
        source_lang: String,
        source_text: String,
        /// Short tag -> translated text. Targets that failed are absent.
        translations: BTreeMap<String, String>,
        /// Server epoch seconds.
        timestamp: f64,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    Pong,
}

impl ServerMessage {
    /// Critical messages must never be dropped from a send queue; if one
    /// cannot be delivered the participant is disconnected instead.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            ServerMessage::Joined { .. }
                | ServerMessage::ParticipantJoined { .. }
                | ServerMessage::ParticipantLeft { .. }
                | ServerMessage::Error { .. }
        )
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RoomFull,
    PipelineError,
    InvalidMessage,
    UnsupportedLanguage,
    /// Reserved for a future authenticated mode.
    Unauthorized,
}

/// Whether `room_id` has the required `[A-Z2-9]{6}` shape.
pub fn valid_room_id(room_id: &str) -> bool {
    room_id.len() == ROOM_ID_LEN
        && room_id
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'9').contains(&b))
}

/// Trims and bounds a display name; None when unusable.
pub fn normalize_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_LEN {
        None
    } else {
        Some(trimmed.to_string())
    }
}
