//! The envelope exchanged with clients over a live connection.
//!
//! Envelopes travel as JSON text frames. The hub only looks inside an envelope
//! to overwrite the sender identity before re-broadcasting it.

use serde::{Deserialize, Serialize};

use crate::ids::{RoomId, UserId};

/// Envelope kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// A chat message.
    Message,
    /// A user joined the room.
    Join,
    /// A user left the room.
    Leave,
    /// An error report.
    Error,
}

impl EnvelopeKind {
    /// Wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Message => "message",
            EnvelopeKind::Join => "join",
            EnvelopeKind::Leave => "leave",
            EnvelopeKind::Error => "error",
        }
    }
}

/// A structured client envelope.
///
/// Every field except `type` is optional on input; missing fields take their
/// zero value so that clients can send the minimal `{"type":"message","content":"hi"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope kind.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Room the envelope belongs to.
    #[serde(default)]
    pub room_id: RoomId,
    /// Sending user.
    #[serde(default)]
    pub user_id: UserId,
    /// Display name of the sending user.
    #[serde(default)]
    pub username: String,
    /// Message body.
    #[serde(default)]
    pub content: String,
    /// Unix timestamp in milliseconds, `0` when unset.
    #[serde(default)]
    pub timestamp: i64,
    /// Free-form attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Envelope {
    /// Create an envelope of the given kind with empty fields.
    #[must_use]
    pub fn new(kind: EnvelopeKind) -> Self {
        Self {
            kind,
            room_id: RoomId::default(),
            user_id: UserId::default(),
            username: String::new(),
            content: String::new(),
            timestamp: 0,
            data: None,
        }
    }

    /// Create a chat message envelope.
    #[must_use]
    pub fn message(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::new(EnvelopeKind::Message)
        }
    }

    /// Create an error envelope.
    #[must_use]
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::new(EnvelopeKind::Error)
        }
    }

    /// Set the room id.
    #[must_use]
    pub fn with_room(mut self, room_id: RoomId) -> Self {
        self.room_id = room_id;
        self
    }

    /// Set the sending user.
    #[must_use]
    pub fn with_user(mut self, user_id: UserId, username: impl Into<String>) -> Self {
        self.user_id = user_id;
        self.username = username.into();
        self
    }

    /// Set the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Overwrite the sender identity with authoritative values.
    ///
    /// Whatever the client claimed in `user_id`, `room_id` or `username` is
    /// discarded. A missing timestamp is filled with `now_ms`.
    pub fn stamp_sender(&mut self, user_id: UserId, username: &str, room_id: RoomId, now_ms: i64) {
        self.user_id = user_id;
        self.room_id = room_id;
        self.username.clear();
        self.username.push_str(username);
        if self.timestamp == 0 {
            self.timestamp = now_ms;
        }
    }
}
