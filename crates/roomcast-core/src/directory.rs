//! Collaborator interfaces for the persistence side of the system.
//!
//! The hub never talks to storage itself. Admission asks a [`Directory`] who
//! may connect, and the request layer asks a [`MessageStore`] to persist a
//! message before it asks the hub to fan it out.

use async_trait::async_trait;
use roomcast_protocol::{RoomId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A known principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User ID.
    pub id: UserId,
    /// Display name.
    pub username: String,
}

/// Directory lookup failure.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The backing store could not be reached.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Lookup of users, rooms and room membership.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Find a user by ID. `None` means the user is not a known principal.
    async fn find_user(&self, user_id: UserId) -> Result<Option<UserProfile>, DirectoryError>;

    /// Check whether a room exists.
    async fn room_exists(&self, room_id: RoomId) -> Result<bool, DirectoryError>;

    /// Check whether a user is currently a member of a room.
    async fn is_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool, DirectoryError>;
}

/// A persisted room message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredGroupMessage {
    /// Message ID.
    pub id: i64,
    /// Room the message was sent to.
    pub chat_room_id: RoomId,
    /// Sending user.
    pub user_id: UserId,
    /// Message body.
    pub content: String,
    /// Creation time in Unix milliseconds.
    pub created_at: i64,
}

/// A persisted direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPrivateMessage {
    /// Message ID.
    pub id: i64,
    /// Sending user.
    pub sender_id: UserId,
    /// Receiving user.
    pub receiver_id: UserId,
    /// Message body.
    pub content: String,
    /// Creation time in Unix milliseconds.
    pub created_at: i64,
}

/// Message persistence failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The user does not exist.
    #[error("user not found: {0}")]
    UnknownUser(UserId),

    /// The room does not exist.
    #[error("room not found: {0}")]
    UnknownRoom(RoomId),

    /// The user is not a member of the room.
    #[error("user {user_id} is not a member of room {room_id}")]
    NotAMember {
        /// Room.
        room_id: RoomId,
        /// User.
        user_id: UserId,
    },

    /// The member has been muted in the room.
    #[error("user {user_id} is muted in room {room_id}")]
    Muted {
        /// Room.
        room_id: RoomId,
        /// User.
        user_id: UserId,
    },

    /// Empty message body.
    #[error("message content is empty")]
    EmptyContent,

    /// Backend failure.
    #[error("storage error: {0}")]
    Backend(String),
}

/// Durable message storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message sent to a room.
    async fn persist_group_message(
        &self,
        room_id: RoomId,
        user_id: UserId,
        content: &str,
    ) -> Result<StoredGroupMessage, StoreError>;

    /// Persist a direct message between two users.
    async fn persist_private_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> Result<StoredPrivateMessage, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stored_message_json_shape() {
        let msg = StoredGroupMessage {
            id: 1,
            chat_room_id: RoomId(7),
            user_id: UserId(2),
            content: "hi".into(),
            created_at: 10,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"id": 1, "chatRoomId": 7, "userId": 2, "content": "hi", "createdAt": 10})
        );
    }

    #[test]
    fn test_store_error_messages() {
        let err = StoreError::NotAMember {
            room_id: RoomId(7),
            user_id: UserId(3),
        };
        assert_eq!(err.to_string(), "user 3 is not a member of room 7");
    }
}
