//! Admission of new connections.
//!
//! Every check runs against the [`Directory`] before the transport is upgraded,
//! so a rejected request never touches hub state.

use roomcast_protocol::{RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::directory::{Directory, DirectoryError};

/// Admission errors.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The user is not a known principal.
    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    /// The requested room does not exist.
    #[error("Unknown room: {0}")]
    UnknownRoom(RoomId),

    /// The user is not a member of the requested room.
    #[error("User {user_id} is not a member of room {room_id}")]
    NotAMember {
        /// Requested room.
        room_id: RoomId,
        /// Requesting user.
        user_id: UserId,
    },

    /// The directory could not answer.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Identity bound to an admitted connection for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmittedIdentity {
    /// Owning user.
    pub user_id: UserId,
    /// Display name of the owning user.
    pub username: String,
    /// Room the connection is attached to; `None` for unicast-only connections.
    pub room_id: Option<RoomId>,
}

impl AdmittedIdentity {
    /// Create a new identity.
    #[must_use]
    pub fn new(user_id: UserId, username: impl Into<String>, room_id: Option<RoomId>) -> Self {
        Self {
            user_id,
            username: username.into(),
            room_id,
        }
    }
}

/// Validates connection requests.
#[derive(Clone)]
pub struct AdmissionController {
    directory: Arc<dyn Directory>,
}

impl AdmissionController {
    /// Create a controller backed by a directory.
    #[must_use]
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Admit a user, optionally into a room.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::UnknownUser`], [`AdmissionError::UnknownRoom`]
    /// or [`AdmissionError::NotAMember`] when a check fails, and
    /// [`AdmissionError::Directory`] when the directory itself fails.
    pub async fn admit(
        &self,
        user_id: UserId,
        room_id: Option<RoomId>,
    ) -> Result<AdmittedIdentity, AdmissionError> {
        let profile = self
            .directory
            .find_user(user_id)
            .await?
            .ok_or(AdmissionError::UnknownUser(user_id))?;

        if let Some(room_id) = room_id {
            if !self.directory.room_exists(room_id).await? {
                return Err(AdmissionError::UnknownRoom(room_id));
            }
            if !self.directory.is_member(room_id, user_id).await? {
                return Err(AdmissionError::NotAMember { room_id, user_id });
            }
        }

        debug!(user = %user_id, room = ?room_id.map(RoomId::get), "Connection admitted");

        Ok(AdmittedIdentity::new(user_id, profile.username, room_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::UserProfile;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct FixedDirectory {
        users: HashMap<UserId, String>,
        rooms: HashMap<RoomId, HashSet<UserId>>,
        fail: bool,
    }

    #[async_trait]
    impl Directory for FixedDirectory {
        async fn find_user(&self, user_id: UserId) -> Result<Option<UserProfile>, DirectoryError> {
            if self.fail {
                return Err(DirectoryError::Unavailable("database down".into()));
            }
            Ok(self.users.get(&user_id).map(|name| UserProfile {
                id: user_id,
                username: name.clone(),
            }))
        }

        async fn room_exists(&self, room_id: RoomId) -> Result<bool, DirectoryError> {
            Ok(self.rooms.contains_key(&room_id))
        }

        async fn is_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool, DirectoryError> {
            Ok(self
                .rooms
                .get(&room_id)
                .is_some_and(|members| members.contains(&user_id)))
        }
    }

    fn controller() -> AdmissionController {
        let mut dir = FixedDirectory::default();
        dir.users.insert(UserId(1), "alice".into());
        dir.users.insert(UserId(2), "bob".into());
        dir.rooms.insert(RoomId(7), HashSet::from([UserId(1)]));
        AdmissionController::new(Arc::new(dir))
    }

    #[tokio::test]
    async fn test_admit_without_room() {
        let identity = controller().admit(UserId(2), None).await.unwrap();
        assert_eq!(identity, AdmittedIdentity::new(UserId(2), "bob", None));
    }

    #[tokio::test]
    async fn test_admit_member_into_room() {
        let identity = controller().admit(UserId(1), Some(RoomId(7))).await.unwrap();
        assert_eq!(identity.username, "alice");
        assert_eq!(identity.room_id, Some(RoomId(7)));
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let result = controller().admit(UserId(99), Some(RoomId(7))).await;
        assert!(matches!(result, Err(AdmissionError::UnknownUser(UserId(99)))));
    }

    #[tokio::test]
    async fn test_unknown_room() {
        let result = controller().admit(UserId(1), Some(RoomId(8))).await;
        assert!(matches!(result, Err(AdmissionError::UnknownRoom(RoomId(8)))));
    }

    #[tokio::test]
    async fn test_not_a_member() {
        let result = controller().admit(UserId(2), Some(RoomId(7))).await;
        assert!(matches!(
            result,
            Err(AdmissionError::NotAMember {
                room_id: RoomId(7),
                user_id: UserId(2)
            })
        ));
    }

    #[tokio::test]
    async fn test_directory_failure() {
        let dir = FixedDirectory {
            fail: true,
            ..Default::default()
        };
        let result = AdmissionController::new(Arc::new(dir))
            .admit(UserId(1), None)
            .await;
        assert!(matches!(result, Err(AdmissionError::Directory(_))));
    }
}
