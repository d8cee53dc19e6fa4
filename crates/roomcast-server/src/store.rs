//! In-memory directory and message store.

use async_trait::async_trait;
use dashmap::DashMap;
use roomcast_core::{
    now_millis, Directory, DirectoryError, MessageStore, StoreError, StoredGroupMessage,
    StoredPrivateMessage, UserProfile,
};
use roomcast_protocol::{RoomId, UserId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use tracing::debug;

use crate::config::DirectoryConfig;

#[derive(Debug, Default)]
struct RoomRecord {
    name: String,
    members: HashSet<UserId>,
    muted: HashSet<UserId>,
}

/// Users, rooms and message history held in process memory.
#[derive(Debug)]
pub struct MemoryStore {
    users: DashMap<UserId, UserProfile>,
    rooms: DashMap<RoomId, RoomRecord>,
    group_messages: DashMap<RoomId, Vec<StoredGroupMessage>>,
    private_messages: Mutex<Vec<StoredPrivateMessage>>,
    next_message_id: AtomicI64,
}

impl MemoryStore {
    /// Create a store seeded from configuration.
    #[must_use]
    pub fn from_config(seed: &DirectoryConfig) -> Self {
        let store = Self {
            users: DashMap::new(),
            rooms: DashMap::new(),
            group_messages: DashMap::new(),
            private_messages: Mutex::new(Vec::new()),
            next_message_id: AtomicI64::new(1),
        };

        for user in &seed.users {
            store.users.insert(
                UserId(user.id),
                UserProfile {
                    id: UserId(user.id),
                    username: user.username.clone(),
                },
            );
        }

        for room in &seed.rooms {
            store.rooms.insert(
                RoomId(room.id),
                RoomRecord {
                    name: room.name.clone(),
                    members: room.members.iter().copied().map(UserId).collect(),
                    muted: room.muted.iter().copied().map(UserId).collect(),
                },
            );
        }

        debug!(
            users = store.users.len(),
            rooms = store.rooms.len(),
            "Directory seeded"
        );

        store
    }

    /// Name of a room.
    #[must_use]
    pub fn room_name(&self, room_id: RoomId) -> Option<String> {
        self.rooms.get(&room_id).map(|room| room.name.clone())
    }

    /// Most recent messages of a room, oldest first.
    #[must_use]
    pub fn recent_group_messages(&self, room_id: RoomId, limit: usize) -> Vec<StoredGroupMessage> {
        self.group_messages
            .get(&room_id)
            .map(|messages| tail(&messages, limit))
            .unwrap_or_default()
    }

    /// Most recent messages between two users, oldest first.
    #[must_use]
    pub fn recent_private_messages(
        &self,
        user_id: UserId,
        other_id: UserId,
        limit: usize,
    ) -> Vec<StoredPrivateMessage> {
        let messages = self
            .private_messages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let conversation: Vec<StoredPrivateMessage> = messages
            .iter()
            .filter(|m| {
                (m.sender_id == user_id && m.receiver_id == other_id)
                    || (m.sender_id == other_id && m.receiver_id == user_id)
            })
            .cloned()
            .collect();
        tail(&conversation, limit)
    }

    fn next_id(&self) -> i64 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }
}

fn tail<T: Clone>(items: &[T], limit: usize) -> Vec<T> {
    items[items.len().saturating_sub(limit)..].to_vec()
}

#[async_trait]
impl Directory for MemoryStore {
    async fn find_user(&self, user_id: UserId) -> Result<Option<UserProfile>, DirectoryError> {
        Ok(self.users.get(&user_id).map(|user| user.clone()))
    }

    async fn room_exists(&self, room_id: RoomId) -> Result<bool, DirectoryError> {
        Ok(self.rooms.contains_key(&room_id))
    }

    async fn is_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool, DirectoryError> {
        Ok(self
            .rooms
            .get(&room_id)
            .is_some_and(|room| room.members.contains(&user_id)))
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn persist_group_message(
        &self,
        room_id: RoomId,
        user_id: UserId,
        content: &str,
    ) -> Result<StoredGroupMessage, StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::EmptyContent);
        }
        if !self.users.contains_key(&user_id) {
            return Err(StoreError::UnknownUser(user_id));
        }

        {
            let room = self
                .rooms
                .get(&room_id)
                .ok_or(StoreError::UnknownRoom(room_id))?;
            if !room.members.contains(&user_id) {
                return Err(StoreError::NotAMember { room_id, user_id });
            }
            if room.muted.contains(&user_id) {
                return Err(StoreError::Muted { room_id, user_id });
            }
        }

        let message = StoredGroupMessage {
            id: self.next_id(),
            chat_room_id: room_id,
            user_id,
            content: content.to_string(),
            created_at: now_millis(),
        };
        self.group_messages
            .entry(room_id)
            .or_default()
            .push(message.clone());

        debug!(room = %room_id, user = %user_id, id = message.id, "Group message stored");
        Ok(message)
    }

    async fn persist_private_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> Result<StoredPrivateMessage, StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::EmptyContent);
        }
        for user_id in [sender_id, receiver_id] {
            if !self.users.contains_key(&user_id) {
                return Err(StoreError::UnknownUser(user_id));
            }
        }

        let message = StoredPrivateMessage {
            id: self.next_id(),
            sender_id,
            receiver_id,
            content: content.to_string(),
            created_at: now_millis(),
        };
        self.private_messages
            .lock()
            .map_err(|_| StoreError::Backend("private message log poisoned".into()))?
            .push(message.clone());

        debug!(sender = %sender_id, receiver = %receiver_id, id = message.id, "Private message stored");
        Ok(message)
    }
}
