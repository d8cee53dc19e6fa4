//! Presence tracking.
//!
//! Presence is a best-effort hint: "user X is online" plus the set of users
//! present in each room. The hub never owns presence state. It hands every
//! change to a [`PresenceNotifier`], whose worker task applies the changes to a
//! [`PresenceGateway`] in order and only logs failures.

use async_trait::async_trait;
use dashmap::DashMap;
use roomcast_protocol::{RoomId, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default lifetime of an online flag.
pub const DEFAULT_ONLINE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Presence backend failure.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// The backend could not be reached.
    #[error("presence backend unavailable: {0}")]
    Unavailable(String),
}

/// Key/value store for presence hints.
#[async_trait]
pub trait PresenceGateway: Send + Sync {
    /// Mark a user online.
    async fn mark_online(&self, user_id: UserId) -> Result<(), PresenceError>;

    /// Mark a user offline.
    async fn mark_offline(&self, user_id: UserId) -> Result<(), PresenceError>;

    /// Add a user to a room's presence set.
    async fn add_to_room(&self, room_id: RoomId, user_id: UserId) -> Result<(), PresenceError>;

    /// Remove a user from a room's presence set.
    async fn remove_from_room(&self, room_id: RoomId, user_id: UserId)
        -> Result<(), PresenceError>;

    /// Whether a user is currently flagged online.
    async fn is_online(&self, user_id: UserId) -> Result<bool, PresenceError>;

    /// Users currently present in a room, in ascending order.
    async fn room_users(&self, room_id: RoomId) -> Result<Vec<UserId>, PresenceError>;
}

/// In-process presence store.
///
/// Online flags expire after a TTL unless refreshed; room sets do not expire.
#[derive(Debug)]
pub struct InMemoryPresence {
    online: DashMap<UserId, Instant>,
    rooms: DashMap<RoomId, HashSet<UserId>>,
    ttl: Duration,
}

impl Default for InMemoryPresence {
    fn default() -> Self {
        Self::new(DEFAULT_ONLINE_TTL)
    }
}

impl InMemoryPresence {
    /// Create a store whose online flags live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            online: DashMap::new(),
            rooms: DashMap::new(),
            ttl,
        }
    }

    /// Number of users flagged online, expired flags included until pruned.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    /// Drop expired online flags.
    ///
    /// Returns the users whose flag was removed.
    pub fn prune_expired(&self) -> Vec<UserId> {
        let now = Instant::now();
        let expired: Vec<UserId> = self
            .online
            .iter()
            .filter(|entry| *entry.value() <= now)
            .map(|entry| *entry.key())
            .collect();

        for user_id in &expired {
            self.online.remove_if(user_id, |_, expires| *expires <= now);
            debug!(user = %user_id, "Presence: pruned expired online flag");
        }

        expired
    }
}

#[async_trait]
impl PresenceGateway for InMemoryPresence {
    async fn mark_online(&self, user_id: UserId) -> Result<(), PresenceError> {
        self.online.insert(user_id, Instant::now() + self.ttl);
        Ok(())
    }

    async fn mark_offline(&self, user_id: UserId) -> Result<(), PresenceError> {
        self.online.remove(&user_id);
        Ok(())
    }

    async fn add_to_room(&self, room_id: RoomId, user_id: UserId) -> Result<(), PresenceError> {
        self.rooms.entry(room_id).or_default().insert(user_id);
        Ok(())
    }

    async fn remove_from_room(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<(), PresenceError> {
        if let Some(mut users) = self.rooms.get_mut(&room_id) {
            users.remove(&user_id);
        }
        self.rooms.remove_if(&room_id, |_, users| users.is_empty());
        Ok(())
    }

    async fn is_online(&self, user_id: UserId) -> Result<bool, PresenceError> {
        Ok(self
            .online
            .get(&user_id)
            .is_some_and(|expires| *expires > Instant::now()))
    }

    async fn room_users(&self, room_id: RoomId) -> Result<Vec<UserId>, PresenceError> {
        let mut users: Vec<UserId> = self
            .rooms
            .get(&room_id)
            .map(|users| users.iter().copied().collect())
            .unwrap_or_default();
        users.sort();
        Ok(users)
    }
}

/// A presence change produced by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceUpdate {
    /// User came online.
    Online(UserId),
    /// User went offline.
    Offline(UserId),
    /// User joined a room's presence set.
    JoinRoom {
        /// Room.
        room_id: RoomId,
        /// User.
        user_id: UserId,
    },
    /// User left a room's presence set.
    LeaveRoom {
        /// Room.
        room_id: RoomId,
        /// User.
        user_id: UserId,
    },
}

impl PresenceUpdate {
    async fn apply(self, gateway: &dyn PresenceGateway) -> Result<(), PresenceError> {
        match self {
            PresenceUpdate::Online(user_id) => gateway.mark_online(user_id).await,
            PresenceUpdate::Offline(user_id) => gateway.mark_offline(user_id).await,
            PresenceUpdate::JoinRoom { room_id, user_id } => {
                gateway.add_to_room(room_id, user_id).await
            }
            PresenceUpdate::LeaveRoom { room_id, user_id } => {
                gateway.remove_from_room(room_id, user_id).await
            }
        }
    }
}

enum Job {
    Apply(PresenceUpdate),
    Flush(oneshot::Sender<()>),
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Job::Apply(update) => f.debug_tuple("Apply").field(update).finish(),
            Job::Flush(_) => f.write_str("Flush"),
        }
    }
}

/// Sends presence updates to a background worker.
///
/// Sending never blocks. The worker applies updates in the order they were
/// sent and ends once every notifier clone is dropped.
#[derive(Debug, Clone)]
pub struct PresenceNotifier {
    tx: mpsc::UnboundedSender<Job>,
}

impl PresenceNotifier {
    /// Spawn the worker for a gateway.
    #[must_use]
    pub fn spawn(gateway: Arc<dyn PresenceGateway>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Apply(update) => {
                        if let Err(e) = update.apply(gateway.as_ref()).await {
                            warn!(?update, error = %e, "Presence update failed");
                        }
                    }
                    Job::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Presence worker stopped");
        });

        (Self { tx }, task)
    }

    /// Queue an update.
    pub fn notify(&self, update: PresenceUpdate) {
        if self.tx.send(Job::Apply(update)).is_err() {
            debug!(?update, "Presence worker gone, update dropped");
        }
    }

    /// Wait until every update queued before this call has been applied.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Job::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}
