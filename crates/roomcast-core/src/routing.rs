//! The routing table owned by the hub.
//!
//! Three views over the same set of live connections:
//!
//! - all connections by ID
//! - one connection per user (the user's current session)
//! - the set of connections attached to each room
//!
//! The table is plain data. It is only ever touched from the hub's event loop,
//! so it carries no locks.

use roomcast_protocol::{RoomId, UserId};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::connection::{ConnectionHandle, ConnectionId};

/// Routing table of live connections.
#[derive(Debug, Default)]
pub struct RoutingTable {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    by_user: HashMap<UserId, ConnectionId>,
    by_room: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl RoutingTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of users with a live session.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    /// Number of rooms with at least one attached connection.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.by_room.len()
    }

    /// Insert a connection.
    ///
    /// If the user already has a session, that session is removed from every
    /// view and returned so the caller can tear it down.
    pub fn insert(&mut self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let id = handle.id();
        let user_id = handle.user_id();

        let evicted = self
            .by_user
            .get(&user_id)
            .copied()
            .filter(|existing| *existing != id)
            .and_then(|existing| self.remove(existing));

        if let Some(room_id) = handle.room_id() {
            self.by_room.entry(room_id).or_default().insert(id);
        }
        self.by_user.insert(user_id, id);
        self.connections.insert(id, handle);

        evicted
    }

    /// Remove a connection from every view.
    ///
    /// Returns `None` if the connection is not in the table, which makes
    /// repeated removal a no-op.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionHandle> {
        let handle = self.connections.remove(&id)?;

        if self.by_user.get(&handle.user_id()) == Some(&id) {
            self.by_user.remove(&handle.user_id());
        }

        if let Some(room_id) = handle.room_id() {
            if let Some(members) = self.by_room.get_mut(&room_id) {
                members.remove(&id);
                if members.is_empty() {
                    self.by_room.remove(&room_id);
                }
            }
        }

        Some(handle)
    }

    /// Remove every connection.
    pub fn drain(&mut self) -> Vec<ConnectionHandle> {
        self.by_user.clear();
        self.by_room.clear();
        self.connections.drain().map(|(_, handle)| handle).collect()
    }

    /// Get a connection by ID.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionHandle> {
        self.connections.get(&id)
    }

    /// Get a user's current session.
    #[must_use]
    pub fn user_connection(&self, user_id: UserId) -> Option<&ConnectionHandle> {
        self.by_user
            .get(&user_id)
            .and_then(|id| self.connections.get(id))
    }

    /// IDs of the connections attached to a room.
    #[must_use]
    pub fn room_members(&self, room_id: RoomId) -> Vec<ConnectionId> {
        self.by_room
            .get(&room_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Check that the three views agree with each other.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let users_match = self.by_user.len() == self.connections.len()
            && self.by_user.iter().all(|(user_id, id)| {
                self.connections
                    .get(id)
                    .is_some_and(|handle| handle.user_id() == *user_id)
            });

        let rooms_match = self.by_room.iter().all(|(room_id, members)| {
            !members.is_empty()
                && members.iter().all(|id| {
                    self.connections
                        .get(id)
                        .is_some_and(|handle| handle.room_id() == Some(*room_id))
                })
        });

        let every_room_indexed = self.connections.values().all(|handle| match handle.room_id() {
            Some(room_id) => self
                .by_room
                .get(&room_id)
                .is_some_and(|members| members.contains(&handle.id())),
            None => true,
        });

        users_match && rooms_match && every_room_indexed
    }

    /// Take a point-in-time copy of the table for inspection.
    #[must_use]
    pub fn snapshot(&self) -> RoutingSnapshot {
        let mut connections: Vec<ConnectionInfo> = self
            .connections
            .values()
            .map(|handle| ConnectionInfo {
                id: handle.id(),
                user_id: handle.user_id(),
                room_id: handle.room_id(),
            })
            .collect();
        connections.sort_by_key(|info| info.id);

        let users = self
            .by_user
            .iter()
            .map(|(user_id, id)| (*user_id, *id))
            .collect();

        let rooms = self
            .by_room
            .iter()
            .map(|(room_id, members)| {
                let mut ids: Vec<ConnectionId> = members.iter().copied().collect();
                ids.sort();
                (*room_id, ids)
            })
            .collect();

        RoutingSnapshot {
            connections,
            users,
            rooms,
            consistent: self.is_consistent(),
        }
    }
}

/// A routed connection as seen in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection ID.
    pub id: ConnectionId,
    /// Owning user.
    pub user_id: UserId,
    /// Attached room.
    pub room_id: Option<RoomId>,
}

/// Point-in-time copy of the routing table.
#[derive(Debug, Clone, Default)]
pub struct RoutingSnapshot {
    /// All live connections, ordered by ID.
    pub connections: Vec<ConnectionInfo>,
    /// Current session per user.
    pub users: BTreeMap<UserId, ConnectionId>,
    /// Attached connections per room.
    pub rooms: BTreeMap<RoomId, Vec<ConnectionId>>,
    /// Whether the views agreed when the snapshot was taken.
    pub consistent: bool,
}

impl RoutingSnapshot {
    /// Whether a connection is present.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.iter().any(|info| info.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmittedIdentity;
    use crate::connection::{self, ConnectionSession};

    fn conn(user: i64, room: Option<i64>) -> (ConnectionHandle, ConnectionSession) {
        connection::open(AdmittedIdentity::new(
            UserId(user),
            format!("user-{user}"),
            room.map(RoomId),
        ))
    }

    #[test]
    fn test_insert_and_remove() {
        let mut table = RoutingTable::new();
        let (handle, _session) = conn(1, Some(7));
        let id = handle.id();

        assert!(table.insert(handle).is_none());
        assert_eq!(table.len(), 1);
        assert_eq!(table.room_members(RoomId(7)), vec![id]);
        assert_eq!(table.user_connection(UserId(1)).map(|h| h.id()), Some(id));
        assert!(table.is_consistent());

        assert!(table.remove(id).is_some());
        assert!(table.is_empty());
        assert_eq!(table.room_count(), 0);
        assert_eq!(table.user_count(), 0);
        assert!(table.is_consistent());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut table = RoutingTable::new();
        let (handle, _session) = conn(1, None);
        let id = handle.id();
        table.insert(handle);

        assert!(table.remove(id).is_some());
        assert!(table.remove(id).is_none());
        assert!(table.is_consistent());
    }

    #[test]
    fn test_second_session_evicts_first() {
        let mut table = RoutingTable::new();
        let (first, _s1) = conn(1, Some(7));
        let (second, _s2) = conn(1, Some(8));
        let first_id = first.id();
        let second_id = second.id();

        table.insert(first);
        let evicted = table.insert(second).expect("first session evicted");

        assert_eq!(evicted.id(), first_id);
        assert_eq!(table.len(), 1);
        assert_eq!(table.user_count(), 1);
        assert!(table.room_members(RoomId(7)).is_empty());
        assert_eq!(table.room_members(RoomId(8)), vec![second_id]);
        assert!(table.is_consistent());

        // Removing the evicted session again must not disturb the new one.
        assert!(table.remove(first_id).is_none());
        assert_eq!(
            table.user_connection(UserId(1)).map(|h| h.id()),
            Some(second_id)
        );
    }

    #[test]
    fn test_rooms_are_isolated() {
        let mut table = RoutingTable::new();
        let (a, _sa) = conn(1, Some(7));
        let (b, _sb) = conn(2, Some(7));
        let (c, _sc) = conn(3, None);
        let (d, _sd) = conn(4, Some(8));
        let (a_id, b_id) = (a.id(), b.id());
        for handle in [a, b, c, d] {
            table.insert(handle);
        }

        let mut members = table.room_members(RoomId(7));
        members.sort();
        assert_eq!(members, vec![a_id, b_id]);
        assert_eq!(table.room_count(), 2);

        let snapshot = table.snapshot();
        assert!(snapshot.consistent);
        assert_eq!(snapshot.connections.len(), 4);
        assert_eq!(snapshot.rooms[&RoomId(7)], vec![a_id, b_id]);
    }

    #[test]
    fn test_drain() {
        let mut table = RoutingTable::new();
        let (a, _sa) = conn(1, Some(7));
        let (b, _sb) = conn(2, None);
        table.insert(a);
        table.insert(b);

        assert_eq!(table.drain().len(), 2);
        assert!(table.is_empty());
        assert!(table.is_consistent());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Register { user: i64, room: Option<i64> },
            Unregister { pick: usize },
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0i64..6, proptest::option::of(0i64..3))
                    .prop_map(|(user, room)| Op::Register { user, room }),
                any::<usize>().prop_map(|pick| Op::Unregister { pick }),
            ]
        }

        proptest! {
            /// Property: the views stay consistent and one session per user holds
            /// after every register/unregister.
            #[test]
            fn prop_views_stay_consistent(ops in proptest::collection::vec(op(), 1..64)) {
                let mut table = RoutingTable::new();
                let mut seen: Vec<ConnectionId> = Vec::new();
                let mut sessions = Vec::new();

                for op in ops {
                    match op {
                        Op::Register { user, room } => {
                            let (handle, session) = conn(user, room);
                            seen.push(handle.id());
                            sessions.push(session);
                            if let Some(evicted) = table.insert(handle) {
                                prop_assert_eq!(evicted.user_id(), UserId(user));
                                prop_assert!(table.get(evicted.id()).is_none());
                            }
                        }
                        Op::Unregister { pick } => {
                            if !seen.is_empty() {
                                let id = seen[pick % seen.len()];
                                table.remove(id);
                                prop_assert!(table.get(id).is_none());
                            }
                        }
                    }

                    prop_assert!(table.is_consistent());
                    prop_assert_eq!(table.user_count(), table.len());
                }
            }
        }
    }
}
