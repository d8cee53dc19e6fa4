//! The hub event loop.
//!
//! One task owns the [`RoutingTable`] and applies every change to it in the
//! order commands arrive. Everything else talks to the hub through a cloneable
//! [`HubHandle`]:
//!
//! - control commands (register, unregister, fan-out, queries) travel over an
//!   unbounded channel and never block the caller
//! - inbound client frames travel over a bounded channel, so a flood of frames
//!   slows the receive loops that produce them
//!
//! Control commands are always served before pending inbound frames. A
//! connection's closing notice and stats queries ride the inbound channel, so
//! they are handled only after every frame queued ahead of them.

use bytes::Bytes;
use roomcast_protocol::{codec, RoomId, UserId};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::connection::{ConnectionHandle, ConnectionId, DeliveryError};
use crate::message::{now_millis, InboundFrame, OutboundEvent};
use crate::presence::{PresenceNotifier, PresenceUpdate};
use crate::routing::{RoutingSnapshot, RoutingTable};

/// Hub errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HubError {
    /// The event loop has stopped.
    #[error("hub is not running")]
    Stopped,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the inbound frame channel shared by all connections.
    pub inbound_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 1024,
        }
    }
}

/// Hub counters and sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Live connections.
    pub connections: usize,
    /// Users with a live session.
    pub users: usize,
    /// Rooms with at least one attached connection.
    pub rooms: usize,
    /// Connections registered since start.
    pub registered_total: u64,
    /// Sessions evicted by a newer session of the same user.
    pub sessions_replaced: u64,
    /// Connections dropped because their outbound queue was full.
    pub slow_consumers_evicted: u64,
    /// Room broadcasts dispatched.
    pub broadcasts: u64,
    /// Direct messages queued for a live session.
    pub direct_messages: u64,
    /// Direct messages dropped because the user had no live session.
    pub direct_undeliverable: u64,
    /// Client frames received.
    pub frames_received: u64,
    /// Client frames dropped without being broadcast.
    pub frames_rejected: u64,
}

#[derive(Debug)]
enum HubCommand {
    Register(ConnectionHandle),
    Unregister(ConnectionId),
    Deliver(OutboundEvent),
    Shutdown,
}

#[derive(Debug)]
enum InboundEvent {
    Frame(InboundFrame),
    Closed(ConnectionId),
    Stats(oneshot::Sender<HubStats>),
    Snapshot(oneshot::Sender<RoutingSnapshot>),
}

/// Cloneable handle to a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    control: mpsc::UnboundedSender<HubCommand>,
    inbound: mpsc::Sender<InboundEvent>,
}

impl HubHandle {
    fn command(&self, cmd: HubCommand) -> Result<(), HubError> {
        self.control.send(cmd).map_err(|_| HubError::Stopped)
    }

    async fn push(&self, event: InboundEvent) -> Result<(), HubError> {
        self.inbound.send(event).await.map_err(|_| HubError::Stopped)
    }

    /// Hand a freshly opened connection to the hub.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub fn register(&self, handle: ConnectionHandle) -> Result<(), HubError> {
        self.command(HubCommand::Register(handle))
    }

    /// Remove a connection. Safe to call more than once.
    pub fn unregister(&self, id: ConnectionId) {
        if self.command(HubCommand::Unregister(id)).is_err() {
            trace!(connection = %id, "Hub stopped before unregister");
        }
    }

    /// Fan a payload out to every connection attached to a room.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub fn broadcast_to_room(
        &self,
        room_id: RoomId,
        payload: impl Into<Bytes>,
    ) -> Result<(), HubError> {
        self.command(HubCommand::Deliver(OutboundEvent::room(room_id, payload)))
    }

    /// Push a payload to a user's live session, if there is one.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub fn send_to_user(&self, user_id: UserId, payload: impl Into<Bytes>) -> Result<(), HubError> {
        self.command(HubCommand::Deliver(OutboundEvent::direct(user_id, payload)))
    }

    /// Forward a frame received from a client.
    ///
    /// Waits while the inbound channel is full.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub async fn forward(&self, frame: InboundFrame) -> Result<(), HubError> {
        self.push(InboundEvent::Frame(frame)).await
    }

    /// Report that a connection's socket is gone.
    ///
    /// Unlike [`HubHandle::unregister`], the connection is removed only after
    /// every frame it forwarded earlier has been handled.
    pub async fn disconnect(&self, id: ConnectionId) {
        if self.push(InboundEvent::Closed(id)).await.is_err() {
            trace!(connection = %id, "Hub stopped before disconnect");
        }
    }

    /// Fetch counters.
    ///
    /// The answer reflects every control command and every inbound frame sent
    /// before this call.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (tx, rx) = oneshot::channel();
        self.push(InboundEvent::Stats(tx)).await?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Fetch a copy of the routing table.
    ///
    /// Ordered like [`HubHandle::stats`].
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub async fn snapshot(&self) -> Result<RoutingSnapshot, HubError> {
        let (tx, rx) = oneshot::channel();
        self.push(InboundEvent::Snapshot(tx)).await?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Stop the event loop. Every remaining connection is torn down.
    pub fn shutdown(&self) {
        let _ = self.command(HubCommand::Shutdown);
    }

    /// Whether the event loop has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }
}

/// The hub event loop.
pub struct Hub {
    table: RoutingTable,
    stats: HubStats,
    control: mpsc::UnboundedReceiver<HubCommand>,
    inbound: mpsc::Receiver<InboundEvent>,
    presence: PresenceNotifier,
}

impl Hub {
    /// Create a hub and its handle. Nothing runs until [`Hub::run`] is polled.
    #[must_use]
    pub fn new(config: HubConfig, presence: PresenceNotifier) -> (Self, HubHandle) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));

        let hub = Self {
            table: RoutingTable::new(),
            stats: HubStats::default(),
            control: control_rx,
            inbound: inbound_rx,
            presence,
        };
        let handle = HubHandle {
            control: control_tx,
            inbound: inbound_tx,
        };

        (hub, handle)
    }

    /// Create a hub and run it on a new task.
    #[must_use]
    pub fn spawn(config: HubConfig, presence: PresenceNotifier) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config, presence);
        (handle, tokio::spawn(hub.run()))
    }

    /// Run until shut down or until every handle is dropped.
    pub async fn run(mut self) {
        info!("Hub started");

        loop {
            tokio::select! {
                biased;

                cmd = self.control.recv() => match cmd {
                    Some(HubCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(event) = self.inbound.recv() => self.handle_inbound(event),
            }
        }

        let remaining = self.table.drain();
        info!(connections = remaining.len(), "Hub stopping");
        for handle in remaining {
            self.depart(handle.user_id(), handle.room_id());
            handle.close();
        }
    }

    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register(handle) => self.register(handle),
            HubCommand::Unregister(id) => self.unregister(id),
            HubCommand::Deliver(OutboundEvent::RoomBroadcast { room_id, payload }) => {
                self.broadcast(room_id, payload);
            }
            HubCommand::Deliver(OutboundEvent::DirectMessage { user_id, payload }) => {
                self.send_to_user(user_id, payload);
            }
            HubCommand::Shutdown => {}
        }
    }

    fn handle_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Frame(frame) => self.handle_frame(frame),
            InboundEvent::Closed(id) => self.unregister(id),
            InboundEvent::Stats(reply) => {
                let _ = reply.send(self.current_stats());
            }
            InboundEvent::Snapshot(reply) => {
                let _ = reply.send(self.table.snapshot());
            }
        }
    }

    fn register(&mut self, handle: ConnectionHandle) {
        if !handle.lifecycle().activate() {
            debug!(connection = %handle.id(), "Connection closed before registration");
            handle.close();
            return;
        }

        let id = handle.id();
        let user_id = handle.user_id();
        let room_id = handle.room_id();

        if let Some(previous) = self.table.insert(handle) {
            self.stats.sessions_replaced += 1;
            debug!(
                connection = %previous.id(),
                replaced_by = %id,
                user = %user_id,
                "Session replaced"
            );
            // The user stays online; only a room they are no longer in is left.
            if let Some(old_room) = previous.room_id().filter(|r| Some(*r) != room_id) {
                self.presence.notify(PresenceUpdate::LeaveRoom {
                    room_id: old_room,
                    user_id,
                });
            }
            previous.close();
        }

        self.stats.registered_total += 1;
        self.presence.notify(PresenceUpdate::Online(user_id));
        if let Some(room_id) = room_id {
            self.presence
                .notify(PresenceUpdate::JoinRoom { room_id, user_id });
        }

        debug!(
            connection = %id,
            user = %user_id,
            room = ?room_id.map(RoomId::get),
            connections = self.table.len(),
            "Connection registered"
        );
    }

    fn unregister(&mut self, id: ConnectionId) {
        let Some(handle) = self.table.remove(id) else {
            trace!(connection = %id, "Unregister for unknown connection");
            return;
        };

        self.depart(handle.user_id(), handle.room_id());
        handle.close();

        debug!(
            connection = %id,
            connections = self.table.len(),
            "Connection unregistered"
        );
    }

    fn depart(&self, user_id: UserId, room_id: Option<RoomId>) {
        self.presence.notify(PresenceUpdate::Offline(user_id));
        if let Some(room_id) = room_id {
            self.presence
                .notify(PresenceUpdate::LeaveRoom { room_id, user_id });
        }
    }

    fn broadcast(&mut self, room_id: RoomId, payload: Bytes) {
        self.stats.broadcasts += 1;
        let members = self.table.room_members(room_id);
        let delivered = self.deliver(&members, &payload);
        trace!(room = %room_id, recipients = delivered, "Broadcast");
    }

    fn send_to_user(&mut self, user_id: UserId, payload: Bytes) {
        let Some(id) = self.table.user_connection(user_id).map(ConnectionHandle::id) else {
            self.stats.direct_undeliverable += 1;
            trace!(user = %user_id, "No live session, direct message dropped");
            return;
        };

        if self.deliver(&[id], &payload) > 0 {
            self.stats.direct_messages += 1;
        }
    }

    /// Queue a payload on each connection; tear down every one that refuses it.
    fn deliver(&mut self, ids: &[ConnectionId], payload: &Bytes) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for id in ids {
            let Some(handle) = self.table.get(*id) else {
                continue;
            };
            match handle.try_deliver(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => failed.push((*id, e)),
            }
        }

        for (id, error) in failed {
            match error {
                DeliveryError::SlowConsumer => {
                    self.stats.slow_consumers_evicted += 1;
                    warn!(connection = %id, "Dropping slow consumer");
                }
                DeliveryError::Closed => {
                    debug!(connection = %id, "Outbound queue closed");
                }
            }
            self.unregister(id);
        }

        delivered
    }

    fn handle_frame(&mut self, frame: InboundFrame) {
        self.stats.frames_received += 1;

        let stamped = match self.table.get(frame.connection) {
            None => {
                trace!(connection = %frame.connection, "Frame from unregistered connection");
                None
            }
            Some(handle) => match handle.room_id() {
                None => {
                    debug!(
                        connection = %frame.connection,
                        "Dropping frame from unicast-only connection"
                    );
                    None
                }
                Some(room_id) => {
                    let identity = handle.identity();
                    match codec::restamp(
                        &frame.payload,
                        identity.user_id,
                        &identity.username,
                        room_id,
                        now_millis(),
                    ) {
                        Ok(bytes) => Some((room_id, bytes)),
                        Err(e) => {
                            debug!(connection = %frame.connection, error = %e, "Dropping malformed frame");
                            None
                        }
                    }
                }
            },
        };

        match stamped {
            Some((room_id, bytes)) => self.broadcast(room_id, bytes),
            None => self.stats.frames_rejected += 1,
        }
    }

    fn current_stats(&self) -> HubStats {
        HubStats {
            connections: self.table.len(),
            users: self.table.user_count(),
            rooms: self.table.room_count(),
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmittedIdentity;
    use crate::connection::{self, ConnectionSession, ConnectionState, OUTBOUND_QUEUE_CAPACITY};
    use crate::presence::{InMemoryPresence, PresenceError, PresenceGateway};
    use async_trait::async_trait;
    use roomcast_protocol::{Envelope, EnvelopeKind};
    use std::sync::Arc;
    use std::time::Duration;

    struct TestHub {
        hub: HubHandle,
        presence: Arc<InMemoryPresence>,
        notifier: PresenceNotifier,
        task: JoinHandle<()>,
    }

    impl TestHub {
        fn start() -> Self {
            let presence = Arc::new(InMemoryPresence::default());
            let (notifier, _worker) = PresenceNotifier::spawn(presence.clone());
            let (hub, task) = Hub::spawn(HubConfig::default(), notifier.clone());
            Self {
                hub,
                presence,
                notifier,
                task,
            }
        }

        fn connect(&self, user: i64, room: Option<i64>) -> ConnectionSession {
            let (handle, session) = connection::open(AdmittedIdentity::new(
                UserId(user),
                format!("user-{user}"),
                room.map(RoomId),
            ));
            self.hub.register(handle).unwrap();
            session
        }

        /// Wait for every command and frame sent so far, then for presence.
        async fn settle(&self) -> HubStats {
            let stats = self.hub.stats().await.unwrap();
            self.notifier.flush().await;
            stats
        }
    }

    async fn recv(session: &mut ConnectionSession) -> Option<Bytes> {
        tokio::time::timeout(Duration::from_secs(1), session.queue.next())
            .await
            .expect("timed out waiting for a message")
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let t = TestHub::start();
        let session = t.connect(1, Some(7));

        let stats = t.settle().await;
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.rooms, 1);
        assert_eq!(session.lifecycle.state(), ConnectionState::Active);
        assert!(t.presence.is_online(UserId(1)).await.unwrap());
        assert_eq!(t.presence.room_users(RoomId(7)).await.unwrap(), vec![UserId(1)]);

        t.hub.unregister(session.id);
        let stats = t.settle().await;
        assert_eq!(stats.connections, 0);
        assert_eq!(session.lifecycle.state(), ConnectionState::Closed);
        assert!(!t.presence.is_online(UserId(1)).await.unwrap());
        assert!(t.presence.room_users(RoomId(7)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let t = TestHub::start();
        let _a = t.connect(1, Some(7));
        let b = t.connect(2, Some(7));

        t.hub.unregister(b.id);
        t.hub.unregister(b.id);
        let snapshot = t.hub.snapshot().await.unwrap();

        assert_eq!(snapshot.connections.len(), 1);
        assert!(!snapshot.contains(b.id));
        assert!(snapshot.consistent);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_exactly_the_room() {
        let t = TestHub::start();
        let mut a = t.connect(1, Some(7));
        let mut b = t.connect(2, Some(7));
        let mut c = t.connect(3, None);
        let mut d = t.connect(4, Some(8));

        t.hub.broadcast_to_room(RoomId(7), &b"hello"[..]).unwrap();
        let stats = t.settle().await;

        assert_eq!(stats.broadcasts, 1);
        assert_eq!(a.queue.try_next(), Some(Bytes::from_static(b"hello")));
        assert_eq!(b.queue.try_next(), Some(Bytes::from_static(b"hello")));
        assert_eq!(c.queue.try_next(), None);
        assert_eq!(d.queue.try_next(), None);
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_room() {
        let t = TestHub::start();
        let mut a = t.connect(1, Some(7));

        t.hub.broadcast_to_room(RoomId(99), &b"nobody"[..]).unwrap();
        let stats = t.settle().await;

        assert_eq!(stats.broadcasts, 1);
        assert_eq!(a.queue.try_next(), None);
    }

    #[tokio::test]
    async fn test_send_to_user() {
        let t = TestHub::start();
        let mut a = t.connect(1, Some(7));
        let mut b = t.connect(2, None);

        t.hub.send_to_user(UserId(2), &b"psst"[..]).unwrap();
        let stats = t.settle().await;

        assert_eq!(stats.direct_messages, 1);
        assert_eq!(b.queue.try_next(), Some(Bytes::from_static(b"psst")));
        assert_eq!(a.queue.try_next(), None);
    }

    #[tokio::test]
    async fn test_send_to_absent_user_is_silent() {
        let t = TestHub::start();
        let mut a = t.connect(1, Some(7));

        t.hub.send_to_user(UserId(2), &b"psst"[..]).unwrap();
        let stats = t.settle().await;

        assert_eq!(stats.direct_undeliverable, 1);
        assert_eq!(stats.connections, 1);
        assert_eq!(a.queue.try_next(), None);
        assert_eq!(a.lifecycle.state(), ConnectionState::Active);
    }

    #[tokio::test]
    async fn test_second_session_evicts_first() {
        let t = TestHub::start();
        let mut first = t.connect(1, Some(7));
        let mut second = t.connect(1, Some(8));

        let stats = t.settle().await;
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.sessions_replaced, 1);
        assert_eq!(first.lifecycle.state(), ConnectionState::Closed);
        assert_eq!(first.queue.next().await, None);
        assert!(t.presence.is_online(UserId(1)).await.unwrap());
        assert!(t.presence.room_users(RoomId(7)).await.unwrap().is_empty());
        assert_eq!(t.presence.room_users(RoomId(8)).await.unwrap(), vec![UserId(1)]);

        // The evicted adapter unregisters itself late; the new session survives.
        t.hub.unregister(first.id);
        t.hub.send_to_user(UserId(1), &b"still here"[..]).unwrap();
        let stats = t.settle().await;

        assert_eq!(stats.connections, 1);
        assert_eq!(second.queue.try_next(), Some(Bytes::from_static(b"still here")));
        assert!(t.presence.is_online(UserId(1)).await.unwrap());

        let snapshot = t.hub.snapshot().await.unwrap();
        assert_eq!(snapshot.users[&UserId(1)], second.id);
        assert!(snapshot.consistent);
    }

    #[tokio::test]
    async fn test_reconnect_into_same_room_keeps_presence() {
        let t = TestHub::start();
        let _first = t.connect(1, Some(7));
        let _second = t.connect(1, Some(7));
        t.settle().await;

        assert_eq!(t.presence.room_users(RoomId(7)).await.unwrap(), vec![UserId(1)]);
    }

    #[tokio::test]
    async fn test_slow_consumer_is_removed() {
        let t = TestHub::start();
        let mut slow = t.connect(1, Some(7));
        let mut healthy = t.connect(2, Some(7));

        for i in 0..=OUTBOUND_QUEUE_CAPACITY {
            t.hub.broadcast_to_room(RoomId(7), i.to_string()).unwrap();
            // Keep the second connection drained.
            if i % 64 == 0 {
                t.settle().await;
                while healthy.queue.try_next().is_some() {}
            }
        }
        let stats = t.settle().await;

        assert_eq!(stats.slow_consumers_evicted, 1);
        assert_eq!(stats.connections, 1);
        assert_eq!(slow.lifecycle.state(), ConnectionState::Closed);
        assert!(!t.presence.is_online(UserId(1)).await.unwrap());

        let mut queued = 0;
        while slow.queue.next().await.is_some() {
            queued += 1;
        }
        assert_eq!(queued, OUTBOUND_QUEUE_CAPACITY);
        assert_eq!(healthy.lifecycle.state(), ConnectionState::Active);
    }

    #[tokio::test]
    async fn test_dropped_session_is_removed_on_delivery() {
        let t = TestHub::start();
        let gone = t.connect(1, Some(7));
        let gone_id = gone.id;
        drop(gone);

        t.hub.broadcast_to_room(RoomId(7), &b"x"[..]).unwrap();
        let snapshot = t.hub.snapshot().await.unwrap();

        assert!(!snapshot.contains(gone_id));
        assert_eq!(t.hub.stats().await.unwrap().slow_consumers_evicted, 0);
    }

    #[tokio::test]
    async fn test_room_frame_is_stamped_and_broadcast() {
        let t = TestHub::start();
        let mut a = t.connect(1, Some(7));
        let mut b = t.connect(2, Some(7));
        let mut c = t.connect(3, None);
        t.settle().await;

        let frame = br#"{"type":"message","content":"hi","user_id":99,"room_id":1}"#;
        t.hub
            .forward(InboundFrame::new(a.id, Bytes::from_static(frame)))
            .await
            .unwrap();

        for session in [&mut a, &mut b] {
            let bytes = recv(session).await.unwrap();
            let envelope: Envelope = codec::decode(&bytes).unwrap();
            assert_eq!(envelope.kind, EnvelopeKind::Message);
            assert_eq!(envelope.user_id, UserId(1));
            assert_eq!(envelope.username, "user-1");
            assert_eq!(envelope.room_id, RoomId(7));
            assert_eq!(envelope.content, "hi");
            assert!(envelope.timestamp > 0);
        }
        assert_eq!(c.queue.try_next(), None);
    }

    #[tokio::test]
    async fn test_rejected_frames() {
        let t = TestHub::start();
        let mut a = t.connect(1, Some(7));
        let c = t.connect(3, None);
        t.settle().await;

        t.hub
            .forward(InboundFrame::new(c.id, &br#"{"type":"message","content":"x"}"#[..]))
            .await
            .unwrap();
        t.hub
            .forward(InboundFrame::new(a.id, &b"not json"[..]))
            .await
            .unwrap();
        t.hub
            .forward(InboundFrame::new(a.id, &br#"{"type":"message","content":"ok"}"#[..]))
            .await
            .unwrap();

        // Frames are handled in order, so the first delivery means all were seen.
        let bytes = recv(&mut a).await.unwrap();
        assert_eq!(codec::decode(&bytes).unwrap().content, "ok");

        let stats = t.hub.stats().await.unwrap();
        assert_eq!(stats.frames_received, 3);
        assert_eq!(stats.frames_rejected, 2);
    }

    #[tokio::test]
    async fn test_disconnect_after_frames() {
        let t = TestHub::start();
        let a = t.connect(1, Some(7));
        let mut b = t.connect(2, Some(7));
        t.settle().await;

        t.hub
            .forward(InboundFrame::new(a.id, &br#"{"type":"message","content":"bye"}"#[..]))
            .await
            .unwrap();
        t.hub.disconnect(a.id).await;

        let stats = t.settle().await;
        assert_eq!(stats.frames_received, 1);
        assert_eq!(stats.frames_rejected, 0);
        assert_eq!(stats.connections, 1);
        assert_eq!(a.lifecycle.state(), ConnectionState::Closed);

        let bytes = recv(&mut b).await.unwrap();
        let envelope = codec::decode(&bytes).unwrap();
        assert_eq!(envelope.user_id, UserId(1));
        assert_eq!(envelope.content, "bye");
    }

    #[tokio::test]
    async fn test_stats_include_queued_frames() {
        let t = TestHub::start();
        let a = t.connect(1, Some(7));

        for _ in 0..3 {
            t.hub
                .forward(InboundFrame::new(a.id, &br#"{"type":"message","content":"x"}"#[..]))
                .await
                .unwrap();
        }

        let stats = t.hub.stats().await.unwrap();
        assert_eq!(stats.frames_received, 3);
        assert_eq!(stats.broadcasts, 3);
    }

    #[tokio::test]
    async fn test_closed_before_registration() {
        let t = TestHub::start();
        let (handle, session) = connection::open(AdmittedIdentity::new(UserId(1), "a", None));
        session.lifecycle.begin_close();
        t.hub.register(handle).unwrap();

        let stats = t.settle().await;
        assert_eq!(stats.connections, 0);
        assert_eq!(session.lifecycle.state(), ConnectionState::Closed);
    }

    struct FailingGateway;

    #[async_trait]
    impl PresenceGateway for FailingGateway {
        async fn mark_online(&self, _: UserId) -> Result<(), PresenceError> {
            Err(PresenceError::Unavailable("down".into()))
        }
        async fn mark_offline(&self, _: UserId) -> Result<(), PresenceError> {
            Err(PresenceError::Unavailable("down".into()))
        }
        async fn add_to_room(&self, _: RoomId, _: UserId) -> Result<(), PresenceError> {
            Err(PresenceError::Unavailable("down".into()))
        }
        async fn remove_from_room(&self, _: RoomId, _: UserId) -> Result<(), PresenceError> {
            Err(PresenceError::Unavailable("down".into()))
        }
        async fn is_online(&self, _: UserId) -> Result<bool, PresenceError> {
            Err(PresenceError::Unavailable("down".into()))
        }
        async fn room_users(&self, _: RoomId) -> Result<Vec<UserId>, PresenceError> {
            Err(PresenceError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_presence_failure_does_not_block_routing() {
        let (notifier, _worker) = PresenceNotifier::spawn(Arc::new(FailingGateway));
        let (hub, _task) = Hub::spawn(HubConfig::default(), notifier.clone());

        let (handle, mut session) =
            connection::open(AdmittedIdentity::new(UserId(1), "a", Some(RoomId(7))));
        hub.register(handle).unwrap();
        hub.broadcast_to_room(RoomId(7), &b"hi"[..]).unwrap();
        notifier.flush().await;

        assert_eq!(recv(&mut session).await, Some(Bytes::from_static(b"hi")));
        assert_eq!(hub.stats().await.unwrap().connections, 1);
    }

    #[tokio::test]
    async fn test_shutdown_tears_down_connections() {
        let t = TestHub::start();
        let mut a = t.connect(1, Some(7));
        t.settle().await;

        t.hub.shutdown();
        t.task.await.unwrap();

        assert_eq!(a.lifecycle.state(), ConnectionState::Closed);
        assert_eq!(a.queue.next().await, None);
        assert_eq!(t.hub.stats().await, Err(HubError::Stopped));
        assert!(t.hub.is_closed());

        t.notifier.flush().await;
        assert!(!t.presence.is_online(UserId(1)).await.unwrap());
    }
}
