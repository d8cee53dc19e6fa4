//! Connections and their lifecycle.
//!
//! A connection is split in two halves when it is opened:
//!
//! - [`ConnectionHandle`] holds the sending side of the outbound queue and is
//!   handed to the hub, which keeps it in the routing table.
//! - [`ConnectionSession`] holds the receiving side and is owned by the
//!   connection adapter that drives the socket.
//!
//! Dropping the handle closes the queue, which is how the hub tells the send
//! loop to finish.

use bytes::Bytes;
use roomcast_protocol::{RoomId, UserId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::trace;

use crate::admission::AdmittedIdentity;

/// Capacity of every connection's outbound queue.
///
/// A client that lets this many messages pile up is dropped as a slow consumer.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{:x}", self.0)
    }
}

/// Lifecycle states of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Admitted and upgraded, not yet registered with the hub.
    Pending,
    /// Registered in the routing table, both loops running.
    Active,
    /// Teardown started.
    Closing,
    /// Removed from the routing table with its queue closed. Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether teardown has started.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Pending => "pending",
            ConnectionState::Active => "active",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Shared, observable lifecycle of one connection.
///
/// Only `Pending -> Active`, `Pending | Active -> Closing` and
/// `Closing -> Closed` are accepted; every other transition is a no-op that
/// returns `false`.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Lifecycle {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Pending);
        Self {
            state: Arc::new(state),
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Move `Pending -> Active`.
    pub fn activate(&self) -> bool {
        self.transition(|s| s == ConnectionState::Pending, ConnectionState::Active)
    }

    /// Start teardown. Returns `true` only for the call that started it.
    pub fn begin_close(&self) -> bool {
        self.transition(
            |s| matches!(s, ConnectionState::Pending | ConnectionState::Active),
            ConnectionState::Closing,
        )
    }

    /// Move `Closing -> Closed`.
    pub fn finish_close(&self) -> bool {
        self.transition(|s| s == ConnectionState::Closing, ConnectionState::Closed)
    }

    /// Wait until teardown has started.
    pub async fn terminating(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(ConnectionState::is_terminating).await;
    }

    fn transition(
        &self,
        allowed: impl FnOnce(ConnectionState) -> bool,
        next: ConnectionState,
    ) -> bool {
        self.state.send_if_modified(|state| {
            if allowed(*state) {
                trace!(from = %state, to = %next, "Connection state change");
                *state = next;
                true
            } else {
                false
            }
        })
    }
}

/// Why a message could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The outbound queue is full.
    #[error("outbound queue full (slow consumer)")]
    SlowConsumer,

    /// The adapter side of the queue is gone.
    #[error("outbound queue closed")]
    Closed,
}

/// Hub-side half of a connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    identity: AdmittedIdentity,
    outbound: mpsc::Sender<Bytes>,
    lifecycle: Lifecycle,
}

impl ConnectionHandle {
    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the owning user.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    /// Get the room the connection is bound to, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<RoomId> {
        self.identity.room_id
    }

    /// Get the admitted identity.
    #[must_use]
    pub fn identity(&self) -> &AdmittedIdentity {
        &self.identity
    }

    /// Get the lifecycle.
    #[must_use]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Queue a message without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::SlowConsumer`] when the queue is full and
    /// [`DeliveryError::Closed`] when the adapter is gone.
    pub fn try_deliver(&self, payload: Bytes) -> Result<(), DeliveryError> {
        self.outbound.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::SlowConsumer,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Tear the connection down: start closing, close the queue, finish closing.
    ///
    /// Messages already queued are still delivered by the send loop before it
    /// observes the closed queue.
    pub fn close(self) {
        let ConnectionHandle {
            lifecycle,
            outbound,
            ..
        } = self;
        lifecycle.begin_close();
        drop(outbound);
        lifecycle.finish_close();
    }
}

/// Receiving side of a connection's outbound queue.
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::Receiver<Bytes>,
}

impl OutboundQueue {
    /// Wait for the next message. Returns `None` once the queue is closed and drained.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take the next message if one is ready.
    pub fn try_next(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}

/// Adapter-side half of a connection.
#[derive(Debug)]
pub struct ConnectionSession {
    /// Connection ID.
    pub id: ConnectionId,
    /// Identity bound to this connection.
    pub identity: AdmittedIdentity,
    /// Shared lifecycle.
    pub lifecycle: Lifecycle,
    /// Messages waiting to be written to the socket.
    pub queue: OutboundQueue,
}

/// Open a connection for an admitted identity.
#[must_use]
pub fn open(identity: AdmittedIdentity) -> (ConnectionHandle, ConnectionSession) {
    open_with_capacity(identity, OUTBOUND_QUEUE_CAPACITY)
}

/// Open a connection with a custom outbound queue capacity.
#[must_use]
pub fn open_with_capacity(
    identity: AdmittedIdentity,
    capacity: usize,
) -> (ConnectionHandle, ConnectionSession) {
    let id = ConnectionId::generate();
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let lifecycle = Lifecycle::new();

    let handle = ConnectionHandle {
        id,
        identity: identity.clone(),
        outbound: tx,
        lifecycle: lifecycle.clone(),
    };
    let session = ConnectionSession {
        id,
        identity,
        lifecycle,
        queue: OutboundQueue { rx },
    };

    (handle, session)
}
