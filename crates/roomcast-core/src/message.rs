//! Internal message types for the hub.
//!
//! Payloads are opaque [`Bytes`]; cloning one for every recipient of a room
//! broadcast only bumps a reference count.

use bytes::Bytes;
use roomcast_protocol::{RoomId, UserId};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::connection::ConnectionId;

/// Current wall-clock time in Unix milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// An event to fan out through the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// Deliver to every connection attached to a room.
    RoomBroadcast {
        /// Target room.
        room_id: RoomId,
        /// Opaque payload.
        payload: Bytes,
    },
    /// Deliver to the live session of one user.
    DirectMessage {
        /// Target user.
        user_id: UserId,
        /// Opaque payload.
        payload: Bytes,
    },
}

impl OutboundEvent {
    /// Create a room broadcast.
    #[must_use]
    pub fn room(room_id: RoomId, payload: impl Into<Bytes>) -> Self {
        OutboundEvent::RoomBroadcast {
            room_id,
            payload: payload.into(),
        }
    }

    /// Create a direct message.
    #[must_use]
    pub fn direct(user_id: UserId, payload: impl Into<Bytes>) -> Self {
        OutboundEvent::DirectMessage {
            user_id,
            payload: payload.into(),
        }
    }
}

/// A raw frame received from one connection.
///
/// The frame is tagged with the receiving connection so the hub can stamp the
/// authoritative sender identity; nothing inside the payload is trusted.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// Connection the frame arrived on.
    pub connection: ConnectionId,
    /// Raw frame bytes.
    pub payload: Bytes,
}

impl InboundFrame {
    /// Create a new inbound frame.
    #[must_use]
    pub fn new(connection: ConnectionId, payload: impl Into<Bytes>) -> Self {
        Self {
            connection,
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_event_constructors() {
        let event = OutboundEvent::room(RoomId(7), b"hello".to_vec());
        assert_eq!(
            event,
            OutboundEvent::RoomBroadcast {
                room_id: RoomId(7),
                payload: Bytes::from_static(b"hello"),
            }
        );

        let event = OutboundEvent::direct(UserId(1), Bytes::from_static(b"psst"));
        assert!(matches!(
            event,
            OutboundEvent::DirectMessage { user_id: UserId(1), .. }
        ));
    }

    #[test]
    fn test_now_millis_is_recent() {
        // 2020-01-01 in milliseconds
        assert!(now_millis() > 1_577_836_800_000);
    }
}
