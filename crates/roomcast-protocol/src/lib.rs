//! # roomcast-protocol
//!
//! Wire definitions for the Roomcast fan-out hub.
//!
//! Clients exchange JSON envelopes over a websocket:
//!
//! ```json
//! {"type": "message", "room_id": 7, "user_id": 1, "username": "alice",
//!  "content": "hi", "timestamp": 1700000000000}
//! ```
//!
//! `type` is one of `message`, `join`, `leave` or `error`. The server never
//! trusts `user_id`, `room_id` or `username` coming from a client; they are
//! overwritten with the identity bound to the sending connection.
//!
//! ## Example
//!
//! ```rust
//! use roomcast_protocol::{codec, Envelope, RoomId, UserId};
//!
//! let frame = codec::encode(&Envelope::message("hi")).unwrap();
//! let stamped = codec::restamp(&frame, UserId(1), "alice", RoomId(7), 0).unwrap();
//! let envelope = codec::decode(&stamped).unwrap();
//! assert_eq!(envelope.room_id, RoomId(7));
//! ```

pub mod codec;
pub mod envelope;
pub mod ids;

pub use codec::{decode, encode, restamp, ProtocolError};
pub use envelope::{Envelope, EnvelopeKind};
pub use ids::{RoomId, UserId};
