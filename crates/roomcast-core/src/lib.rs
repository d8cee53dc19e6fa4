//! # roomcast-core
//!
//! The real-time fan-out hub for Roomcast.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Admission** - Validate a connection request against the [`Directory`]
//! - **Connection** - Split handle/session halves with an observable lifecycle
//! - **Routing** - Connections by ID, by user and by room
//! - **Hub** - The single event loop that owns the routing table
//! - **Presence** - Best-effort online and room presence hints
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │  Admission  │────▶│     Hub     │────▶│ RoutingTable │
//! └─────────────┘     └─────────────┘     └──────────────┘
//!                        ▲       │
//!              frames    │       │ presence updates
//!                        │       ▼
//!               ┌────────────┐  ┌──────────────────┐
//!               │  Adapter   │  │ PresenceNotifier │
//!               └────────────┘  └──────────────────┘
//! ```

pub mod admission;
pub mod connection;
pub mod directory;
pub mod hub;
pub mod message;
pub mod presence;
pub mod routing;

pub use admission::{AdmissionController, AdmissionError, AdmittedIdentity};
pub use connection::{
    ConnectionHandle, ConnectionId, ConnectionSession, ConnectionState, DeliveryError, Lifecycle,
    OutboundQueue, OUTBOUND_QUEUE_CAPACITY,
};
pub use directory::{
    Directory, DirectoryError, MessageStore, StoreError, StoredGroupMessage, StoredPrivateMessage,
    UserProfile,
};
pub use hub::{Hub, HubConfig, HubError, HubHandle, HubStats};
pub use message::{now_millis, InboundFrame, OutboundEvent};
pub use presence::{
    InMemoryPresence, PresenceError, PresenceGateway, PresenceNotifier, PresenceUpdate,
};
pub use routing::{ConnectionInfo, RoutingSnapshot, RoutingTable};
