//! # roomcast-transport
//!
//! Socket abstraction and the per-connection adapter for Roomcast.
//!
//! - **Traits** - [`SocketReader`] and [`SocketWriter`], the two halves of a socket
//! - **Adapter** - [`ConnectionAdapter`] runs the receive and send loops
//! - **Memory** - An in-process socket pair for tests and embedding
//! - **WebSocket** - axum WebSocket halves (feature `websocket`)
//!
//! ```rust,ignore
//! use roomcast_transport::{websocket, ConnectionAdapter};
//!
//! async fn on_upgrade(socket: WebSocket, identity: AdmittedIdentity, hub: HubHandle) {
//!     let (reader, writer) = websocket::split(socket, 64 * 1024);
//!     if let Ok(adapter) = ConnectionAdapter::attach(identity, reader, writer, hub) {
//!         adapter.run().await;
//!     }
//! }
//! ```

pub mod adapter;
pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use adapter::{AdapterSummary, ConnectionAdapter};
pub use traits::{SocketReader, SocketWriter, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketReader, WebSocketWriter};
