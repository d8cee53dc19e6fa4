//! Socket abstraction traits for Roomcast.
//!
//! A physical socket is used as two independent halves so the receive loop and
//! the send loop of a connection can run concurrently without sharing a lock.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport errors.
///
/// Every variant is fatal to the one connection that produced it.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Incoming message exceeds the configured limit.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Received size.
        size: usize,
        /// Configured limit.
        max: usize,
    },
}

/// Receiving half of a socket.
#[async_trait]
pub trait SocketReader: Send {
    /// Receive the next message.
    ///
    /// Returns `Ok(None)` when the peer closed the socket cleanly. Control
    /// messages (ping, pong) are handled by the implementation and never
    /// surface here.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// Sending half of a socket.
#[async_trait]
pub trait SocketWriter: Send {
    /// Write one message.
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Close the socket. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = TransportError::MessageTooLarge {
            size: 2048,
            max: 1024,
        };
        assert_eq!(err.to_string(), "Message too large: 2048 bytes (max: 1024)");
        assert_eq!(TransportError::ConnectionClosed.to_string(), "Connection closed");
    }
}
