//! In-process socket pair.
//!
//! The server side gets a [`MemoryReader`] and a [`MemoryWriter`]; the test or
//! embedding code drives the other end through a [`MemoryPeer`].

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{SocketReader, SocketWriter, TransportError};

/// Create a connected socket pair.
#[must_use]
pub fn pair() -> (MemoryReader, MemoryWriter, MemoryPeer) {
    let (to_server, from_peer) = mpsc::unbounded_channel();
    let (to_peer, from_server) = mpsc::unbounded_channel();

    (
        MemoryReader { rx: from_peer },
        MemoryWriter { tx: Some(to_peer) },
        MemoryPeer {
            tx: Some(to_server),
            rx: Some(from_server),
        },
    )
}

/// Server-side receiving half.
#[derive(Debug)]
pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Result<Bytes, TransportError>>,
}

#[async_trait]
impl SocketReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        self.rx.recv().await.transpose()
    }
}

/// Server-side sending half.
#[derive(Debug)]
pub struct MemoryWriter {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

#[async_trait]
impl SocketWriter for MemoryWriter {
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(data).map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

/// The client end of a memory socket.
#[derive(Debug)]
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Result<Bytes, TransportError>>>,
    rx: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl MemoryPeer {
    /// Send a message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if either side has closed.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(Ok(data.into()))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Make the server's next read fail.
    pub fn inject_error(&self, reason: &str) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Err(TransportError::ReceiveFailed(reason.to_string())));
        }
    }

    /// Receive the next message written by the server.
    ///
    /// Returns `None` once the server has closed the socket.
    pub async fn recv(&mut self) -> Option<Bytes> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Close the sending direction, as a client close frame would.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Stop accepting messages, so every further server write fails.
    pub fn stop_reading(&mut self) {
        self.rx = None;
    }
}
