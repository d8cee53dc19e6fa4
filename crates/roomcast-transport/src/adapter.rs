//! Connection adapter.
//!
//! Binds one socket to one hub connection and drives it with two loops:
//!
//! - the receive loop forwards every incoming message to the hub, tagged with
//!   the connection's ID
//! - the send loop writes the outbound queue to the socket in order
//!
//! Whichever loop ends first starts teardown. The other loop notices through
//! the connection lifecycle (receive side) or the closed queue (send side).
//! Teardown reaches the hub on the same channel as the frames, so frames read
//! before the socket closed are still broadcast.

use roomcast_core::{
    connection, AdmittedIdentity, ConnectionId, ConnectionSession, HubError, HubHandle,
    InboundFrame, Lifecycle, OutboundQueue,
};
use tracing::{debug, trace};

use crate::traits::{SocketReader, SocketWriter};

/// Message counts for one finished connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterSummary {
    /// Messages read from the socket and forwarded to the hub.
    pub frames_in: u64,
    /// Messages written to the socket.
    pub frames_out: u64,
}

/// Drives one socket for the lifetime of its connection.
pub struct ConnectionAdapter<R, W> {
    session: ConnectionSession,
    reader: R,
    writer: W,
    hub: HubHandle,
}

impl<R, W> ConnectionAdapter<R, W>
where
    R: SocketReader + 'static,
    W: SocketWriter + 'static,
{
    /// Open a connection for an admitted identity and register it with the hub.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub fn attach(
        identity: AdmittedIdentity,
        reader: R,
        writer: W,
        hub: HubHandle,
    ) -> Result<Self, HubError> {
        let (handle, session) = connection::open(identity);
        hub.register(handle)?;
        Ok(Self::new(session, reader, writer, hub))
    }

    /// Wrap a session whose handle is already registered.
    #[must_use]
    pub fn new(session: ConnectionSession, reader: R, writer: W, hub: HubHandle) -> Self {
        Self {
            session,
            reader,
            writer,
            hub,
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.session.id
    }

    /// Get the shared lifecycle.
    #[must_use]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.session.lifecycle
    }

    /// Run both loops until the connection is torn down.
    pub async fn run(self) -> AdapterSummary {
        let ConnectionAdapter {
            session,
            reader,
            writer,
            hub,
        } = self;
        let ConnectionSession {
            id,
            identity,
            lifecycle,
            queue,
        } = session;

        debug!(connection = %id, user = %identity.user_id, "Connection adapter started");

        let sender = tokio::spawn(send_loop(
            id,
            queue,
            writer,
            lifecycle.clone(),
            hub.clone(),
        ));
        let frames_in = receive_loop(id, reader, &lifecycle, &hub).await;

        let frames_out = match sender.await {
            Ok(sent) => sent,
            Err(e) => {
                debug!(connection = %id, error = %e, "Send loop aborted");
                0
            }
        };

        debug!(
            connection = %id,
            frames_in,
            frames_out,
            state = %lifecycle.state(),
            "Connection adapter finished"
        );

        AdapterSummary {
            frames_in,
            frames_out,
        }
    }
}

async fn receive_loop<R: SocketReader>(
    id: ConnectionId,
    mut reader: R,
    lifecycle: &Lifecycle,
    hub: &HubHandle,
) -> u64 {
    let mut received = 0;

    loop {
        tokio::select! {
            _ = lifecycle.terminating() => {
                trace!(connection = %id, "Receive loop saw teardown");
                break;
            }
            result = reader.recv() => match result {
                Ok(Some(data)) => {
                    received += 1;
                    if hub.forward(InboundFrame::new(id, data)).await.is_err() {
                        debug!(connection = %id, "Hub stopped, closing connection");
                        break;
                    }
                }
                Ok(None) => {
                    debug!(connection = %id, "Peer closed connection");
                    break;
                }
                Err(e) => {
                    debug!(connection = %id, error = %e, "Receive failed");
                    break;
                }
            },
        }
    }

    teardown(id, lifecycle, hub).await;
    received
}

async fn send_loop<W: SocketWriter>(
    id: ConnectionId,
    mut queue: OutboundQueue,
    mut writer: W,
    lifecycle: Lifecycle,
    hub: HubHandle,
) -> u64 {
    let mut sent = 0;

    while let Some(data) = queue.next().await {
        if let Err(e) = writer.send(data).await {
            debug!(connection = %id, error = %e, "Send failed");
            break;
        }
        sent += 1;
    }

    if let Err(e) = writer.close().await {
        trace!(connection = %id, error = %e, "Close failed");
    }

    teardown(id, &lifecycle, &hub).await;
    sent
}

async fn teardown(id: ConnectionId, lifecycle: &Lifecycle, hub: &HubHandle) {
    if lifecycle.begin_close() {
        trace!(connection = %id, "Teardown started by adapter");
    }
    hub.disconnect(id).await;
}
