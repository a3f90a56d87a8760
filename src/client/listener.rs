//! Module `listener`
//!
//! Per-connection read loop. Every chunk read from the peer is handed to the
//! broadcaster; end-of-stream, a read error, an idle timeout or eviction by
//! the broadcaster ends the loop, after which the connection is deregistered
//! and its socket shut down.

use log::{debug, info, trace, warn};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::time::timeout;

use crate::broadcast::Broadcaster;
use crate::client::{ClientId, Registration};
use crate::config::ServerConfig;

/// Lifecycle of a connection listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Connected,
    Disconnecting,
    Closed,
}

/// Why a listener left its read loop.
#[derive(Debug)]
pub enum DisconnectReason {
    /// The peer closed its side cleanly
    PeerClosed,
    /// A read failed (reset, aborted, ...)
    ReadFailed(io::Error),
    /// No bytes arrived within the configured idle timeout
    IdleTimeout,
    /// The broadcaster closed the connection after a failed delivery
    Evicted,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::PeerClosed => write!(f, "peer closed the connection"),
            DisconnectReason::ReadFailed(e) => write!(f, "read failed: {}", e),
            DisconnectReason::IdleTimeout => write!(f, "idle timeout"),
            DisconnectReason::Evicted => write!(f, "evicted after failed delivery"),
        }
    }
}

/// Drives one registered connection from CONNECTED to CLOSED.
pub struct ConnectionListener {
    registration: Registration,
    reader: OwnedReadHalf,
    broadcaster: Arc<Broadcaster>,
    read_chunk_size: usize,
    idle_timeout: Option<Duration>,
    state: ListenerState,
}

impl ConnectionListener {
    /// Creates a listener for an already registered connection.
    pub fn new(
        registration: Registration,
        reader: OwnedReadHalf,
        broadcaster: Arc<Broadcaster>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            registration,
            reader,
            broadcaster,
            read_chunk_size: config.read_chunk_size,
            idle_timeout: config.idle_timeout(),
            state: ListenerState::Connected,
        }
    }

    pub fn id(&self) -> ClientId {
        self.registration.id()
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Runs the read loop to completion and releases the connection.
    pub async fn run(mut self) -> DisconnectReason {
        let reason = self.read_loop().await;
        self.transition(ListenerState::Disconnecting);

        let id = self.id();
        let connection = self.registration.connection().clone();
        let registry = Arc::clone(self.registration.registry());
        let Self {
            registration,
            reader,
            ..
        } = self;

        // Deregister before shutdown so no new snapshot can pick this peer
        drop(registration);
        drop(reader);
        connection.close().await;

        match &reason {
            DisconnectReason::ReadFailed(_) => warn!(
                "Client {} ({}) disconnected: {} ({} clients)",
                id,
                connection.peer_addr(),
                reason,
                registry.len()
            ),
            _ => info!(
                "Client {} ({}) disconnected: {} ({} clients)",
                id,
                connection.peer_addr(),
                reason,
                registry.len()
            ),
        }
        debug!("Client {id} {:?} -> {:?}", ListenerState::Disconnecting, ListenerState::Closed);

        reason
    }

    async fn read_loop(&mut self) -> DisconnectReason {
        let id = self.registration.id();
        let mut buffer = vec![0u8; self.read_chunk_size];

        loop {
            let connection = self.registration.connection();
            let read = tokio::select! {
                biased;
                _ = connection.closed() => return DisconnectReason::Evicted,
                read = read_chunk(&mut self.reader, &mut buffer, self.idle_timeout) => read,
            };

            match read {
                Ok(Some(0)) => return DisconnectReason::PeerClosed,
                Ok(Some(n)) => {
                    trace!("Client {id} sent {n} bytes");
                    let report = self.broadcaster.broadcast(id, &buffer[..n]).await;
                    trace!("Client {id} payload relayed: {report:?}");
                }
                Ok(None) => return DisconnectReason::IdleTimeout,
                Err(e) => return DisconnectReason::ReadFailed(e),
            }
        }
    }

    fn transition(&mut self, next: ListenerState) {
        debug!("Client {} {:?} -> {:?}", self.id(), self.state, next);
        self.state = next;
    }
}

/// Reads one chunk; `Ok(None)` means the idle timeout elapsed first.
async fn read_chunk(
    reader: &mut OwnedReadHalf,
    buffer: &mut [u8],
    idle_timeout: Option<Duration>,
) -> io::Result<Option<usize>> {
    match idle_timeout {
        Some(limit) => match timeout(limit, reader.read(buffer)).await {
            Ok(read) => read.map(Some),
            Err(_) => Ok(None),
        },
        None => reader.read(buffer).await.map(Some),
    }
}
