//! Module `connection`
//!
//! Defines `ClientConnection`, the shareable handle to one connected peer.
//! The read half of the socket belongs to the peer's listener task; the
//! write half lives here behind a per-connection lock so broadcasts coming
//! from any task are written atomically.

use log::debug;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;

use crate::error::DeliveryError;

/// Identifier assigned to a client when it is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to one connected peer.
///
/// Cloning is cheap; all clones refer to the same socket write half.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    id: ClientId,
    peer_addr: SocketAddr,
    writer: Mutex<Option<OwnedWriteHalf>>, // None once the write half is shut down
    closed: AtomicBool,
    close_notify: Notify,
}

impl ClientConnection {
    pub fn new(id: ClientId, peer_addr: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                peer_addr,
                writer: Mutex::new(Some(writer)),
                closed: AtomicBool::new(false),
                close_notify: Notify::new(),
            }),
        }
    }

    // --- Accessors ---

    pub fn id(&self) -> ClientId {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Returns whether the connection has been closed for writing.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // --- I/O ---

    /// Writes the whole payload to the peer as one unit.
    ///
    /// Waiting for the write lock counts against `limit`, so a peer that
    /// stopped reading costs each broadcaster at most `limit`.
    pub async fn send(&self, payload: &[u8], limit: Duration) -> Result<(), DeliveryError> {
        let write = async {
            let mut guard = self.inner.writer.lock().await;
            if self.is_closed() {
                return Err(DeliveryError::Closed);
            }
            let writer = guard.as_mut().ok_or(DeliveryError::Closed)?;
            writer.write_all(payload).await?;
            Ok::<(), DeliveryError>(())
        };

        match timeout(limit, write).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::TimedOut(limit)),
        }
    }

    /// Marks the connection closed and wakes its listener.
    ///
    /// Writes that acquire the lock afterwards fail with `DeliveryError::Closed`.
    pub fn mark_closed(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.close_notify.notify_one();
        }
    }

    /// Closes the connection for writing and shuts down the write half.
    ///
    /// Safe to call more than once and from any task.
    pub async fn close(&self) {
        self.mark_closed();

        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown of client {} ({}) failed: {}", self.id(), self.peer_addr(), e);
            }
        }
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        // notify_one stores a permit, so a close racing this call is not lost
        self.inner.close_notify.notified().await;
    }
}
