//! Client registry
//!
//! The authoritative set of live connections. Every mutation and every
//! enumeration goes through one lock, so a broadcast snapshot never sees a
//! half-applied register or deregister.

use log::debug;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::client::{ClientConnection, ClientId};

/// Registry for tracking active clients
#[derive(Debug)]
pub struct ClientRegistry {
    clients: Mutex<BTreeMap<ClientId, ClientConnection>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh identifier. Identifiers are never reused.
    pub fn next_client_id(&self) -> ClientId {
        ClientId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Adds a connection and returns its identifier.
    pub fn register(&self, connection: ClientConnection) -> ClientId {
        let id = connection.id();
        self.lock().insert(id, connection);
        id
    }

    /// Removes the entry for `id` if present.
    ///
    /// Removing an id that is already gone is a no-op.
    pub fn deregister(&self, id: ClientId) -> Option<ClientConnection> {
        let removed = self.lock().remove(&id);
        if removed.is_none() {
            debug!("Client {id} already deregistered");
        }
        removed
    }

    /// Point-in-time view of all live connections, ordered by identifier.
    pub fn snapshot(&self) -> Vec<ClientConnection> {
        self.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // The map is only touched by single insert/remove/clone calls, so a
    // panic elsewhere cannot leave it inconsistent.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<ClientId, ClientConnection>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped registry membership for one connection.
///
/// Registers on creation; on drop, deregisters and marks the connection
/// closed. Dropping happens on every exit path of the owning task,
/// including unwinding.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ClientRegistry>,
    connection: ClientConnection,
}

impl Registration {
    pub fn new(registry: Arc<ClientRegistry>, connection: ClientConnection) -> Self {
        registry.register(connection.clone());
        Self {
            registry,
            connection,
        }
    }

    pub fn id(&self) -> ClientId {
        self.connection.id()
    }

    pub fn connection(&self) -> &ClientConnection {
        &self.connection
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.connection.id());
        self.connection.mark_closed();
    }
}
