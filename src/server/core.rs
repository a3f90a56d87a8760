use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::broadcast::Broadcaster;
use crate::client::{ClientConnection, ClientRegistry, ConnectionListener, Registration};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::utils::network::{AcceptErrorKind, bind_listener, classify_accept_error};

/// Pause after the process runs out of descriptors or memory
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Server {
    listener: TcpListener,
    registry: Arc<ClientRegistry>,
    broadcaster: Arc<Broadcaster>,
    config: Arc<ServerConfig>,
    admission: Option<Arc<Semaphore>>,
}

impl Server {
    /// Validates the configuration and binds the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = bind_listener(&config).await?;
        let registry = Arc::new(ClientRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry), &config));
        let admission = config
            .admission_limit()
            .map(|limit| Arc::new(Semaphore::new(limit)));

        info!(
            "Server bound to {} (backlog {})",
            listener.local_addr()?,
            config.backlog
        );

        Ok(Self {
            listener,
            registry,
            broadcaster,
            config: Arc::new(config),
            admission,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accepts connections until the listening socket fails.
    ///
    /// Only a fatal listener error ends the loop; per-connection failures
    /// never reach it.
    pub async fn run(&self) -> Result<(), ServerError> {
        match self.config.admission_limit() {
            Some(limit) => info!("Server is listening (max {limit} clients)"),
            None => info!("Server is listening"),
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => self.admit(stream, addr),
                Err(e) => match classify_accept_error(&e) {
                    AcceptErrorKind::Transient => {
                        warn!("Error accepting connection: {}", e);
                    }
                    AcceptErrorKind::ResourceExhausted => {
                        warn!(
                            "Error accepting connection: {} (retrying in {:?})",
                            e, ACCEPT_BACKOFF
                        );
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    AcceptErrorKind::Fatal => {
                        error!("Listening socket failed: {}", e);
                        return Err(ServerError::Accept(e));
                    }
                },
            }
        }
    }

    /// Registers a freshly accepted connection and spawns its listener.
    fn admit(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let Some(permit) = self.try_admit(peer_addr) else {
            // Dropping the stream closes it before it is ever registered
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }

        let (reader, writer) = stream.into_split();
        let connection = ClientConnection::new(self.registry.next_client_id(), peer_addr, writer);
        let registration = Registration::new(Arc::clone(&self.registry), connection);

        info!(
            "Client {} connected from {} ({} clients)",
            registration.id(),
            peer_addr,
            self.registry.len()
        );

        let listener = ConnectionListener::new(
            registration,
            reader,
            Arc::clone(&self.broadcaster),
            &self.config,
        );

        // Spawn a task per client so the accept loop never waits on a peer
        tokio::spawn(async move {
            let _permit = permit;
            listener.run().await;
        });
    }

    /// Takes an admission slot; `None` means the connection is refused.
    fn try_admit(&self, peer_addr: SocketAddr) -> Option<Option<OwnedSemaphorePermit>> {
        let Some(admission) = &self.admission else {
            return Some(None);
        };

        match Arc::clone(admission).try_acquire_owned() {
            Ok(permit) => Some(Some(permit)),
            Err(_) => {
                warn!(
                    "Rejected {}: too many connections ({} max)",
                    peer_addr, self.config.max_clients
                );
                None
            }
        }
    }
}
