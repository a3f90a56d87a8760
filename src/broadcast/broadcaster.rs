//! Module `broadcaster`
//!
//! Delivers a payload to every connection in a registry snapshot, in
//! snapshot order. Each write is bounded by the configured write timeout.
//! A target whose write fails is deregistered and closed on the spot; its
//! listener observes the close and exits. Remaining targets still get the
//! payload.

use log::{debug, trace, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::DeliveryReport;
use crate::client::{ClientConnection, ClientId, ClientRegistry};
use crate::config::ServerConfig;
use crate::error::DeliveryError;

pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
    write_timeout: Duration,
    echo_to_sender: bool,
}

impl Broadcaster {
    pub fn new(registry: Arc<ClientRegistry>, config: &ServerConfig) -> Self {
        Self {
            registry,
            write_timeout: config.write_timeout(),
            echo_to_sender: config.echo_to_sender,
        }
    }

    /// Sends `payload`, received from `origin`, to all registered clients.
    pub async fn broadcast(&self, origin: ClientId, payload: &[u8]) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for target in self.registry.snapshot() {
            if !self.echo_to_sender && target.id() == origin {
                report.skipped += 1;
                continue;
            }

            match target.send(payload, self.write_timeout).await {
                Ok(()) => {
                    trace!("Delivered {} bytes from {} to {}", payload.len(), origin, target.id());
                    report.delivered += 1;
                }
                Err(DeliveryError::Closed) => {
                    // Closed between snapshot and write; its listener is already leaving
                    debug!("Skipped closed client {}", target.id());
                    report.failed.push(target.id());
                }
                Err(e) => {
                    warn!(
                        "Delivery to client {} ({}) failed: {}",
                        target.id(),
                        target.peer_addr(),
                        e
                    );
                    self.evict(&target).await;
                    report.failed.push(target.id());
                }
            }
        }

        report
    }

    async fn evict(&self, target: &ClientConnection) {
        self.registry.deregister(target.id());
        target.close().await;
    }
}
