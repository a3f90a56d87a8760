//! Broadcast Relay - Entry Point
//!
//! A TCP server that relays every chunk a client sends to all connected clients.

use log::{error, info};
use std::process;

use broadcast_relay::utils::logging::setup_logging;
use broadcast_relay::{Server, ServerConfig};

#[tokio::main]
async fn main() {
    setup_logging();

    info!("Launching broadcast relay...");

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Server startup failed: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!("Server stopped: {}", e);
        process::exit(1);
    }
}
