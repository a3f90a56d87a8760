//! Error types
//!
//! Server-level errors end the process; delivery errors stay local to one
//! target connection.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors that stop the server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Bind address {0} did not resolve to any socket address")]
    Resolve(String),

    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Listening socket failed: {0}")]
    Accept(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failure to deliver one payload to one target
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Connection already closed")]
    Closed,

    #[error("Write timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Write failed: {0}")]
    Io(#[from] io::Error),
}
