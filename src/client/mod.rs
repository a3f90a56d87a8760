//! Client management system
//!
//! Tracks connected peers, their shared write paths and the per-connection
//! read loops that feed the broadcaster.

pub mod connection;
pub mod listener;
pub mod registry;

pub use connection::{ClientConnection, ClientId};
pub use listener::{ConnectionListener, DisconnectReason, ListenerState};
pub use registry::{ClientRegistry, Registration};
