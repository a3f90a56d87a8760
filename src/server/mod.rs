//! Server core functionality
//!
//! This module contains the acceptor loop that binds the listening socket,
//! admits connections and spawns one listener task per client.

pub mod core;

pub use self::core::Server;
