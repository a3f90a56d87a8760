pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod server;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use config::ServerConfig;
pub use server::Server;
