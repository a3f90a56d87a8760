//! Broadcast module
//!
//! Fans one inbound payload out to every registered connection.

pub mod broadcaster;
pub mod results;

pub use broadcaster::Broadcaster;
pub use results::DeliveryReport;
