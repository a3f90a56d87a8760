//! Broadcast result types
//!
//! Defines result structures returned by broadcast operations.

use crate::client::ClientId;

/// Outcome of broadcasting one payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Targets that received the full payload
    pub delivered: usize,
    /// Targets left out on purpose (the sender when echo is disabled)
    pub skipped: usize,
    /// Targets whose write failed; they have been evicted
    pub failed: Vec<ClientId>,
}

impl DeliveryReport {
    /// Number of targets in the snapshot the broadcast worked from
    pub fn targets(&self) -> usize {
        self.delivered + self.skipped + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
