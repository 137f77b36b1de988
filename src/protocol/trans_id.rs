//! Transaction identifiers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Correlation pair of client- and server-chosen transaction identifiers.
///
/// Every response carries exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionId {
    /// Identifier chosen by the client (optional on the wire)
    pub client: Option<String>,
    /// Identifier generated by the server
    pub server: String,
}

impl TransactionId {
    /// Create from both halves.
    pub fn new(client: Option<String>, server: impl Into<String>) -> Self {
        Self {
            client,
            server: server.into(),
        }
    }
}

/// Generates unique identifiers with a fixed prefix.
///
/// Used by the server for `svTRID` values and by clients for `clTRID` values.
/// Identifiers are `<prefix>-<start-epoch-secs>-<sequence>`; the epoch keeps
/// them distinct across process restarts.
#[derive(Debug)]
pub struct TransIdGenerator {
    prefix: String,
    epoch: i64,
    counter: AtomicU64,
}

impl TransIdGenerator {
    /// Create a generator with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            epoch: chrono::Utc::now().timestamp(),
            counter: AtomicU64::new(1),
        }
    }

    /// Next identifier.
    pub fn next_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", self.prefix, self.epoch, seq)
    }
}
