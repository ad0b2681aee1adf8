//! Per-connection message counters
//!
//! Touched from the reader, workers and timer threads, so everything is
//! atomic. A snapshot type carries the values out for reporting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for a single connection
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Messages delivered by the transport
    pub read_messages: AtomicU64,
    /// Messages written through the encoder
    pub written_messages: AtomicU64,
    /// Messages dropped before reaching the wire or the worker pool
    pub dropped_messages: AtomicU64,
}

impl ConnectionStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the counters out
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            read_messages: self.read_messages.load(Ordering::Relaxed),
            written_messages: self.written_messages.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a connection's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages delivered by the transport
    pub read_messages: u64,
    /// Messages written through the encoder
    pub written_messages: u64,
    /// Messages dropped before reaching the wire or the worker pool
    pub dropped_messages: u64,
}
