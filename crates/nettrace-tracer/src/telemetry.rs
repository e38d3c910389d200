//! Operational counters for drop/miss conditions.
//!
//! Monotonic, mutated with relaxed atomics from any hook. Consumed by an
//! external telemetry sink through [`Telemetry::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Telemetry {
    /// Datagram sends successfully attributed to a tuple.
    pub udp_sends_processed: AtomicU64,
    /// Datagram sends dropped because neither the socket nor the flow
    /// descriptor yielded a complete tuple.
    pub udp_sends_missed: AtomicU64,
    /// Stream closes whose final tuple could not be read.
    pub missed_tcp_close: AtomicU64,
    /// Datagram socket destructions whose final tuple could not be read.
    pub missed_udp_close: AtomicU64,
    /// Closed-connection records dropped because the batch buffer was full
    /// before being drained.
    pub closed_conn_dropped: AtomicU64,
    /// Entries pushed out of the per-tuple statistics store by LRU
    /// eviction.
    pub conn_stats_evicted: AtomicU64,
}

impl Telemetry {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            udp_sends_processed: self.udp_sends_processed.load(Ordering::Relaxed),
            udp_sends_missed: self.udp_sends_missed.load(Ordering::Relaxed),
            missed_tcp_close: self.missed_tcp_close.load(Ordering::Relaxed),
            missed_udp_close: self.missed_udp_close.load(Ordering::Relaxed),
            closed_conn_dropped: self.closed_conn_dropped.load(Ordering::Relaxed),
            conn_stats_evicted: self.conn_stats_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub udp_sends_processed: u64,
    pub udp_sends_missed: u64,
    pub missed_tcp_close: u64,
    pub missed_udp_close: u64,
    pub closed_conn_dropped: u64,
    pub conn_stats_evicted: u64,
}
