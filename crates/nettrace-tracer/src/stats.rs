//! Per-tuple statistics aggregation.
//!
//! Hooks for the same tuple may run concurrently on different cores in any
//! order, so every mutation here is a single in-place merge that is valid
//! regardless of arrival order: counters add, continuous estimates take the
//! last write, transition flags OR.

use nettrace_common::{ConnClose, ConnStats, ConnTuple, TcpStats, CONN_DIRECTION_UNKNOWN};
use tracing::debug;

use crate::error::TraceResult;
use crate::kernel::{KernelSpace, Sock};
use crate::telemetry::Telemetry;
use crate::tracer::Tracer;

/// How a hook's packet counts relate to the stored aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentCount {
    /// Call site has no segment information.
    None,
    /// Counts are running totals read from the socket; overwrite.
    Absolute,
    /// Counts are deltas for this invocation; add.
    Increment,
}

impl<K: KernelSpace> Tracer<K> {
    /// Merge one send/receive observation into the per-tuple aggregate.
    pub(crate) fn handle_message(
        &self,
        tup: &ConnTuple,
        sent: u64,
        recv: u64,
        direction: u8,
        packets_out: u64,
        packets_in: u64,
        count: SegmentCount,
    ) {
        let evicted = self.maps.conn_stats.merge(*tup, ConnStats::default(), |s| {
            s.sent_bytes = s.sent_bytes.wrapping_add(sent);
            s.recv_bytes = s.recv_bytes.wrapping_add(recv);
            if direction != CONN_DIRECTION_UNKNOWN {
                s.direction = direction;
            }
            match count {
                SegmentCount::None => {}
                SegmentCount::Absolute => {
                    s.sent_packets = packets_out;
                    s.recv_packets = packets_in;
                }
                SegmentCount::Increment => {
                    s.sent_packets = s.sent_packets.wrapping_add(packets_out);
                    s.recv_packets = s.recv_packets.wrapping_add(packets_in);
                }
            }
        });
        if evicted {
            Telemetry::incr(&self.telemetry.conn_stats_evicted);
        }
    }

    /// Merge a TCP stats delta: retransmits add, RTT fields take the last
    /// non-zero write, transitions OR.
    pub(crate) fn update_tcp_stats(&self, tup: &ConnTuple, delta: TcpStats) {
        self.maps.tcp_stats.merge(*tup, TcpStats::default(), |s| {
            s.retransmits = s.retransmits.wrapping_add(delta.retransmits);
            if delta.rtt != 0 {
                s.rtt = delta.rtt;
                s.rtt_var = delta.rtt_var;
            }
            s.state_transitions |= delta.state_transitions;
        });
    }

    /// Read the socket's smoothed-RTT and variance fields and record them.
    /// Cheap and always available; no separate RTT probe is needed.
    pub(crate) fn handle_tcp_stats(&self, tup: &ConnTuple, sk: Sock) {
        let rtt = self.kernel.read_u32(sk.field(self.offsets.rtt)).unwrap_or(0);
        let rtt_var = self
            .kernel
            .read_u32(sk.field(self.offsets.rtt_var))
            .unwrap_or(0);
        self.update_tcp_stats(
            tup,
            TcpStats {
                retransmits: 0,
                rtt,
                rtt_var,
                state_transitions: 0,
                _pad: 0,
            },
        );
    }

    /// Record a retransmit event against the socket's tuple.
    pub(crate) fn handle_retransmit(
        &self,
        sk: Sock,
        segs: u32,
        pid_tgid: u64,
    ) -> TraceResult<()> {
        let mut tup = ConnTuple::default();
        self.read_conn_tuple(&mut tup, sk, pid_tgid, nettrace_common::TUPLE_TYPE_TCP)?;
        self.update_tcp_stats(
            &tup,
            TcpStats {
                retransmits: segs,
                ..Default::default()
            },
        );
        Ok(())
    }

    /// Retire a connection: remove its aggregates from the live maps and
    /// queue the closed record for batching. Loss on a full buffer is
    /// counted, not retried.
    pub(crate) fn cleanup_conn(&self, tup: &ConnTuple) {
        let stats = self.maps.conn_stats.remove(tup).unwrap_or_default();
        let tcp_stats = self.maps.tcp_stats.remove(tup).unwrap_or_default();
        let record = ConnClose {
            tup: *tup,
            stats,
            tcp_stats,
        };
        if !self.flusher.enqueue(record) {
            debug!(
                sport = tup.sport,
                dport = tup.dport,
                "closed-connection buffer full, record dropped"
            );
            Telemetry::incr(&self.telemetry.closed_conn_dropped);
        }
    }

    /// Batch-threshold check run from every close-adjacent return hook.
    pub(crate) fn flush_conn_close_if_full(&self) {
        self.flusher.flush_if_full(self.sink.as_ref());
    }
}
