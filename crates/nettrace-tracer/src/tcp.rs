//! TCP lifecycle hooks.
//!
//! One method per instrumentation point. Each body is a bounded sequence of
//! reads and single-call map operations; failures drop the event locally.

use nettrace_common::{ConnTuple, PortBinding, TcpStats, CONN_DIRECTION_INCOMING,
    PORT_LISTENING, TCP_ESTABLISHED, TUPLE_TYPE_TCP};
use tracing::debug;

use crate::abi::HookContext;
use crate::kernel::{KernelSpace, Sock};
use crate::stats::SegmentCount;
use crate::tracer::Tracer;

impl<K: KernelSpace> Tracer<K> {
    /// connection-accepted (return hook): the accepted socket is the return
    /// value. Records RTT stats and marks the local port as listening.
    /// Insert-if-absent: a second accept on the same port must not clobber
    /// the first record.
    pub fn tcp_accept_return(&self, ctx: &HookContext) {
        let sk = Sock(ctx.ret);
        if sk.is_null() {
            return;
        }
        let mut t = ConnTuple::default();
        if self
            .read_conn_tuple(&mut t, sk, ctx.pid_tgid, TUPLE_TYPE_TCP)
            .is_err()
        {
            return;
        }
        self.handle_tcp_stats(&t, sk);
        self.handle_message(&t, 0, 0, CONN_DIRECTION_INCOMING, 0, 0, SegmentCount::None);

        let binding = PortBinding {
            netns: t.netns,
            port: t.sport,
            _pad: 0,
        };
        self.maps.port_bindings.insert_if_absent(binding, PORT_LISTENING);
        debug!(netns = t.netns, sport = t.sport, dport = t.dport, "accept");
    }

    /// listen-stopped: drop the port binding for the socket's current
    /// source port and namespace.
    pub fn tcp_listen_stop(&self, ctx: &HookContext) {
        let sk = Sock(ctx.arg(0));
        let lport = self.read_sport(sk);
        if lport == 0 {
            debug!("listen stop with unreadable port");
            return;
        }
        let binding = PortBinding {
            netns: self.netns_for_sock(sk),
            port: lport,
            _pad: 0,
        };
        self.maps.port_bindings.remove(&binding);
        debug!(netns = binding.netns, lport, "listen stopped");
    }

    /// stream-send: byte count comes from the call arguments. Segment
    /// counts are reported only where the socket exposes them; here they
    /// are not, so absolute zeros are stored.
    pub fn tcp_sendmsg(&self, ctx: &HookContext) {
        let sk = Sock(ctx.arg(self.layout.tcp_sendmsg_sock));
        let size = ctx.arg(self.layout.tcp_sendmsg_size);

        let mut t = ConnTuple::default();
        if self
            .read_conn_tuple(&mut t, sk, ctx.pid_tgid, TUPLE_TYPE_TCP)
            .is_err()
        {
            return;
        }
        self.handle_tcp_stats(&t, sk);
        self.handle_message(
            &t,
            size,
            0,
            nettrace_common::CONN_DIRECTION_UNKNOWN,
            0,
            0,
            SegmentCount::Absolute,
        );
    }

    /// stream-receive-copy: the copy-to-user point is the only receive-side
    /// site with a copied-byte count. A negative count is an error; abort
    /// without reporting.
    pub fn tcp_recv_copied(&self, ctx: &HookContext) {
        let sk = Sock(ctx.arg(0));
        let copied = ctx.arg(1) as i64;
        if copied < 0 {
            return;
        }
        let mut t = ConnTuple::default();
        if self
            .read_conn_tuple(&mut t, sk, ctx.pid_tgid, TUPLE_TYPE_TCP)
            .is_err()
        {
            return;
        }
        self.handle_message(
            &t,
            0,
            copied as u64,
            nettrace_common::CONN_DIRECTION_UNKNOWN,
            0,
            0,
            SegmentCount::None,
        );
    }

    /// segment-retransmitted: segment count from the call site when the
    /// layout provides one, else 1.
    pub fn tcp_retransmit(&self, ctx: &HookContext) {
        let sk = Sock(ctx.arg(0));
        let segs = self
            .layout
            .retransmit_segs
            .map(|idx| ctx.arg(idx) as u32)
            .unwrap_or(1);
        let _ = self.handle_retransmit(sk, segs, ctx.pid_tgid);
    }

    /// state transition: only entry into the established state is recorded,
    /// by ORing its bit into the transition mask.
    pub fn tcp_state_change(&self, ctx: &HookContext) {
        let state = ctx.arg(1) as u8;
        if state != TCP_ESTABLISHED {
            return;
        }
        let sk = Sock(ctx.arg(0));
        let mut t = ConnTuple::default();
        if self
            .read_conn_tuple(&mut t, sk, ctx.pid_tgid, TUPLE_TYPE_TCP)
            .is_err()
        {
            return;
        }
        self.update_tcp_stats(
            &t,
            TcpStats {
                state_transitions: 1 << state,
                ..Default::default()
            },
        );
    }

    /// stream-closed (pre): tear down the descriptor correlation, build the
    /// final tuple and queue the closed record.
    pub fn tcp_close(&self, ctx: &HookContext) {
        let sk = Sock(ctx.arg(0));
        self.clear_sockfd_correlation(sk);

        let mut t = ConnTuple::default();
        if self
            .read_conn_tuple(&mut t, sk, ctx.pid_tgid, TUPLE_TYPE_TCP)
            .is_err()
        {
            crate::telemetry::Telemetry::incr(&self.telemetry.missed_tcp_close);
            return;
        }
        debug!(netns = t.netns, sport = t.sport, dport = t.dport, "close");
        self.cleanup_conn(&t);
    }

    /// stream-closed (post): batch-threshold check.
    pub fn tcp_close_return(&self, _ctx: &HookContext) {
        self.flush_conn_close_if_full();
    }
}
