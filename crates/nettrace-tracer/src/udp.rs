//! UDP flow hooks.
//!
//! The receive byte count only exists at the return hook while the socket
//! and message descriptor only exist at the call hook, and the pair shares
//! no call-stack context; a thread-keyed correlation record bridges them.
//! Sends on unconnected sockets carry no addresses in the socket itself,
//! so a per-call flow-descriptor fallback fills the tuple when its offsets
//! are known.

use nettrace_common::{ConnTuple, PortBinding, UdpRecvArgs, CONN_DIRECTION_UNKNOWN,
    TUPLE_TYPE_UDP, TUPLE_V4};
use tracing::debug;

use crate::abi::HookContext;
use crate::conn::{AF_INET, AF_INET6};
use crate::error::{TraceError, TraceResult};
use crate::ipv6::normalize_family;
use crate::kernel::{ntohs, Flow4, Flow6, KernelSpace, MsgHdr, Sock};
use crate::stats::SegmentCount;
use crate::telemetry::Telemetry;
use crate::tracer::Tracer;

/// MSG_PEEK flag: a peek must not be recorded as a real receive.
const MSG_PEEK: u64 = 2;

/// UDP header length subtracted from the send size so only payload bytes
/// are reported.
const UDP_HLEN: u64 = 8;

/// `msg_name` is the first field of the message descriptor.
const MSG_NAME_OFF: u64 = 0;

// Fixed sockaddr layouts (uapi, not version-dependent).
const SOCKADDR_PORT_OFF: u64 = 2;
const SOCKADDR_IN_ADDR_OFF: u64 = 4;
const SOCKADDR_IN6_ADDR_OFF: u64 = 8;

impl<K: KernelSpace> Tracer<K> {
    /// datagram-send (pre), IPv4 path. The flow descriptor is the second
    /// argument at every supported kernel version.
    pub fn udp_send_v4(&self, ctx: &HookContext) {
        let sk = Sock(ctx.arg(0));
        let fl4 = Flow4(ctx.arg(1));
        let size = ctx.arg(4).saturating_sub(UDP_HLEN);

        let mut t = ConnTuple::default();
        match self.read_conn_tuple(&mut t, sk, ctx.pid_tgid, TUPLE_TYPE_UDP) {
            Ok(()) => {}
            Err(TraceError::UnsupportedFamily) | Err(TraceError::Ipv6Disabled) => return,
            Err(_) => {
                if self.fill_from_flow4(&mut t, fl4).is_err() {
                    Telemetry::incr(&self.telemetry.udp_sends_missed);
                    return;
                }
            }
        }

        self.handle_message(&t, size, 0, CONN_DIRECTION_UNKNOWN, 0, 0, SegmentCount::None);
        Telemetry::incr(&self.telemetry.udp_sends_processed);
    }

    /// datagram-send (pre), IPv6 path. The flow-descriptor argument moved
    /// across kernel versions; the layout table resolves its position.
    pub fn udp_send_v6(&self, ctx: &HookContext) {
        let sk = Sock(ctx.arg(0));
        let size = ctx.arg(self.layout.ip6_send_size).saturating_sub(UDP_HLEN);
        let fl6 = Flow6(ctx.arg(self.layout.ip6_send_flow));

        let mut t = ConnTuple::default();
        match self.read_conn_tuple(&mut t, sk, ctx.pid_tgid, TUPLE_TYPE_UDP) {
            Ok(()) => {}
            Err(TraceError::UnsupportedFamily) | Err(TraceError::Ipv6Disabled) => return,
            Err(_) => {
                if self.fill_from_flow6(&mut t, fl6).is_err() {
                    Telemetry::incr(&self.telemetry.udp_sends_missed);
                    return;
                }
            }
        }

        self.handle_message(&t, size, 0, CONN_DIRECTION_UNKNOWN, 0, 0, SegmentCount::None);
        Telemetry::incr(&self.telemetry.udp_sends_processed);
    }

    fn fill_from_flow4(&self, t: &mut ConnTuple, fl4: Flow4) -> TraceResult<()> {
        if !self.offsets.fl4_offsets_known {
            debug!("socket fields unset and v4 flow offsets unknown");
            return Err(TraceError::OffsetUnavailable);
        }
        let fl4 = fl4.require()?;

        t.saddr_l = u64::from(self.kernel.read_u32(fl4.field(self.offsets.saddr_fl4))?);
        t.daddr_l = u64::from(self.kernel.read_u32(fl4.field(self.offsets.daddr_fl4))?);
        if t.saddr_l == 0 || t.daddr_l == 0 {
            debug!("v4 flow fallback: address not set");
            return Err(TraceError::IncompleteTuple);
        }

        t.sport = ntohs(self.kernel.read_u16(fl4.field(self.offsets.sport_fl4))?);
        t.dport = ntohs(self.kernel.read_u16(fl4.field(self.offsets.dport_fl4))?);
        if t.sport == 0 || t.dport == 0 {
            debug!("v4 flow fallback: port not set");
            return Err(TraceError::IncompleteTuple);
        }

        t.metadata |= TUPLE_V4;
        Ok(())
    }

    fn fill_from_flow6(&self, t: &mut ConnTuple, fl6: Flow6) -> TraceResult<()> {
        if !self.offsets.fl6_offsets_known {
            debug!("socket fields unset and v6 flow offsets unknown");
            return Err(TraceError::OffsetUnavailable);
        }
        let fl6 = fl6.require()?;

        let saddr = fl6.field(self.offsets.saddr_fl6);
        let daddr = fl6.field(self.offsets.daddr_fl6);
        t.saddr_h = self.kernel.read_u64(saddr)?;
        t.saddr_l = self.kernel.read_u64(saddr + 8)?;
        t.daddr_h = self.kernel.read_u64(daddr)?;
        t.daddr_l = self.kernel.read_u64(daddr + 8)?;
        if t.saddr_h == 0 && t.saddr_l == 0 {
            debug!("v6 flow fallback: source address not set");
            return Err(TraceError::IncompleteTuple);
        }
        if t.daddr_h == 0 && t.daddr_l == 0 {
            debug!("v6 flow fallback: destination address not set");
            return Err(TraceError::IncompleteTuple);
        }
        normalize_family(t);

        t.sport = ntohs(self.kernel.read_u16(fl6.field(self.offsets.sport_fl6))?);
        t.dport = ntohs(self.kernel.read_u16(fl6.field(self.offsets.dport_fl6))?);
        if t.sport == 0 || t.dport == 0 {
            debug!("v6 flow fallback: port not set");
            return Err(TraceError::IncompleteTuple);
        }

        Ok(())
    }

    /// datagram-receive (pre): record the socket and message descriptor
    /// under the calling thread. Peeks are filtered out here so they never
    /// look like real receives.
    pub fn udp_recv(&self, ctx: &HookContext) {
        let flags = ctx.arg(self.layout.udp_recvmsg_flags);
        if flags & MSG_PEEK != 0 {
            return;
        }
        let record = UdpRecvArgs {
            sk: ctx.arg(self.layout.udp_recvmsg_sock),
            msg: ctx.arg(self.layout.udp_recvmsg_msg),
        };
        self.maps.udp_recv_args.insert(ctx.pid_tgid, record);
    }

    /// datagram-receive (post): consume the correlation record (exactly
    /// once), abort on error returns, lift the destination from the message
    /// descriptor, then finish with a partial socket fill.
    pub fn udp_recv_return(&self, ctx: &HookContext) {
        // Consuming the record up front means a mismatched pair can neither
        // leak nor be replayed.
        let Some(record) = self.maps.udp_recv_args.remove(&ctx.pid_tgid) else {
            return;
        };

        let copied = ctx.ret as i64;
        if copied < 0 {
            return;
        }

        let mut t = ConnTuple::default();
        if record.msg != 0 {
            if let Ok(sa) = self.kernel.read_u64(MsgHdr(record.msg).field(MSG_NAME_OFF)) {
                self.read_msg_name(sa, &mut t);
            }
        }

        if self
            .read_conn_tuple_partial(&mut t, Sock(record.sk), ctx.pid_tgid, TUPLE_TYPE_UDP)
            .is_err()
        {
            debug!("udp receive: could not complete tuple");
            return;
        }

        self.handle_message(
            &t,
            0,
            copied as u64,
            CONN_DIRECTION_UNKNOWN,
            0,
            0,
            SegmentCount::None,
        );
    }

    /// Destination address and port from the message descriptor's embedded
    /// sockaddr. Present regardless of connection state, unlike the
    /// socket's own fields on unconnected sockets.
    fn read_msg_name(&self, sa: u64, t: &mut ConnTuple) {
        if sa == 0 {
            return;
        }
        let Ok(family) = self.kernel.read_u16(sa) else {
            return;
        };
        match family {
            AF_INET => {
                if let Ok(port) = self.kernel.read_u16(sa + SOCKADDR_PORT_OFF) {
                    t.dport = ntohs(port);
                }
                if let Ok(addr) = self.kernel.read_u32(sa + SOCKADDR_IN_ADDR_OFF) {
                    t.daddr_l = u64::from(addr);
                }
            }
            AF_INET6 => {
                if let Ok(port) = self.kernel.read_u16(sa + SOCKADDR_PORT_OFF) {
                    t.dport = ntohs(port);
                }
                let addr = sa + SOCKADDR_IN6_ADDR_OFF;
                if let (Ok(h), Ok(l)) =
                    (self.kernel.read_u64(addr), self.kernel.read_u64(addr + 8))
                {
                    t.daddr_h = h;
                    t.daddr_l = l;
                }
            }
            _ => {}
        }
    }

    /// datagram-destroyed (pre): retire the connection when the tuple is
    /// still readable, then drop the port binding. The binding key omits
    /// the namespace: it is not available on every UDP path that must
    /// delete a binding.
    pub fn udp_destroy(&self, ctx: &HookContext) {
        let sk = Sock(ctx.arg(0));
        let mut t = ConnTuple::default();
        let lport = match self.read_conn_tuple(&mut t, sk, ctx.pid_tgid, TUPLE_TYPE_UDP) {
            Ok(()) => {
                self.cleanup_conn(&t);
                t.sport
            }
            Err(_) => {
                Telemetry::incr(&self.telemetry.missed_udp_close);
                self.read_sport(sk)
            }
        };
        if lport == 0 {
            debug!("udp destroy with unreadable port");
            return;
        }
        let binding = PortBinding {
            netns: 0,
            port: lport,
            _pad: 0,
        };
        self.maps.udp_port_bindings.remove(&binding);
        debug!(lport, "udp port closed");
    }

    /// datagram-destroyed (post): batch-threshold check.
    pub fn udp_destroy_return(&self, _ctx: &HookContext) {
        self.flush_conn_close_if_full();
    }
}
