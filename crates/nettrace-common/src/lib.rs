#![no_std]

//! Shared map layout types for the nettrace connection tracker.
//!
//! Every structure in this crate crosses a hook boundary or is read by the
//! user-space aggregator, so all of them are `#[repr(C)]`, `Copy`, and have a
//! fixed field order and width. Multiple independently-compiled hooks and an
//! external consumer interpret the same bytes; nothing here may change layout
//! without a coordinated bump on both sides.
//!
//! Address representation: a 128-bit address is split into high/low 64-bit
//! halves so IPv4 and IPv6 share one shape. Halves hold the native-endian
//! interpretation of the address's network-order bytes (i.e. exactly what a
//! raw memory read of the kernel field produces). Ports are host byte order.

/// Transport protocol bit: TCP.
pub const TUPLE_TYPE_TCP: u32 = 1 << 0;
/// Transport protocol bit: UDP.
pub const TUPLE_TYPE_UDP: u32 = 1 << 1;
/// Address family bit: IPv4.
pub const TUPLE_V4: u32 = 1 << 2;
/// Address family bit: IPv6.
pub const TUPLE_V6: u32 = 1 << 3;

/// Traffic direction is unknown (most mid-stream observations).
pub const CONN_DIRECTION_UNKNOWN: u8 = 0;
/// Connection was accepted by this host.
pub const CONN_DIRECTION_INCOMING: u8 = 1;
/// Connection was initiated by this host.
pub const CONN_DIRECTION_OUTGOING: u8 = 2;

/// Value stored in the port-binding maps for a listening port.
pub const PORT_LISTENING: u8 = 1;

/// Kernel TCP state number for an established connection. Only this state is
/// recorded in [`TcpStats::state_transitions`].
pub const TCP_ESTABLISHED: u8 = 1;

/// Canonical identity of a flow.
///
/// Valid only when both addresses and both ports are non-zero. Fields are
/// merged, never overwritten: a tuple assembled from several uncorrelated
/// observations converges to a complete value.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ConnTuple {
    /// Source address, high 64 bits (zero for IPv4).
    pub saddr_h: u64,
    /// Source address, low 64 bits.
    pub saddr_l: u64,
    /// Destination address, high 64 bits (zero for IPv4).
    pub daddr_h: u64,
    /// Destination address, low 64 bits.
    pub daddr_l: u64,
    /// Network namespace inode number; zero means unknown.
    pub netns: u32,
    /// Owning process id.
    pub pid: u32,
    /// Source port, host byte order.
    pub sport: u16,
    /// Destination port, host byte order.
    pub dport: u16,
    /// Family/protocol bitmask (`TUPLE_*`).
    pub metadata: u32,
}

impl ConnTuple {
    pub fn is_tcp(&self) -> bool {
        self.metadata & TUPLE_TYPE_TCP != 0
    }

    pub fn is_udp(&self) -> bool {
        self.metadata & TUPLE_TYPE_UDP != 0
    }

    pub fn is_v4(&self) -> bool {
        self.metadata & TUPLE_V4 != 0
    }

    pub fn is_v6(&self) -> bool {
        self.metadata & TUPLE_V6 != 0
    }

    /// Reverse source and destination on both the address and port axes.
    /// Applying it twice restores the original tuple bit-for-bit; used to
    /// match a perceived direction against the canonical storage direction.
    pub fn flip(&mut self) {
        core::mem::swap(&mut self.saddr_h, &mut self.daddr_h);
        core::mem::swap(&mut self.saddr_l, &mut self.daddr_l);
        core::mem::swap(&mut self.sport, &mut self.dport);
    }
}

/// Key of the listening-port maps.
///
/// UDP bindings leave `netns` at zero: the namespace is not available on all
/// UDP paths that must delete a binding, so it cannot be part of the key.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PortBinding {
    pub netns: u32,
    pub port: u16,
    pub _pad: u16,
}

/// Key of the descriptor-to-socket correlation maps.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PidFd {
    pub pid: u32,
    pub fd: u32,
}

/// Per-tuple byte/packet aggregate written by the send/receive hooks.
///
/// Merge policy: byte and incremental packet counters are additive, absolute
/// packet counts and direction are last-write. Every mutation must be valid
/// regardless of the order hooks fire in.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnStats {
    pub sent_bytes: u64,
    pub recv_bytes: u64,
    pub sent_packets: u64,
    pub recv_packets: u64,
    pub direction: u8,
    pub _pad: [u8; 7],
}

/// Per-tuple TCP aggregate.
///
/// Merge policy: `retransmits` additive, `rtt`/`rtt_var` last-write (most
/// recent smoothed estimate wins), `state_transitions` bitwise-OR.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpStats {
    pub retransmits: u32,
    /// Smoothed RTT estimate, as stored by the kernel (usec << 3).
    pub rtt: u32,
    /// RTT variance, as stored by the kernel (usec << 2).
    pub rtt_var: u32,
    /// Bitmask of observed state numbers (`1 << state`).
    pub state_transitions: u16,
    pub _pad: u16,
}

/// Closed-connection record handed to the batch consumer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnClose {
    pub tup: ConnTuple,
    pub stats: ConnStats,
    pub tcp_stats: TcpStats,
}

/// Result of one packet-path parse. Valid only for the duration of that
/// parse; never persisted.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkbInfo {
    pub tup: ConnTuple,
    /// Running byte offset into the buffer; after a successful parse it
    /// points at the transport payload.
    pub data_off: u32,
    /// TCP flag byte (zero for UDP).
    pub tcp_flags: u8,
    pub _pad: [u8; 3],
}

/// Correlation record bridging the datagram-receive call and return hooks,
/// keyed by the calling thread. Consumed (and deleted) by exactly one
/// matching return hook.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UdpRecvArgs {
    /// Raw `struct sock` pointer value.
    pub sk: u64,
    /// Raw `struct msghdr` pointer value.
    pub msg: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_is_self_inverse() {
        let orig = ConnTuple {
            saddr_h: 0x1111,
            saddr_l: 0x2222,
            daddr_h: 0x3333,
            daddr_l: 0x4444,
            netns: 7,
            pid: 42,
            sport: 1000,
            dport: 2000,
            metadata: TUPLE_TYPE_TCP | TUPLE_V6,
        };
        let mut t = orig;
        t.flip();
        assert_eq!(t.saddr_l, 0x4444);
        assert_eq!(t.dport, 1000);
        t.flip();
        assert_eq!(t, orig);
    }

    #[test]
    fn metadata_helpers() {
        let mut t = ConnTuple::default();
        t.metadata |= TUPLE_TYPE_UDP | TUPLE_V4;
        assert!(t.is_udp());
        assert!(t.is_v4());
        assert!(!t.is_tcp());
        assert!(!t.is_v6());
    }
}
