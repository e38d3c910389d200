//! Packet-path tuple builder.
//!
//! Parses a raw buffer from its Ethernet header down to the transport
//! header, filling a tuple and tracking a running byte offset so the caller
//! can locate the payload. Anything other than IPv4/IPv6 over TCP/UDP
//! yields no tuple. IPv4 options are unsupported: the parse assumes the
//! fixed 20-byte header.

use nettrace_common::{SkbInfo, TUPLE_TYPE_TCP, TUPLE_TYPE_UDP, TUPLE_V4};

use crate::ipv6::normalize_family;

const ETH_HLEN: usize = 14;
const ETH_P_IP: u16 = 0x0800;
const ETH_P_IPV6: u16 = 0x86DD;

const IPV4_HLEN: usize = 20;
const IPV6_HLEN: usize = 40;
const UDP_HLEN: usize = 8;

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

// Field positions within the IPv4 header.
const IPV4_PROTO_OFF: usize = 9;
const IPV4_SADDR_OFF: usize = 12;
const IPV4_DADDR_OFF: usize = 16;

// Field positions within the IPv6 header.
const IPV6_NEXTHDR_OFF: usize = 6;
const IPV6_SADDR_OFF: usize = 8;
const IPV6_DADDR_OFF: usize = 24;

// Field positions within the TCP header.
const TCP_DOFF_OFF: usize = 12;
const TCP_FLAGS_OFF: usize = 13;

/// Read-only view over a raw packet buffer with the bounded accessors the
/// parser needs. All multi-byte loads convert from network byte order.
#[derive(Debug, Clone, Copy)]
pub struct PacketBuf<'a> {
    data: &'a [u8],
}

impl<'a> PacketBuf<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn load_byte(&self, off: usize) -> Option<u8> {
        self.data.get(off).copied()
    }

    fn load_half(&self, off: usize) -> Option<u16> {
        let bytes = self.data.get(off..off + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Raw bytes of an address field, kept in the same representation a
    /// direct memory read of the socket field would produce.
    fn load_addr4(&self, off: usize) -> Option<u64> {
        let bytes = self.data.get(off..off + 4)?;
        Some(u64::from(u32::from_ne_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ])))
    }

    fn load_addr6(&self, off: usize) -> Option<(u64, u64)> {
        let bytes = self.data.get(off..off + 16)?;
        let mut h = [0u8; 8];
        let mut l = [0u8; 8];
        h.copy_from_slice(&bytes[..8]);
        l.copy_from_slice(&bytes[8..]);
        Some((u64::from_ne_bytes(h), u64::from_ne_bytes(l)))
    }
}

/// Parse Ethernet + IP + transport headers into a tuple and payload offset.
/// Returns `None` for unsupported protocol selectors or truncated buffers.
pub fn read_conn_tuple_skb(buf: &PacketBuf<'_>) -> Option<SkbInfo> {
    let mut info = SkbInfo::default();
    let mut off = ETH_HLEN;

    let l4_proto = match buf.load_half(12)? {
        ETH_P_IP => {
            let proto = buf.load_byte(off + IPV4_PROTO_OFF)?;
            info.tup.metadata |= TUPLE_V4;
            info.tup.saddr_l = buf.load_addr4(off + IPV4_SADDR_OFF)?;
            info.tup.daddr_l = buf.load_addr4(off + IPV4_DADDR_OFF)?;
            off += IPV4_HLEN;
            proto
        }
        ETH_P_IPV6 => {
            let proto = buf.load_byte(off + IPV6_NEXTHDR_OFF)?;
            let (sh, sl) = buf.load_addr6(off + IPV6_SADDR_OFF)?;
            let (dh, dl) = buf.load_addr6(off + IPV6_DADDR_OFF)?;
            info.tup.saddr_h = sh;
            info.tup.saddr_l = sl;
            info.tup.daddr_h = dh;
            info.tup.daddr_l = dl;
            // Same downgrade as the socket path, so a flow parsed from the
            // wire resolves to the same family as one read from its socket.
            normalize_family(&mut info.tup);
            off += IPV6_HLEN;
            proto
        }
        _ => return None,
    };

    match l4_proto {
        IPPROTO_UDP => {
            info.tup.metadata |= TUPLE_TYPE_UDP;
            info.tup.sport = buf.load_half(off)?;
            info.tup.dport = buf.load_half(off + 2)?;
            off += UDP_HLEN;
        }
        IPPROTO_TCP => {
            info.tup.metadata |= TUPLE_TYPE_TCP;
            info.tup.sport = buf.load_half(off)?;
            info.tup.dport = buf.load_half(off + 2)?;
            info.tcp_flags = buf.load_byte(off + TCP_FLAGS_OFF)?;
            // True header length comes from the data-offset nibble, in
            // 32-bit words.
            let doff = (buf.load_byte(off + TCP_DOFF_OFF)? >> 4) as usize;
            off += doff * 4;
        }
        _ => return None,
    }

    info.data_off = off as u32;
    Some(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{eth_ipv4_packet, v4_addr};

    #[test]
    fn parses_ipv4_tcp_with_options() {
        // 32-byte TCP header: data offset nibble = 8.
        let pkt = eth_ipv4_packet(
            IPPROTO_TCP,
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            443,
            55000,
            8,
            0x18,
        );
        let info = read_conn_tuple_skb(&PacketBuf::new(&pkt)).unwrap();
        assert!(info.tup.is_tcp());
        assert!(info.tup.is_v4());
        assert_eq!(info.tup.saddr_l, v4_addr([10, 0, 0, 1]));
        assert_eq!(info.tup.daddr_l, v4_addr([10, 0, 0, 2]));
        assert_eq!(info.tup.sport, 443);
        assert_eq!(info.tup.dport, 55000);
        assert_eq!(info.tcp_flags, 0x18);
        assert_eq!(info.data_off, (14 + 20 + 32) as u32);
    }

    #[test]
    fn parses_ipv4_udp() {
        let pkt = eth_ipv4_packet(IPPROTO_UDP, [1, 2, 3, 4], [5, 6, 7, 8], 53, 3000, 0, 0);
        let info = read_conn_tuple_skb(&PacketBuf::new(&pkt)).unwrap();
        assert!(info.tup.is_udp());
        assert_eq!(info.tup.sport, 53);
        assert_eq!(info.data_off, (14 + 20 + 8) as u32);
    }

    #[test]
    fn rejects_unknown_l3_and_l4() {
        let mut pkt = eth_ipv4_packet(IPPROTO_TCP, [1, 1, 1, 1], [2, 2, 2, 2], 1, 2, 5, 0);
        pkt[12] = 0x08;
        pkt[13] = 0x06; // ARP
        assert!(read_conn_tuple_skb(&PacketBuf::new(&pkt)).is_none());

        let mut pkt = eth_ipv4_packet(IPPROTO_TCP, [1, 1, 1, 1], [2, 2, 2, 2], 1, 2, 5, 0);
        pkt[14 + IPV4_PROTO_OFF] = 1; // ICMP
        assert!(read_conn_tuple_skb(&PacketBuf::new(&pkt)).is_none());
    }

    #[test]
    fn truncated_buffer_yields_no_tuple() {
        let pkt = eth_ipv4_packet(IPPROTO_TCP, [1, 1, 1, 1], [2, 2, 2, 2], 1, 2, 5, 0);
        assert!(read_conn_tuple_skb(&PacketBuf::new(&pkt[..20])).is_none());
    }
}
