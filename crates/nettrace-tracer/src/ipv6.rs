//! IPv4-mapped-IPv6 detection and family downgrade.
//!
//! Addresses arrive as the native-endian interpretation of their
//! network-order bytes (see `nettrace-common`), so the position of the
//! `::ffff:` mapped prefix inside the low 64-bit half depends on host byte
//! order.

use nettrace_common::{ConnTuple, TUPLE_V4, TUPLE_V6};

/// True when the (high, low) halves encode an IPv4-mapped IPv6 address
/// (`::ffff:a.b.c.d`, RFC 4291 §2.5.5).
#[cfg(target_endian = "little")]
pub fn is_ipv4_mapped(addr_h: u64, addr_l: u64) -> bool {
    addr_h == 0 && (addr_l as u32) == 0xFFFF_0000
}

#[cfg(target_endian = "big")]
pub fn is_ipv4_mapped(addr_h: u64, addr_l: u64) -> bool {
    addr_h == 0 && ((addr_l >> 32) as u32) == 0x0000_FFFF
}

/// The embedded 32-bit IPv4 address of a mapped low half, in the same
/// raw-bytes representation used for genuine IPv4 reads.
#[cfg(target_endian = "little")]
pub fn embedded_v4(addr_l: u64) -> u64 {
    addr_l >> 32
}

#[cfg(target_endian = "big")]
pub fn embedded_v4(addr_l: u64) -> u64 {
    addr_l & 0xFFFF_FFFF
}

/// Classify a tuple whose addresses were read as IPv6: if either side is an
/// IPv4-mapped address, rewrite the tuple in place as IPv4 (family bit
/// switched, high halves cleared, low halves reduced to the embedded
/// address); otherwise mark it IPv6. Both the socket-path and packet-path
/// builders call this so the same flow always resolves to the same family.
pub fn normalize_family(t: &mut ConnTuple) {
    if is_ipv4_mapped(t.saddr_h, t.saddr_l) || is_ipv4_mapped(t.daddr_h, t.daddr_l) {
        t.metadata &= !TUPLE_V6;
        t.metadata |= TUPLE_V4;
        t.saddr_h = 0;
        t.daddr_h = 0;
        t.saddr_l = embedded_v4(t.saddr_l);
        t.daddr_l = embedded_v4(t.daddr_l);
    } else {
        t.metadata |= TUPLE_V6;
    }
}
