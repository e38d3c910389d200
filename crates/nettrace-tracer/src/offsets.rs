//! Resolved structure offsets.
//!
//! Field positions inside kernel objects vary by kernel build, so they are
//! resolved once by an external provisioning step (build-time or load-time
//! introspection) before any hook runs, and treated as constants afterwards.
//! When an offset cannot be determined the matching capability flag stays
//! unset and the dependent code path is skipped instead of reading garbage.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Immutable table of resolved offsets and capability flags. Populated once
/// before attach; never mutated afterwards.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OffsetConfig {
    /// Address family field inside `struct sock`.
    pub family: u64,
    /// IPv4 source address.
    pub saddr: u64,
    /// IPv4 destination address.
    pub daddr: u64,
    /// Source port, network byte order (pre-connection field).
    pub sport: u64,
    /// Destination port, network byte order. The host-order bound-port
    /// field sits immediately after it; the source-port fallback chain
    /// relies on that adjacency.
    pub dport: u64,
    /// IPv6 destination address. The IPv6 source address is adjacent,
    /// two 64-bit words further in.
    pub daddr_ipv6: u64,
    /// Namespace pointer inside `struct sock`.
    pub netns: u64,
    /// Inode number inside the namespace object.
    pub ino: u64,
    /// Smoothed RTT field inside the TCP socket.
    pub rtt: u64,
    /// RTT variance field inside the TCP socket.
    pub rtt_var: u64,
    /// Underlying `struct sock` pointer inside `struct socket`.
    pub socket_sk: u64,

    /// IPv4 flow-descriptor fallback fields (unconnected UDP sends).
    pub saddr_fl4: u64,
    pub daddr_fl4: u64,
    pub sport_fl4: u64,
    pub dport_fl4: u64,

    /// IPv6 flow-descriptor fallback fields.
    pub saddr_fl6: u64,
    pub daddr_fl6: u64,
    pub sport_fl6: u64,
    pub dport_fl6: u64,

    /// IPv6 tracking enabled at all.
    pub ipv6_enabled: bool,
    /// The `*_fl4` offsets above were successfully resolved.
    pub fl4_offsets_known: bool,
    /// The `*_fl6` offsets above were successfully resolved.
    pub fl6_offsets_known: bool,
}

impl OffsetConfig {
    /// Build the table from the symbolic-name form produced by the offset
    /// provisioning component. Unknown names are ignored; missing names
    /// leave the field at zero (flags at disabled).
    pub fn from_table(table: &BTreeMap<String, u64>) -> Self {
        let mut cfg = Self::default();
        for (name, &val) in table {
            match name.as_str() {
                "offset_family" => cfg.family = val,
                "offset_saddr" => cfg.saddr = val,
                "offset_daddr" => cfg.daddr = val,
                "offset_sport" => cfg.sport = val,
                "offset_dport" => cfg.dport = val,
                "offset_daddr_ipv6" => cfg.daddr_ipv6 = val,
                "offset_netns" => cfg.netns = val,
                "offset_ino" => cfg.ino = val,
                "offset_rtt" => cfg.rtt = val,
                "offset_rtt_var" => cfg.rtt_var = val,
                "offset_socket_sk" => cfg.socket_sk = val,
                "offset_saddr_fl4" => cfg.saddr_fl4 = val,
                "offset_daddr_fl4" => cfg.daddr_fl4 = val,
                "offset_sport_fl4" => cfg.sport_fl4 = val,
                "offset_dport_fl4" => cfg.dport_fl4 = val,
                "offset_saddr_fl6" => cfg.saddr_fl6 = val,
                "offset_daddr_fl6" => cfg.daddr_fl6 = val,
                "offset_sport_fl6" => cfg.sport_fl6 = val,
                "offset_dport_fl6" => cfg.dport_fl6 = val,
                "ipv6_enabled" => cfg.ipv6_enabled = val != 0,
                "fl4_offsets" => cfg.fl4_offsets_known = val != 0,
                "fl6_offsets" => cfg.fl6_offsets_known = val != 0,
                _ => {}
            }
        }
        cfg
    }
}
