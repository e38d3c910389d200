//! Test fixtures: an image-backed kernel address space plus builders for
//! socket images, packet buffers and batch sinks. Used by the unit and
//! integration tests; handy for downstream consumers writing their own.

use std::collections::BTreeMap;
use std::sync::Arc;

use nettrace_common::ConnClose;
use parking_lot::Mutex;

use crate::batch::BatchSink;
use crate::error::{TraceError, TraceResult};
use crate::kernel::KernelSpace;
use crate::offsets::OffsetConfig;

/// In-memory kernel address space: byte images mapped at chosen base
/// addresses. Reads that touch unmapped memory fault, like the real
/// probe-read helper. Clones share the same underlying regions.
#[derive(Clone, Default)]
pub struct FakeKernel {
    regions: Arc<Mutex<BTreeMap<u64, Vec<u8>>>>,
}

impl FakeKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `bytes` at `base`, replacing any previous region there.
    pub fn map_region(&self, base: u64, bytes: Vec<u8>) {
        self.regions.lock().insert(base, bytes);
    }

    pub fn unmap_region(&self, base: u64) {
        self.regions.lock().remove(&base);
    }
}

impl KernelSpace for FakeKernel {
    fn read(&self, addr: u64, buf: &mut [u8]) -> TraceResult<()> {
        let regions = self.regions.lock();
        let (base, bytes) = regions
            .range(..=addr)
            .next_back()
            .ok_or(TraceError::Fault(addr))?;
        let start = (addr - base) as usize;
        let end = start + buf.len();
        if end > bytes.len() {
            return Err(TraceError::Fault(addr));
        }
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }
}

/// Offset table used by the test images. Values are arbitrary but
/// non-overlapping, mimicking a resolved production table.
pub fn test_offsets() -> OffsetConfig {
    OffsetConfig {
        family: 0x10,
        saddr: 0x14,
        daddr: 0x18,
        sport: 0x20,
        dport: 0x24,
        daddr_ipv6: 0x30,
        netns: 0x58,
        ino: 0x08,
        rtt: 0x60,
        rtt_var: 0x64,
        socket_sk: 0x18,
        saddr_fl4: 0x00,
        daddr_fl4: 0x04,
        sport_fl4: 0x08,
        dport_fl4: 0x0a,
        saddr_fl6: 0x00,
        daddr_fl6: 0x10,
        sport_fl6: 0x20,
        dport_fl6: 0x22,
        ipv6_enabled: true,
        fl4_offsets_known: true,
        fl6_offsets_known: true,
    }
}

/// Size of the socket images produced by [`SockBuilder`].
pub const SOCK_IMAGE_LEN: usize = 0x80;

/// Builds a `struct sock` byte image laid out per an [`OffsetConfig`].
pub struct SockBuilder {
    cfg: OffsetConfig,
    image: Vec<u8>,
}

impl SockBuilder {
    pub fn new(cfg: &OffsetConfig) -> Self {
        Self {
            cfg: cfg.clone(),
            image: vec![0u8; SOCK_IMAGE_LEN],
        }
    }

    fn put(&mut self, off: u64, bytes: &[u8]) -> &mut Self {
        let off = off as usize;
        self.image[off..off + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn family(&mut self, family: u16) -> &mut Self {
        let off = self.cfg.family;
        self.put(off, &family.to_ne_bytes())
    }

    /// IPv4 addresses, given as the network-order octets.
    pub fn v4(&mut self, saddr: [u8; 4], daddr: [u8; 4]) -> &mut Self {
        self.family(crate::conn::AF_INET);
        let (s, d) = (self.cfg.saddr, self.cfg.daddr);
        self.put(s, &saddr);
        self.put(d, &daddr)
    }

    /// IPv6 addresses, given as the 16 network-order octets. Destination
    /// first, source adjacent, matching the kernel layout.
    pub fn v6(&mut self, saddr: [u8; 16], daddr: [u8; 16]) -> &mut Self {
        self.family(crate::conn::AF_INET6);
        let base = self.cfg.daddr_ipv6;
        self.put(base, &daddr);
        self.put(base + 16, &saddr)
    }

    /// Bound source port (host order), the post-establishment field.
    pub fn sport_bound(&mut self, port: u16) -> &mut Self {
        let off = self.cfg.dport + 2;
        self.put(off, &port.to_ne_bytes())
    }

    /// Pre-connection source port field (network order).
    pub fn sport_pre(&mut self, port: u16) -> &mut Self {
        let off = self.cfg.sport;
        self.put(off, &port.to_be_bytes())
    }

    /// Destination port (network order).
    pub fn dport(&mut self, port: u16) -> &mut Self {
        let off = self.cfg.dport;
        self.put(off, &port.to_be_bytes())
    }

    pub fn rtt(&mut self, rtt: u32, rtt_var: u32) -> &mut Self {
        let (r, v) = (self.cfg.rtt, self.cfg.rtt_var);
        self.put(r, &rtt.to_ne_bytes());
        self.put(v, &rtt_var.to_ne_bytes())
    }

    /// Pointer to the namespace object (map one with [`netns_region`]).
    pub fn netns_ptr(&mut self, ptr: u64) -> &mut Self {
        let off = self.cfg.netns;
        self.put(off, &ptr.to_ne_bytes())
    }

    pub fn build(&self) -> Vec<u8> {
        self.image.clone()
    }
}

/// Namespace object image carrying the given inode number.
pub fn netns_region(cfg: &OffsetConfig, ino: u32) -> Vec<u8> {
    let mut image = vec![0u8; 0x20];
    let off = cfg.ino as usize;
    image[off..off + 4].copy_from_slice(&ino.to_ne_bytes());
    image
}

/// `struct socket` image: type field plus the underlying sock pointer.
pub fn socket_region(cfg: &OffsetConfig, sock_type: u16, sk: u64) -> Vec<u8> {
    let mut image = vec![0u8; 0x40];
    image[4..6].copy_from_slice(&sock_type.to_ne_bytes());
    let off = cfg.socket_sk as usize;
    image[off..off + 8].copy_from_slice(&sk.to_ne_bytes());
    image
}

/// Message-descriptor image whose first field points at a sockaddr.
pub fn msghdr_region(msg_name: u64) -> Vec<u8> {
    let mut image = vec![0u8; 0x40];
    image[..8].copy_from_slice(&msg_name.to_ne_bytes());
    image
}

/// `sockaddr_in` image.
pub fn sockaddr_in_region(port: u16, addr: [u8; 4]) -> Vec<u8> {
    let mut image = vec![0u8; 16];
    image[..2].copy_from_slice(&crate::conn::AF_INET.to_ne_bytes());
    image[2..4].copy_from_slice(&port.to_be_bytes());
    image[4..8].copy_from_slice(&addr);
    image
}

/// IPv4 flow-descriptor image per the `*_fl4` offsets.
pub fn flow4_region(cfg: &OffsetConfig, saddr: [u8; 4], daddr: [u8; 4], sport: u16, dport: u16) -> Vec<u8> {
    let mut image = vec![0u8; 0x20];
    let put = |image: &mut Vec<u8>, off: u64, bytes: &[u8]| {
        let off = off as usize;
        image[off..off + bytes.len()].copy_from_slice(bytes);
    };
    put(&mut image, cfg.saddr_fl4, &saddr);
    put(&mut image, cfg.daddr_fl4, &daddr);
    put(&mut image, cfg.sport_fl4, &sport.to_be_bytes());
    put(&mut image, cfg.dport_fl4, &dport.to_be_bytes());
    image
}

/// IPv6 flow-descriptor image per the `*_fl6` offsets.
pub fn flow6_region(
    cfg: &OffsetConfig,
    saddr: [u8; 16],
    daddr: [u8; 16],
    sport: u16,
    dport: u16,
) -> Vec<u8> {
    let mut image = vec![0u8; 0x40];
    let put = |image: &mut Vec<u8>, off: u64, bytes: &[u8]| {
        let off = off as usize;
        image[off..off + bytes.len()].copy_from_slice(bytes);
    };
    put(&mut image, cfg.saddr_fl6, &saddr);
    put(&mut image, cfg.daddr_fl6, &daddr);
    put(&mut image, cfg.sport_fl6, &sport.to_be_bytes());
    put(&mut image, cfg.dport_fl6, &dport.to_be_bytes());
    image
}

/// `sockaddr_in6` image.
pub fn sockaddr_in6_region(port: u16, addr: [u8; 16]) -> Vec<u8> {
    let mut image = vec![0u8; 28];
    image[..2].copy_from_slice(&crate::conn::AF_INET6.to_ne_bytes());
    image[2..4].copy_from_slice(&port.to_be_bytes());
    image[8..24].copy_from_slice(&addr);
    image
}

/// Address halves in the representation tuples use: the native-endian
/// interpretation of the network-order bytes.
pub fn v4_addr(octets: [u8; 4]) -> u64 {
    u64::from(u32::from_ne_bytes(octets))
}

pub fn v6_halves(octets: [u8; 16]) -> (u64, u64) {
    let mut h = [0u8; 8];
    let mut l = [0u8; 8];
    h.copy_from_slice(&octets[..8]);
    l.copy_from_slice(&octets[8..]);
    (u64::from_ne_bytes(h), u64::from_ne_bytes(l))
}

/// Ethernet + IPv4 + transport frame. For TCP, `tcp_doff` is the
/// data-offset nibble (header length in 32-bit words, minimum 5) and
/// `tcp_flags` the flag byte; both are ignored for UDP.
pub fn eth_ipv4_packet(
    l4_proto: u8,
    saddr: [u8; 4],
    daddr: [u8; 4],
    sport: u16,
    dport: u16,
    tcp_doff: u8,
    tcp_flags: u8,
) -> Vec<u8> {
    let mut pkt = vec![0u8; 14];
    pkt[12..14].copy_from_slice(&0x0800u16.to_be_bytes());

    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[9] = l4_proto;
    ip[12..16].copy_from_slice(&saddr);
    ip[16..20].copy_from_slice(&daddr);
    pkt.extend_from_slice(&ip);

    pkt.extend_from_slice(&transport_header(l4_proto, sport, dport, tcp_doff, tcp_flags));
    // A little payload so the frame is not suspiciously empty.
    pkt.extend_from_slice(b"payload");
    pkt
}

/// Ethernet + IPv6 + transport frame.
pub fn eth_ipv6_packet(
    l4_proto: u8,
    saddr: [u8; 16],
    daddr: [u8; 16],
    sport: u16,
    dport: u16,
    tcp_doff: u8,
    tcp_flags: u8,
) -> Vec<u8> {
    let mut pkt = vec![0u8; 14];
    pkt[12..14].copy_from_slice(&0x86DDu16.to_be_bytes());

    let mut ip = vec![0u8; 40];
    ip[0] = 0x60;
    ip[6] = l4_proto;
    ip[8..24].copy_from_slice(&saddr);
    ip[24..40].copy_from_slice(&daddr);
    pkt.extend_from_slice(&ip);

    pkt.extend_from_slice(&transport_header(l4_proto, sport, dport, tcp_doff, tcp_flags));
    pkt.extend_from_slice(b"payload");
    pkt
}

fn transport_header(l4_proto: u8, sport: u16, dport: u16, tcp_doff: u8, tcp_flags: u8) -> Vec<u8> {
    match l4_proto {
        6 => {
            let doff = tcp_doff.max(5);
            let mut tcp = vec![0u8; usize::from(doff) * 4];
            tcp[0..2].copy_from_slice(&sport.to_be_bytes());
            tcp[2..4].copy_from_slice(&dport.to_be_bytes());
            tcp[12] = doff << 4;
            tcp[13] = tcp_flags;
            tcp
        }
        _ => {
            let mut udp = vec![0u8; 8];
            udp[0..2].copy_from_slice(&sport.to_be_bytes());
            udp[2..4].copy_from_slice(&dport.to_be_bytes());
            udp
        }
    }
}

/// Sink that keeps every delivered batch for inspection.
#[derive(Default)]
pub struct CollectSink {
    batches: Mutex<Vec<Vec<ConnClose>>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<ConnClose>> {
        self.batches.lock().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }
}

impl BatchSink for CollectSink {
    fn batch_ready(&self, batch: &[ConnClose]) {
        self.batches.lock().push(batch.to_vec());
    }
}
