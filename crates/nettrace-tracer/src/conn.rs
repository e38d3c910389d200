//! Socket-path tuple builder.
//!
//! Reconstructs a connection tuple from a live `struct sock` using the
//! resolved offsets. Two entry points: [`Tracer::read_conn_tuple`] zeroes
//! the tuple first; [`Tracer::read_conn_tuple_partial`] preserves fields an
//! earlier hook already captured, so a tuple assembled from multiple
//! uncorrelated observations converges instead of flapping.

use nettrace_common::{ConnTuple, TUPLE_V4};
use tracing::debug;

use crate::error::{TraceError, TraceResult};
use crate::ipv6::normalize_family;
use crate::kernel::{ntohs, KernelSpace, Sock};
use crate::tracer::Tracer;

/// IPv4 address family number.
pub const AF_INET: u16 = 2;
/// IPv6 address family number.
pub const AF_INET6: u16 = 10;

impl<K: KernelSpace> Tracer<K> {
    /// Source port with fallback: the bound-port field (host order, sits
    /// right after the destination port) is only populated once the
    /// connection is established; before that, fall back to the
    /// network-order pre-connection field.
    pub(crate) fn read_sport(&self, sk: Sock) -> u16 {
        let established = self
            .kernel
            .read_u16(sk.field(self.offsets.dport + 2))
            .unwrap_or(0);
        if established != 0 {
            return established;
        }
        match self.kernel.read_u16(sk.field(self.offsets.sport)) {
            Ok(raw) => ntohs(raw),
            Err(_) => 0,
        }
    }

    fn family(&self, sk: Sock) -> TraceResult<u16> {
        self.kernel.read_u16(sk.field(self.offsets.family))
    }

    /// Fill a tuple from the socket, zeroing it first.
    pub fn read_conn_tuple(
        &self,
        t: &mut ConnTuple,
        sk: Sock,
        pid_tgid: u64,
        proto: u32,
    ) -> TraceResult<()> {
        *t = ConnTuple::default();
        self.read_conn_tuple_partial(t, sk, pid_tgid, proto)
    }

    /// Fill only the fields of `t` that are still unset. Fields already
    /// captured by the caller (e.g. a destination address lifted from a
    /// message descriptor) are never overwritten.
    pub fn read_conn_tuple_partial(
        &self,
        t: &mut ConnTuple,
        sk: Sock,
        pid_tgid: u64,
        proto: u32,
    ) -> TraceResult<()> {
        let sk = sk.require()?;
        t.pid = (pid_tgid >> 32) as u32;
        t.metadata |= proto;

        // Namespace first: it stays readable even when addresses are not
        // yet bound (unconnected UDP sends), so failure paths still carry
        // maximal information.
        t.netns = self.netns_for_sock(sk);

        match self.family(sk)? {
            AF_INET => {
                t.metadata |= TUPLE_V4;
                if t.saddr_l == 0 {
                    t.saddr_l = u64::from(self.kernel.read_u32(sk.field(self.offsets.saddr))?);
                }
                if t.daddr_l == 0 {
                    t.daddr_l = u64::from(self.kernel.read_u32(sk.field(self.offsets.daddr))?);
                }
                if t.saddr_l == 0 || t.daddr_l == 0 {
                    debug!(
                        saddr = t.saddr_l,
                        daddr = t.daddr_l,
                        "v4 source or destination address not set"
                    );
                    return Err(TraceError::IncompleteTuple);
                }
            }
            AF_INET6 => {
                if !self.offsets.ipv6_enabled {
                    return Err(TraceError::Ipv6Disabled);
                }
                // The source address sits immediately after the destination
                // address in the underlying structure, so all four halves
                // are read relative to the destination offset.
                let base = self.offsets.daddr_ipv6;
                if t.daddr_h == 0 {
                    t.daddr_h = self.kernel.read_u64(sk.field(base))?;
                }
                if t.daddr_l == 0 {
                    t.daddr_l = self.kernel.read_u64(sk.field(base + 8))?;
                }
                if t.saddr_h == 0 {
                    t.saddr_h = self.kernel.read_u64(sk.field(base + 16))?;
                }
                if t.saddr_l == 0 {
                    t.saddr_l = self.kernel.read_u64(sk.field(base + 24))?;
                }

                if t.saddr_h == 0 && t.saddr_l == 0 {
                    debug!("v6 source address not set");
                    return Err(TraceError::IncompleteTuple);
                }
                if t.daddr_h == 0 && t.daddr_l == 0 {
                    debug!("v6 destination address not set");
                    return Err(TraceError::IncompleteTuple);
                }

                normalize_family(t);
            }
            _ => return Err(TraceError::UnsupportedFamily),
        }

        if t.sport == 0 {
            t.sport = self.read_sport(sk);
        }
        if t.dport == 0 {
            t.dport = ntohs(self.kernel.read_u16(sk.field(self.offsets.dport))?);
        }
        if t.sport == 0 || t.dport == 0 {
            debug!(
                sport = t.sport,
                dport = t.dport,
                "source or destination port not set"
            );
            return Err(TraceError::IncompleteTuple);
        }

        Ok(())
    }
}
