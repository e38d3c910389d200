//! The tracer: shared state plus one method per instrumentation point.
//!
//! Hook bodies live in the per-protocol modules (`tcp`, `udp`, `sockfd`)
//! as `impl` blocks on [`Tracer`]; this module owns the state they share.

use nettrace_common::{ConnStats, ConnTuple, PidFd, PortBinding, TcpStats, UdpRecvArgs};
use serde::Deserialize;

use crate::abi::{KernelVersion, ProbeLayout};
use crate::batch::{BatchSink, CloseFlusher};
use crate::kernel::KernelSpace;
use crate::maps::FlowMap;
use crate::offsets::OffsetConfig;
use crate::telemetry::Telemetry;

/// Capacities of the shared maps and the closed-connection buffer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Per-tuple statistics stores (byte counts and TCP aggregates).
    pub conn_map_entries: usize,
    /// Descriptor-to-socket correlation maps.
    pub fd_map_entries: usize,
    /// Thread-keyed call/return scratch maps.
    pub scratch_map_entries: usize,
    /// Listening-port tables.
    pub port_map_entries: usize,
    /// Closed-connection batch threshold.
    pub closed_batch_capacity: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            conn_map_entries: 65536,
            fd_map_entries: 1024,
            scratch_map_entries: 1024,
            port_map_entries: 8192,
            closed_batch_capacity: 64,
        }
    }
}

/// The shared maps. Every entry here is also readable by the external
/// aggregator, which is why keys and values are the `#[repr(C)]` types from
/// `nettrace-common`.
pub struct TracerMaps {
    /// Per-tuple byte/packet aggregates.
    pub conn_stats: FlowMap<ConnTuple, ConnStats>,
    /// Per-tuple TCP aggregates.
    pub tcp_stats: FlowMap<ConnTuple, TcpStats>,
    /// (namespace, port) -> listening, for TCP.
    pub port_bindings: FlowMap<PortBinding, u8>,
    /// (0, port) -> listening, for UDP; namespace deliberately omitted.
    pub udp_port_bindings: FlowMap<PortBinding, u8>,
    /// Thread-keyed datagram-receive correlation records.
    pub udp_recv_args: FlowMap<u64, UdpRecvArgs>,
    /// Thread-keyed scratch for the descriptor-resolution pre hook.
    pub sockfd_args: FlowMap<u64, u32>,
    /// (pid, fd) -> sock pointer.
    pub sock_by_pid_fd: FlowMap<PidFd, u64>,
    /// sock pointer -> (pid, fd).
    pub pid_fd_by_sock: FlowMap<u64, PidFd>,
    /// Thread-keyed scratch for the file-relay pre hook.
    pub sendfile_args: FlowMap<u64, u64>,
}

impl TracerMaps {
    pub fn with_config(cfg: &TracerConfig) -> Self {
        Self {
            conn_stats: FlowMap::new(cfg.conn_map_entries),
            tcp_stats: FlowMap::new(cfg.conn_map_entries),
            port_bindings: FlowMap::new(cfg.port_map_entries),
            udp_port_bindings: FlowMap::new(cfg.port_map_entries),
            udp_recv_args: FlowMap::new(cfg.scratch_map_entries),
            sockfd_args: FlowMap::new(cfg.scratch_map_entries),
            sock_by_pid_fd: FlowMap::new(cfg.fd_map_entries),
            pid_fd_by_sock: FlowMap::new(cfg.fd_map_entries),
            sendfile_args: FlowMap::new(cfg.scratch_map_entries),
        }
    }
}

/// Connection-tracking core. One instance is shared by every hook; all of
/// its methods take `&self` and perform a bounded amount of work.
pub struct Tracer<K: KernelSpace> {
    pub(crate) offsets: OffsetConfig,
    pub(crate) layout: ProbeLayout,
    pub(crate) kernel: K,
    pub(crate) maps: TracerMaps,
    pub(crate) telemetry: Telemetry,
    pub(crate) flusher: CloseFlusher,
    pub(crate) sink: Box<dyn BatchSink>,
}

impl<K: KernelSpace> Tracer<K> {
    pub fn new(
        offsets: OffsetConfig,
        config: &TracerConfig,
        kernel_version: KernelVersion,
        kernel: K,
        sink: Box<dyn BatchSink>,
    ) -> Self {
        Self {
            offsets,
            layout: ProbeLayout::for_kernel(kernel_version),
            kernel,
            maps: TracerMaps::with_config(config),
            telemetry: Telemetry::default(),
            flusher: CloseFlusher::new(config.closed_batch_capacity),
            sink,
        }
    }

    /// The shared maps, as the external aggregator sees them.
    pub fn maps(&self) -> &TracerMaps {
        &self.maps
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn offsets(&self) -> &OffsetConfig {
        &self.offsets
    }

    pub fn layout(&self) -> &ProbeLayout {
        &self.layout
    }
}
