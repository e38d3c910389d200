//! nettrace-tracer - connection-tracking core of the nettrace agent.
//!
//! Reconstructs per-connection identity and statistics from instrumentation
//! hooks on socket lifecycle and packet-processing entry points, without
//! access to the owning application's state:
//!
//! - **Tuple builders**: from live socket objects (offset-driven reads) and
//!   from raw packet buffers
//! - **Flow correlation**: thread-keyed call/return records for hooks that
//!   share no call-stack context
//! - **Aggregation**: order-independent merges into bounded shared maps,
//!   with closed connections batched for a consumer
//!
//! Every hook body is bounded and non-blocking; events are best-effort and
//! a dropped event is a counted, accepted outcome.

pub mod abi;
pub mod batch;
pub mod conn;
pub mod error;
pub mod ipv6;
pub mod kernel;
pub mod maps;
pub mod netns;
pub mod offsets;
pub mod skb;
pub mod sockfd;
pub mod stats;
pub mod tcp;
pub mod telemetry;
pub mod testkit;
pub mod tracer;
pub mod udp;

// Re-export commonly used types
pub use abi::{HookContext, KernelVersion, ProbeLayout};
pub use batch::{BatchSink, CloseFlusher, NullSink};
pub use error::{TraceError, TraceResult};
pub use kernel::{Flow4, Flow6, KernelSpace, MsgHdr, Sock, SocketHandle};
pub use maps::FlowMap;
pub use offsets::OffsetConfig;
pub use skb::{read_conn_tuple_skb, PacketBuf};
pub use stats::SegmentCount;
pub use telemetry::{Telemetry, TelemetrySnapshot};
pub use tracer::{Tracer, TracerConfig, TracerMaps};
