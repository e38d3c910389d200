//! Error types for the tracer core.

use thiserror::Error;

/// Per-hook failure conditions. All of them are non-fatal and consumed by
/// the hook that observed them: the event is dropped, a counter or debug
/// line may be emitted, and the hook returns normally. Nothing propagates
/// past a hook boundary.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TraceError {
    /// A required address or port field is still zero after all fallbacks.
    /// The event is dropped; no partial record is stored.
    #[error("address or port still unset after all fallbacks")]
    IncompleteTuple,

    /// Address family other than IPv4/IPv6. Dropped silently.
    #[error("unsupported address family")]
    UnsupportedFamily,

    /// A capability flag says the needed fallback offsets were never
    /// resolved. Dropped, with a miss counter incremented by the caller.
    #[error("fallback offsets not resolved")]
    OffsetUnavailable,

    /// IPv6 processing is disabled by configuration; treated like an
    /// unsupported family.
    #[error("IPv6 processing disabled")]
    Ipv6Disabled,

    /// A kernel memory read faulted. Dropped silently.
    #[error("kernel read faulted at {0:#x}")]
    Fault(u64),
}

pub type TraceResult<T> = Result<T, TraceError>;
