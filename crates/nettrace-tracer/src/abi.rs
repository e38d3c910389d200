//! Hook invocation context and kernel-version argument layout.
//!
//! Several instrumented functions changed their argument positions across
//! kernel releases. The differences are resolved once at attach time into a
//! [`ProbeLayout`] strategy table; hook bodies index into it and contain no
//! version conditionals of their own.

/// Maximum number of argument registers captured per invocation.
pub const MAX_HOOK_ARGS: usize = 9;

/// Snapshot of one hook invocation: argument registers, return value (only
/// meaningful in return hooks), and the caller's pid/tid pair. A pre/post
/// hook pair never shares a call-stack value; anything that must survive to
/// the return hook goes through a thread-keyed correlation map.
#[derive(Debug, Clone, Copy, Default)]
pub struct HookContext {
    pub args: [u64; MAX_HOOK_ARGS],
    pub ret: u64,
    /// Upper 32 bits: process id; lower 32 bits: thread id.
    pub pid_tgid: u64,
}

impl HookContext {
    pub fn arg(&self, index: usize) -> u64 {
        self.args.get(index).copied().unwrap_or(0)
    }

    pub fn pid(&self) -> u32 {
        (self.pid_tgid >> 32) as u32
    }
}

/// Running kernel version, detected once before attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KernelVersion {
    pub major: u16,
    pub minor: u16,
}

impl KernelVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub fn at_least(&self, major: u16, minor: u16) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

/// Argument positions for the version-dependent instrumentation points,
/// selected once per [`KernelVersion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeLayout {
    /// stream-send: socket and byte-count argument indices (moved in 4.1).
    pub tcp_sendmsg_sock: usize,
    pub tcp_sendmsg_size: usize,
    /// datagram-receive: socket, message-descriptor and flags argument
    /// indices (moved in 4.1).
    pub udp_recvmsg_sock: usize,
    pub udp_recvmsg_msg: usize,
    pub udp_recvmsg_flags: usize,
    /// IPv6 datagram-send: byte-count and flow-descriptor argument indices
    /// (flow argument moved in 4.7).
    pub ip6_send_size: usize,
    pub ip6_send_flow: usize,
    /// segment-retransmitted: index of the segment count when the call site
    /// provides one; `None` before 4.7, where the count defaults to 1.
    pub retransmit_segs: Option<usize>,
}

impl ProbeLayout {
    pub fn for_kernel(version: KernelVersion) -> Self {
        let post_4_1 = version.at_least(4, 1);
        let post_4_7 = version.at_least(4, 7);
        Self {
            tcp_sendmsg_sock: if post_4_1 { 0 } else { 1 },
            tcp_sendmsg_size: if post_4_1 { 2 } else { 3 },
            udp_recvmsg_sock: if post_4_1 { 0 } else { 1 },
            udp_recvmsg_msg: if post_4_1 { 1 } else { 2 },
            udp_recvmsg_flags: if post_4_1 { 4 } else { 5 },
            ip6_send_size: 3,
            ip6_send_flow: if post_4_7 { 6 } else { 8 },
            retransmit_segs: if post_4_7 { Some(2) } else { None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_shifts_for_old_kernels() {
        let old = ProbeLayout::for_kernel(KernelVersion::new(3, 19));
        assert_eq!(old.tcp_sendmsg_sock, 1);
        assert_eq!(old.udp_recvmsg_flags, 5);
        assert_eq!(old.ip6_send_flow, 8);
        assert_eq!(old.retransmit_segs, None);

        let new = ProbeLayout::for_kernel(KernelVersion::new(5, 4));
        assert_eq!(new.tcp_sendmsg_sock, 0);
        assert_eq!(new.udp_recvmsg_flags, 4);
        assert_eq!(new.ip6_send_flow, 6);
        assert_eq!(new.retransmit_segs, Some(2));
    }

    #[test]
    fn version_comparison() {
        let v = KernelVersion::new(4, 7);
        assert!(v.at_least(4, 1));
        assert!(v.at_least(4, 7));
        assert!(!v.at_least(4, 8));
        assert!(!v.at_least(5, 0));
    }

    #[test]
    fn out_of_range_arg_reads_zero() {
        let ctx = HookContext::default();
        assert_eq!(ctx.arg(MAX_HOOK_ARGS + 1), 0);
    }
}
