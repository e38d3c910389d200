//! Descriptor-to-socket correlation.
//!
//! Some hooks only ever see a file descriptor (the file-relay send path),
//! so the descriptor-resolution function is instrumented to maintain a
//! bidirectional (pid, fd) <-> sock mapping. The two directions are always
//! created together here and destroyed together from the TCP close hook.

use nettrace_common::{ConnTuple, PidFd, CONN_DIRECTION_UNKNOWN, TUPLE_TYPE_TCP};

use crate::abi::HookContext;
use crate::kernel::{KernelSpace, Sock, SocketHandle};
use crate::stats::SegmentCount;
use crate::tracer::Tracer;

/// `type` field inside `struct socket`: a 4-byte state enum precedes it.
/// Stable across every supported kernel, so not offset-guessed.
const SOCKET_TYPE_OFF: u64 = 4;

/// Stream socket type number.
const SOCK_STREAM: u16 = 1;

impl<K: KernelSpace> Tracer<K> {
    /// descriptor-resolved (pre): stash the descriptor for the return hook,
    /// unless this (pid, fd) pair is already mapped.
    pub fn sockfd_lookup(&self, ctx: &HookContext) {
        let fd = ctx.arg(0) as u32;
        let key = PidFd { pid: ctx.pid(), fd };
        if self.maps.sock_by_pid_fd.lookup(&key).is_some() {
            return;
        }
        self.maps.sockfd_args.insert(ctx.pid_tgid, fd);
    }

    /// descriptor-resolved (post): for stream sockets, extract the
    /// underlying sock pointer from the returned handle and insert both
    /// correlation directions. The scratch entry is deleted on every exit
    /// path.
    pub fn sockfd_lookup_return(&self, ctx: &HookContext) {
        let Some(fd) = self.maps.sockfd_args.lookup(&ctx.pid_tgid) else {
            return;
        };

        self.correlate_fd(ctx, fd);
        self.maps.sockfd_args.remove(&ctx.pid_tgid);
    }

    fn correlate_fd(&self, ctx: &HookContext, fd: u32) {
        let socket = SocketHandle(ctx.ret);
        if socket.is_null() {
            return;
        }
        let Ok(sock_type) = self.kernel.read_u16(socket.field(SOCKET_TYPE_OFF)) else {
            return;
        };
        if sock_type != SOCK_STREAM {
            return;
        }
        let Ok(sk) = self
            .kernel
            .read_u64(socket.field(self.offsets.socket_sk))
        else {
            return;
        };
        if sk == 0 {
            return;
        }

        let key = PidFd { pid: ctx.pid(), fd };
        // Cleaned up together by the TCP close hook.
        self.maps.pid_fd_by_sock.insert(sk, key);
        self.maps.sock_by_pid_fd.insert(key, sk);
    }

    /// Remove both correlation directions for a socket. Called only from
    /// the TCP close hook so the pair never half-exists.
    pub(crate) fn clear_sockfd_correlation(&self, sk: Sock) {
        if sk.is_null() {
            return;
        }
        if let Some(key) = self.maps.pid_fd_by_sock.remove(&sk.0) {
            self.maps.sock_by_pid_fd.remove(&key);
        }
    }

    /// file-relay-send (pre): resolve the outgoing descriptor to a socket
    /// via the correlation map and stash it for the return hook.
    pub fn sendfile_call(&self, ctx: &HookContext) {
        let key = PidFd {
            pid: ctx.pid(),
            fd: ctx.arg(0) as u32,
        };
        let Some(sk) = self.maps.sock_by_pid_fd.lookup(&key) else {
            return;
        };
        self.maps.sendfile_args.insert(ctx.pid_tgid, sk);
    }

    /// file-relay-send (post): report the sent byte count against the
    /// stashed socket's tuple.
    pub fn sendfile_return(&self, ctx: &HookContext) {
        let Some(sk) = self.maps.sendfile_args.remove(&ctx.pid_tgid) else {
            return;
        };
        let mut t = ConnTuple::default();
        if self
            .read_conn_tuple(&mut t, Sock(sk), ctx.pid_tgid, TUPLE_TYPE_TCP)
            .is_err()
        {
            return;
        }
        let sent = ctx.ret as i64;
        if sent < 0 {
            return;
        }
        self.handle_message(
            &t,
            sent as u64,
            0,
            CONN_DIRECTION_UNKNOWN,
            0,
            0,
            SegmentCount::None,
        );
    }
}
