//! Network-namespace resolution.

use crate::kernel::{KernelSpace, Sock};
use crate::tracer::Tracer;

impl<K: KernelSpace> Tracer<K> {
    /// Namespace inode number of the socket's network namespace. Returns 0
    /// on any failure; 0 means "namespace unknown", never a valid
    /// namespace.
    pub fn netns_for_sock(&self, sk: Sock) -> u32 {
        let ns_ptr = match self.kernel.read_u64(sk.field(self.offsets.netns)) {
            Ok(p) if p != 0 => p,
            _ => return 0,
        };
        self.kernel
            .read_u32(ns_ptr.wrapping_add(self.offsets.ino))
            .unwrap_or(0)
    }
}
