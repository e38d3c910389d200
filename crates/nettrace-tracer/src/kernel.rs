//! Kernel memory seam.
//!
//! Hooks never dereference kernel objects directly; every access goes
//! through [`KernelSpace`], a fallible bounded read at a raw address. The
//! production implementation is the probe-read helper of the runtime the
//! hooks are attached with; tests supply an image-backed fake
//! (see [`crate::testkit`]).

use crate::error::{TraceError, TraceResult};

/// Fallible reads of kernel memory. A failed read must surface as an error,
/// never as garbage bytes; partial reads are not allowed.
pub trait KernelSpace {
    /// Read exactly `buf.len()` bytes starting at `addr`.
    fn read(&self, addr: u64, buf: &mut [u8]) -> TraceResult<()>;

    fn read_u8(&self, addr: u64) -> TraceResult<u8> {
        let mut buf = [0u8; 1];
        self.read(addr, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&self, addr: u64) -> TraceResult<u16> {
        let mut buf = [0u8; 2];
        self.read(addr, &mut buf)?;
        Ok(u16::from_ne_bytes(buf))
    }

    fn read_u32(&self, addr: u64) -> TraceResult<u32> {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf)?;
        Ok(u32::from_ne_bytes(buf))
    }

    fn read_u64(&self, addr: u64) -> TraceResult<u64> {
        let mut buf = [0u8; 8];
        self.read(addr, &mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }
}

impl<K: KernelSpace + ?Sized> KernelSpace for &K {
    fn read(&self, addr: u64, buf: &mut [u8]) -> TraceResult<()> {
        (**self).read(addr, buf)
    }
}

macro_rules! kernel_ptr {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);

        impl $name {
            pub fn is_null(&self) -> bool {
                self.0 == 0
            }

            /// Address of a field at `offset` bytes into the object.
            pub fn field(&self, offset: u64) -> u64 {
                self.0.wrapping_add(offset)
            }

            /// Fail with a fault error when the pointer is null.
            pub fn require(&self) -> TraceResult<Self> {
                if self.is_null() {
                    Err(TraceError::Fault(0))
                } else {
                    Ok(*self)
                }
            }
        }
    };
}

kernel_ptr!(
    /// Raw `struct sock` pointer.
    Sock
);
kernel_ptr!(
    /// Raw `struct socket` pointer (the higher-level handle that owns a
    /// `struct sock`).
    SocketHandle
);
kernel_ptr!(
    /// Raw `struct msghdr` pointer.
    MsgHdr
);
kernel_ptr!(
    /// Raw IPv4 flow-descriptor pointer (per-call routing state carrying
    /// the addresses of an unconnected send).
    Flow4
);
kernel_ptr!(
    /// Raw IPv6 flow-descriptor pointer.
    Flow6
);

/// Network-to-host conversion for a 16-bit value read raw from memory.
pub fn ntohs(raw: u16) -> u16 {
    u16::from_be(raw)
}
