//! Interface queries of `AF_PACKET` sockets.
use super::{ifreq, Errno, LibcResult, IoctlResult};

/// Every ether type, for a socket capturing all frames.
pub(crate) const ETH_P_ALL: libc::c_short = 0x0003;

const SIOCGIFMTU: libc::Ioctl = 0x8921;
const SIOCGIFINDEX: libc::Ioctl = 0x8933;

/// An `ifreq` whose union holds a single integer.
#[repr(C)]
struct IntRequest {
    interface: ifreq,
    value: libc::c_int,
}

impl ifreq {
    /// The MTU of the interface.
    pub(crate) fn mtu(&self, fd: libc::c_int) -> Result<libc::c_int, Errno> {
        self.int_ioctl(fd, SIOCGIFMTU)
    }

    /// The index of the interface, as used in `sockaddr_ll`.
    pub(crate) fn index(&self, fd: libc::c_int) -> Result<libc::c_int, Errno> {
        self.int_ioctl(fd, SIOCGIFINDEX)
    }

    fn int_ioctl(&self, fd: libc::c_int, op: libc::Ioctl) -> Result<libc::c_int, Errno> {
        let mut request = IntRequest { interface: *self, value: 0 };
        // SAFETY: `request` starts with the interface name and has room for the integer result.
        let res = unsafe { libc::ioctl(fd, op, &mut request as *mut IntRequest) };
        IoctlResult(res).errno()?;
        Ok(request.value)
    }
}
