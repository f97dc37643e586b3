// Copyright (C) 2016 whitequark@whitequark.org
// Copyright (C) 2019 Andreas Molzer <andreas.molzer@tum.de>
//
// in large parts from `smoltcp` originally distributed under 0-clause BSD
use core::mem;
use std::io::IoSlice;
use std::os::unix::io::{RawFd, AsRawFd};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

use super::{ifreq, linux, wait, Errno, FdResult, LibcResult, IoLenResult};

use crate::nic::{Endpoint, RecvMode};
use crate::time::{Duration, Instant};
use crate::{Error, Result};

const SOL_PACKET: libc::c_int = 263;
const PACKET_ADD_MEMBERSHIP: libc::c_int = 1;
const PACKET_DROP_MEMBERSHIP: libc::c_int = 2;
const PACKET_MR_PROMISC: libc::c_ushort = 1;

const PACKET_HOST: u8 = 0;
const PACKET_BROADCAST: u8 = 1;
const PACKET_MULTICAST: u8 = 2;
const PACKET_OTHERHOST: u8 = 3;
const PACKET_OUTGOING: u8 = 4;

#[allow(non_camel_case_types)]
#[repr(C)]
struct packet_mreq {
    mr_ifindex: libc::c_int,
    mr_type: libc::c_ushort,
    mr_alen: libc::c_ushort,
    mr_address: [libc::c_uchar; 8],
}

/// A static descriptor for interacting with a raw socket.
///
/// Contains the file descriptor and a pre-filled `ifreq` structure with the interface name that is
/// required for `ioctl` calls. This offers the raw methods for reading and writing but does not
/// encapsulate an actual `Endpoint`. Wrap it in a [`RawSocket`] for this.
///
/// [`RawSocket`]: struct.RawSocket.html
#[derive(Debug)]
pub struct RawSocketDesc {
    lower: libc::c_int,
    ifreq: ifreq,
}

/// A raw link-layer socket bound to one interface, usable as a CSAP endpoint.
///
/// Frames are written with a single `writev` of the packet segments. Receiving waits for the
/// descriptor to become readable and filters frames by their packet type against the receive
/// mode. Unless the mode asks otherwise the interface is promiscuous while receiving.
#[derive(Debug)]
pub struct RawSocket {
    inner: RawSocketDesc,
    if_index: libc::c_int,
    mode: AtomicU8,
    promiscuous: Mutex<bool>,
}

impl AsRawFd for RawSocketDesc {
    fn as_raw_fd(&self) -> RawFd {
        self.lower
    }
}

impl AsRawFd for RawSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl RawSocketDesc {
    /// Try to open a socket for the named interface.
    ///
    /// Note that this does *not* yet bind the interface to the socket, it only creates the
    /// necessary structures involved in doing so. Call [`bind_interface`] afterwards.
    ///
    /// [`bind_interface`]: #method.bind_interface
    pub fn new(name: &str) -> core::result::Result<RawSocketDesc, Errno> {
        let ifreq = ifreq::new(name)?;
        let lower = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK,
                linux::ETH_P_ALL.to_be() as i32)
        };

        FdResult(lower).errno()?;

        Ok(RawSocketDesc {
            lower,
            ifreq,
        })
    }

    /// Query the interface MTU, as reported by the OS.
    pub fn interface_mtu(&self) -> core::result::Result<usize, Errno> {
        self.ifreq.mtu(self.lower)
            .map(|mtu| mtu as usize)
    }

    /// Query the index of the interface.
    pub fn interface_index(&self) -> core::result::Result<libc::c_int, Errno> {
        self.ifreq.index(self.lower)
    }

    /// Update the file descriptor to the named interface.
    ///
    /// See `bind` with `AF_PACKET` and `ETH_P_ALL` for error and a discussion of platform
    /// requirements and checks.
    pub fn bind_interface(&self) -> core::result::Result<(), Errno> {
        let sockaddr = libc::sockaddr_ll {
            sll_family:   libc::AF_PACKET as u16,
            sll_protocol: linux::ETH_P_ALL.to_be() as u16,
            sll_ifindex:  self.interface_index()?,
            sll_hatype:   1,
            sll_pkttype:  0,
            sll_halen:    6,
            sll_addr:     [0; 8],
        };

        let res = unsafe {
            libc::bind(
                self.lower,
                &sockaddr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as u32)
        };

        FdResult(res).errno()
    }

    /// Receive a single frame into the buffer, with its packet type.
    ///
    /// Note that the socket will have been opened with `O_NONBLOCK` so that this only returns an
    /// `Ok` when a buffer is ready.
    pub fn recv(&self, buffer: &mut [u8]) -> core::result::Result<(usize, u8), Errno> {
        let mut from: libc::sockaddr_ll = unsafe { mem::zeroed() };
        let mut from_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
        let len = unsafe {
            libc::recvfrom(
                self.lower,
                buffer.as_mut_ptr() as *mut libc::c_void,
                buffer.len(),
                0,
                &mut from as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                &mut from_len)
        };
        IoLenResult(len).errno()?;
        Ok((len as usize, from.sll_pkttype))
    }

    /// Send a single frame gathered from a vector of buffers.
    pub fn send(&self, iov: &[IoSlice]) -> core::result::Result<usize, Errno> {
        // `IoSlice` is guaranteed to be ABI compatible with `iovec`.
        let len = unsafe {
            libc::writev(
                self.lower,
                iov.as_ptr() as *const libc::iovec,
                iov.len() as libc::c_int)
        };
        IoLenResult(len).errno()?;
        Ok(len as usize)
    }

    fn membership(&self, if_index: libc::c_int, option: libc::c_int) -> core::result::Result<(), Errno> {
        let request = packet_mreq {
            mr_ifindex: if_index,
            mr_type: PACKET_MR_PROMISC,
            mr_alen: 0,
            mr_address: [0; 8],
        };

        let res = unsafe {
            libc::setsockopt(
                self.lower,
                SOL_PACKET,
                option,
                &request as *const packet_mreq as *const libc::c_void,
                mem::size_of::<packet_mreq>() as libc::socklen_t)
        };

        FdResult(res).errno()
    }
}

impl Drop for RawSocketDesc {
    fn drop(&mut self) {
        unsafe { libc::close(self.lower); }
    }
}

impl RawSocket {
    /// Open a raw socket on the named interface.
    pub fn new(name: &str) -> Result<Self> {
        let inner = RawSocketDesc::new(name)?;
        inner.bind_interface()?;
        Self::with_descriptor(inner)
    }

    /// Wrap an existing descriptor.
    ///
    /// The socket needs to already be bound to the interface otherwise errors to all calls will be
    /// the consequence.
    pub fn with_descriptor(inner: RawSocketDesc) -> Result<Self> {
        let if_index = inner.interface_index()?;
        Ok(RawSocket {
            inner,
            if_index,
            mode: AtomicU8::new(RecvMode::default().bits()),
            promiscuous: Mutex::new(false),
        })
    }

    /// Query the interface MTU.
    pub fn interface_mtu(&self) -> Result<usize> {
        Ok(self.inner.interface_mtu()?)
    }

    fn accepts(&self, pkttype: u8) -> bool {
        let wanted = match pkttype {
            PACKET_HOST => RecvMode::HOST,
            PACKET_BROADCAST => RecvMode::BROADCAST,
            PACKET_MULTICAST => RecvMode::MULTICAST,
            PACKET_OTHERHOST => RecvMode::OTHER,
            PACKET_OUTGOING => RecvMode::OUTGOING,
            _ => return false,
        };
        RecvMode::from_bits(self.mode.load(Ordering::Relaxed)).contains(wanted)
    }

    fn set_promiscuous(&self, enable: bool) -> Result<()> {
        let mut promiscuous = match self.promiscuous.lock() {
            Ok(promiscuous) => promiscuous,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *promiscuous == enable {
            return Ok(());
        }
        let option = if enable { PACKET_ADD_MEMBERSHIP } else { PACKET_DROP_MEMBERSHIP };
        self.inner.membership(self.if_index, option)?;
        *promiscuous = enable;
        Ok(())
    }
}

impl Endpoint for RawSocket {
    fn send(&self, iov: &[IoSlice]) -> Result<usize> {
        match self.inner.send(iov) {
            Ok(len) => Ok(len),
            // The socket is non-blocking, a full send buffer is retried by the caller.
            Err(Errno(libc::EAGAIN)) => Err(Error::NoBuffer),
            Err(err) => Err(err.into()),
        }
    }

    fn recv_open(&self, mode: RecvMode) -> Result<()> {
        self.mode.store(mode.bits(), Ordering::Relaxed);
        self.set_promiscuous(!mode.contains(RecvMode::NO_PROMISC))
    }

    fn recv(&self, timeout: Duration, buf: &mut [u8]) -> Result<Option<usize>> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if !wait(self.as_raw_fd(), left)? {
                if left == Duration::from_micros(0) {
                    return Ok(None);
                }
                continue;
            }

            match self.inner.recv(buf) {
                Ok((len, pkttype)) if self.accepts(pkttype) => return Ok(Some(len)),
                Ok((_, pkttype)) => tracing::trace!(pkttype, "frame filtered by receive mode"),
                Err(Errno(libc::EAGAIN)) => (),
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn recv_close(&self) -> Result<()> {
        self.set_promiscuous(false)
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        if let Err(err) = self.set_promiscuous(false) {
            tracing::warn!(%err, "failed to leave promiscuous mode");
        }
    }
}
