#![allow(unsafe_code)]
// Copyright (C) 2016 whitequark@whitequark.org
// Copyright (C) 2019 Andreas Molzer <andreas.molzer@tum.de>
//
// in large parts from `smoltcp` originally distributed under 0-clause BSD
//
// Applies to files in this folder unless otherwise noted. These are:
// * `linux.rs`
// * `mod.rs`
// * `raw_socket.rs`
use std::io;
use std::os::unix::io::RawFd;

use crate::time::Duration;
use crate::Error;

mod linux;
mod raw_socket;

/// Module importing all types that should be exported.
///
/// Allows keeping all the `cfg` bits inside this module by enabling a controlled glob import from
/// the super module.
pub mod exports {
    pub use super::raw_socket::{RawSocket, RawSocketDesc};
    pub use super::wait as sys_wait;
    pub use super::Errno;
}

/// Wait until given file descriptor becomes readable, but no longer than given timeout.
///
/// Returns whether the descriptor is readable.
pub fn wait(fd: RawFd, duration: Duration) -> Result<bool, Errno> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = duration.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

    let res = unsafe { libc::poll(&mut pollfd, 1, millis) };
    match FdResult(res).errno() {
        Ok(()) => Ok(res > 0),
        // Interrupted by a signal, the caller polls again.
        Err(Errno(libc::EINTR)) => Ok(false),
        Err(err) => Err(err),
    }
}

/// An errno value.
///
/// This is used as the error representation of raw libc calls. It can be converted into a
/// `std::io::Error`, where it will consequently have much more extensive error information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub libc::c_int);

#[derive(Clone, Copy)]
struct FdResult(pub libc::c_int);

#[derive(Clone, Copy)]
struct IoLenResult(pub libc::ssize_t);

type IoctlResult = FdResult;
#[allow(non_snake_case)] // Emulate type alias also importing constructor.
fn IoctlResult(val: libc::c_int) -> IoctlResult { FdResult(val) }

/// Base for an if ioctl request.
///
/// Contains the name of the interface.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
struct ifreq {
    ifr_name: [libc::c_char; libc::IF_NAMESIZE],
}

/// Trait for interpreting integer return values.
///
/// Failure signals may vary between:
/// * `-1`
/// * arbitrary negative values
/// * non-zero
trait LibcResult: Copy {
    fn is_fail(self) -> bool;

    fn errno(self) -> Result<(), Errno> {
        if self.is_fail() {
            Err(Errno::new())
        } else {
            Ok(())
        }
    }
}

impl Errno {
    /// The errno of the last failed call on this thread.
    pub fn new() -> Errno {
        Errno(unsafe { *libc::__errno_location() })
    }
}

impl LibcResult for FdResult {
    fn is_fail(self) -> bool {
        self.0 == -1
    }
}

impl LibcResult for IoLenResult {
    fn is_fail(self) -> bool {
        self.0 == -1
    }
}

impl From<Errno> for io::Error {
    fn from(err: Errno) -> io::Error {
        io::Error::from_raw_os_error(err.0 as i32)
    }
}

impl From<Errno> for Error {
    fn from(err: Errno) -> Error {
        match err.0 {
            libc::ENOBUFS => Error::NoBuffer,
            libc::EAGAIN => Error::Timeout,
            _ => io::Error::from(err).into(),
        }
    }
}

impl ifreq {
    fn new(name: &str) -> Result<Self, Errno> {
        let mut ifr_name = [0; libc::IF_NAMESIZE];
        // Leave room for the terminating zero.
        if name.len() >= ifr_name.len() {
            return Err(Errno(libc::ENAMETOOLONG));
        }

        for (i, byte) in name.as_bytes().iter().enumerate() {
            ifr_name[i] = *byte as libc::c_char
        }

        Ok(ifreq {
            ifr_name,
        })
    }
}
