//! Endpoints that frames are written to and read from.
//!
//! An [`Endpoint`] is the read/write access of a CSAP to some link: a raw socket on an interface,
//! or the in-memory [`Loopback`] that tests and the command line use. The engine only ever hands
//! it complete frames, as an I/O vector with one entry per packet segment, and receives single
//! frames into a caller provided buffer.
//!
//! [`Endpoint`]: trait.Endpoint.html
//! [`Loopback`]: loopback/struct.Loopback.html
use core::ops;
use std::io::IoSlice;
use std::thread;

use rand::Rng;

use crate::packet::Packet;
use crate::time::Duration;
use crate::{Error, Result};

pub mod loopback;

#[cfg(all(feature = "sys", target_os = "linux"))]
#[path="sys/mod.rs"]
mod sys_internal;

#[cfg(all(feature = "sys", target_os = "linux"))]
pub use self::sys_internal::exports as sys;

pub use self::loopback::Loopback;

/// The kinds of frames a receiving endpoint delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecvMode(u8);

impl RecvMode {
    /// Frames addressed to this host.
    pub const HOST: RecvMode = RecvMode(0x01);
    /// Broadcast frames.
    pub const BROADCAST: RecvMode = RecvMode(0x02);
    /// Multicast frames.
    pub const MULTICAST: RecvMode = RecvMode(0x04);
    /// Frames addressed to other hosts.
    pub const OTHER: RecvMode = RecvMode(0x08);
    /// Frames sent by this host.
    pub const OUTGOING: RecvMode = RecvMode(0x10);
    /// Do not switch the interface into promiscuous mode.
    pub const NO_PROMISC: RecvMode = RecvMode(0x20);

    /// No frames at all.
    pub const fn empty() -> Self {
        RecvMode(0)
    }

    /// All incoming frames, the default.
    pub const fn incoming() -> Self {
        RecvMode(0x0f)
    }

    /// Query whether all bits of `other` are set.
    pub fn contains(self, other: RecvMode) -> bool {
        self.0 & other.0 == other.0
    }

    /// The raw bits.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Reconstruct a mode from its raw bits.
    pub fn from_bits(bits: u8) -> Self {
        RecvMode(bits & 0x3f)
    }
}

impl Default for RecvMode {
    fn default() -> Self {
        RecvMode::incoming()
    }
}

impl ops::BitOr for RecvMode {
    type Output = RecvMode;

    fn bitor(self, rhs: RecvMode) -> RecvMode {
        RecvMode(self.0 | rhs.0)
    }
}

/// The read/write access of a CSAP.
///
/// Opening the endpoint is its constructor and closing it is `Drop`. A receiving CSAP reads on
/// its own thread while another one may write, so all methods take a shared reference.
pub trait Endpoint: Send + Sync {
    /// Prepare for a batch of sends.
    fn send_open(&self) -> Result<()> {
        Ok(())
    }

    /// Write one frame given as an I/O vector.
    ///
    /// Fails with `NoBuffer` when the frame can not be queued right now, the caller may retry.
    fn send(&self, iov: &[IoSlice]) -> Result<usize>;

    /// Finish a batch of sends.
    fn send_close(&self) -> Result<()> {
        Ok(())
    }

    /// Prepare for receiving the frames selected by `mode`.
    fn recv_open(&self, mode: RecvMode) -> Result<()>;

    /// Receive one frame into `buf`, waiting at most `timeout`.
    ///
    /// Returns `None` when no frame arrived in time. A frame longer than `buf` is truncated.
    fn recv(&self, timeout: Duration, buf: &mut [u8]) -> Result<Option<usize>>;

    /// Stop receiving.
    fn recv_close(&self) -> Result<()> {
        Ok(())
    }
}

/// Something a send queue writes single frames to.
pub trait FrameWriter: Send {
    /// Write one complete frame.
    fn write_frame(&mut self, frame: &[u8]) -> Result<()>;
}

/// Wrapper implementing the handler traits for a closure.
///
/// ```
/// use tad::nic::{FnHandler, FrameWriter};
/// let mut count = 0;
/// let mut writer = FnHandler(|frame: &[u8]| { count += frame.len(); Ok(()) });
/// writer.write_frame(&[0; 60]).unwrap();
/// ```
pub struct FnHandler<F>(pub F);

impl<F> FrameWriter for FnHandler<F>
    where F: FnMut(&[u8]) -> Result<()> + Send
{
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        (self.0)(frame)
    }
}

impl<E: Endpoint + ?Sized> FrameWriter for Box<E> {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.send(&[IoSlice::new(frame)]).map(drop)
    }
}

/// Bounds of the retries of a write that found the endpoint out of buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    /// Number of retries after the first attempt.
    pub attempts: u32,
    /// Upper bound of the randomized sleep before each retry.
    pub backoff_max: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Retry { attempts: 3, backoff_max: Duration::from_micros(1000) }
    }
}

/// Write a packet, retrying while the endpoint reports `NoBuffer`.
pub fn write_with_retry(endpoint: &dyn Endpoint, packet: &Packet, retry: Retry) -> Result<usize> {
    let mut iov = vec![IoSlice::new(&[]); packet.seg_count()];
    let count = packet.segs_to_iov(&mut iov)?;
    send_with_retry(endpoint, &iov[..count], retry)
}

/// Write one frame given as an I/O vector, retrying while the endpoint reports `NoBuffer`.
///
/// Each retry sleeps a random time of at most `retry.backoff_max` first.
pub fn send_with_retry(endpoint: &dyn Endpoint, iov: &[IoSlice], retry: Retry) -> Result<usize> {
    let mut attempt = 0;
    loop {
        match endpoint.send(iov) {
            Err(Error::NoBuffer) if attempt < retry.attempts => {
                attempt += 1;
                let max = retry.backoff_max.as_micros() as u64;
                let backoff = if max == 0 { 0 } else { rand::thread_rng().gen_range(0..=max) };
                tracing::debug!(attempt, backoff_us = backoff, "endpoint out of buffers, retrying");
                thread::sleep(Duration::from_micros(backoff));
            },
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recv_modes() {
        let mode = RecvMode::HOST | RecvMode::BROADCAST;
        assert!(mode.contains(RecvMode::HOST));
        assert!(!mode.contains(RecvMode::OTHER));
        assert!(RecvMode::default().contains(RecvMode::MULTICAST | RecvMode::OTHER));
        assert!(!RecvMode::default().contains(RecvMode::OUTGOING));
        assert_eq!(RecvMode::empty().bits(), 0);
    }

    #[test]
    fn retries_are_bounded() {
        let lo = Loopback::new();
        lo.fail_next_sends(2);
        let packet = Packet::from_vec(vec![1, 2, 3]);
        let retry = Retry { attempts: 2, backoff_max: Duration::from_micros(10) };
        assert_eq!(write_with_retry(&lo, &packet, retry), Ok(3));
        assert_eq!(lo.sent(), [vec![1, 2, 3]]);

        lo.fail_next_sends(3);
        assert_eq!(write_with_retry(&lo, &packet, retry), Err(Error::NoBuffer));
        assert_eq!(lo.sent().len(), 1);
    }
}
