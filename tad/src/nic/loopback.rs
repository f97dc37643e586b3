//! Implementation of a software loop-back endpoint.
use std::collections::VecDeque;
use std::io::IoSlice;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::time::{Duration, Instant};
use crate::{Error, Result};

use super::{Endpoint, RecvMode};

/// An in-memory endpoint.
///
/// Records every sent frame and delivers injected frames to the receiver. An echoing loop-back
/// also delivers its own sent frames. All clones share the same state so that a test can keep
/// one handle while a CSAP owns another.
#[derive(Clone, Default)]
pub struct Loopback {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    arrived: Condvar,
}

#[derive(Default)]
struct State {
    inbound: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    echo: bool,
    failing_sends: usize,
}

impl Loopback {
    /// Create a loop-back that only records sent frames.
    pub fn new() -> Self {
        Loopback::default()
    }

    /// Create a loop-back that receives its own sent frames.
    pub fn echoing() -> Self {
        let lo = Loopback::default();
        lo.lock().echo = true;
        lo
    }

    /// Queue a frame for the receiver.
    pub fn inject(&self, frame: impl Into<Vec<u8>>) {
        self.lock().inbound.push_back(frame.into());
        self.shared.arrived.notify_all();
    }

    /// A copy of all frames sent so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Remove and return all frames sent so far.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.lock().sent)
    }

    /// Fail the next `count` sends with `NoBuffer`.
    pub fn fail_next_sends(&self, count: usize) {
        self.lock().failing_sends = count;
    }

    fn lock(&self) -> MutexGuard<State> {
        // A panicking test thread must not hide the frames from the others.
        self.shared.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Endpoint for Loopback {
    fn send(&self, iov: &[IoSlice]) -> Result<usize> {
        let mut state = self.lock();
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(Error::NoBuffer);
        }

        let frame: Vec<u8> = iov.iter().flat_map(|slice| slice.iter().copied()).collect();
        let len = frame.len();
        if state.echo {
            state.inbound.push_back(frame.clone());
            self.shared.arrived.notify_all();
        }
        state.sent.push(frame);
        Ok(len)
    }

    fn recv_open(&self, _: RecvMode) -> Result<()> {
        Ok(())
    }

    fn recv(&self, timeout: Duration, buf: &mut [u8]) -> Result<Option<usize>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(frame) = state.inbound.pop_front() {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                return Ok(Some(len));
            }

            let left = deadline.saturating_duration_since(Instant::now());
            if left == Duration::from_micros(0) {
                return Ok(None);
            }
            state = match self.shared.arrived.wait_timeout(state, left) {
                Ok((state, _)) => state,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}
