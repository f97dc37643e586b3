//! Time ordered send queues with a sender thread each.
//!
//! Entries are kept sorted by their scheduled send time. The head (index `0`) holds the latest
//! entry and the tail the earliest, which is the one sent next. Entries with equal times leave
//! in the order they were enqueued.
//!
//! The sender thread sleeps until the tail is due, or until the byte-rate budget of a bandwidth
//! limited queue allows the next write. An enqueue that produces a new tail wakes it early.
use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::nic::FrameWriter;
use crate::time::{Duration, Instant};
use crate::{Error, Result};

/// One scheduled frame.
#[derive(Debug)]
struct Entry {
    at: Instant,
    frame: Vec<u8>,
}

#[derive(Debug)]
struct QueueState {
    /// Sorted by `at`, latest first.
    entries: VecDeque<Entry>,
    max_size: usize,
    /// Zero for an unlimited queue.
    bandwidth: u64,
    next_send_allowed: Instant,
    sent: u64,
    failed: u64,
}

enum Msg {
    Wake,
    Exit,
}

enum Step {
    Send(Entry),
    Wait(Option<Duration>),
}

/// A send queue and its sender thread.
///
/// Dropping the queue stops the sender after the frame it is currently writing and discards
/// all entries still queued.
pub struct SendQueue {
    name: String,
    state: Arc<Mutex<QueueState>>,
    wake: Mutex<mpsc::Sender<Msg>>,
    thread: Option<JoinHandle<()>>,
}

impl QueueState {
    /// Insert after all entries with an earlier or equal time.
    ///
    /// Returns whether the entry became the new tail.
    fn insert(&mut self, entry: Entry) -> bool {
        match self.entries.iter().position(|other| other.at <= entry.at) {
            Some(idx) => {
                self.entries.insert(idx, entry);
                idx + 1 == self.entries.len()
            },
            None => {
                self.entries.push_back(entry);
                true
            },
        }
    }

    fn next_step(&mut self, now: Instant) -> Step {
        let due = match self.entries.back() {
            None => return Step::Wait(None),
            Some(tail) => tail.at,
        };

        if self.bandwidth > 0 && now < self.next_send_allowed {
            return Step::Wait(Some(self.next_send_allowed - now));
        }
        if now < due {
            return Step::Wait(Some(due - now));
        }

        match self.entries.pop_back() {
            Some(entry) => Step::Send(entry),
            None => Step::Wait(None),
        }
    }

    fn account(&mut self, len: usize, now: Instant) {
        if self.bandwidth > 0 {
            let micros = len as u64 * 1_000_000 / self.bandwidth;
            self.next_send_allowed = now + Duration::from_micros(micros);
        }
    }
}

impl SendQueue {
    /// Create a queue writing to `writer` and start its sender.
    ///
    /// A `bandwidth` of zero does not limit the rate, otherwise it is in bytes per second.
    pub fn new(name: &str, writer: Box<dyn FrameWriter>, max_size: usize, bandwidth: u64)
        -> Result<Self>
    {
        if max_size == 0 {
            return Err(Error::invalid("send queue without room for any frame"));
        }

        let state = Arc::new(Mutex::new(QueueState {
            entries: VecDeque::new(),
            max_size,
            bandwidth,
            next_send_allowed: Instant::from_micros(0),
            sent: 0,
            failed: 0,
        }));
        let (tx, rx) = mpsc::channel();

        let sender = Sender {
            name: name.to_owned(),
            state: Arc::clone(&state),
            wake: rx,
            writer,
        };
        let thread = thread::Builder::new()
            .name(format!("sendq-{}", name))
            .spawn(move || sender.run())?;

        tracing::debug!(sendq = name, max_size, bandwidth, "send queue created");
        Ok(SendQueue {
            name: name.to_owned(),
            state,
            wake: Mutex::new(tx),
            thread: Some(thread),
        })
    }

    /// The name of this queue.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schedule a frame to be sent at `at`.
    ///
    /// Fails with `NoBuffer` when the queue holds its maximum number of entries.
    pub fn enqueue(&self, frame: Vec<u8>, at: Instant) -> Result<()> {
        let is_tail = {
            let mut state = self.lock();
            if state.entries.len() >= state.max_size {
                return Err(Error::NoBuffer);
            }
            state.insert(Entry { at, frame })
        };

        if is_tail {
            self.post(Msg::Wake);
        }
        Ok(())
    }

    /// The number of queued entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether no entries are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The scheduled times of all entries, from head to tail.
    pub fn times(&self) -> Vec<Instant> {
        self.lock().entries.iter().map(|entry| entry.at).collect()
    }

    /// The number of frames written successfully.
    pub fn sent_count(&self) -> u64 {
        self.lock().sent
    }

    /// The number of frames the writer failed on.
    pub fn failed_count(&self) -> u64 {
        self.lock().failed
    }

    /// Change the byte-rate budget, zero disables it.
    pub fn set_bandwidth(&self, bandwidth: u64) {
        self.lock().bandwidth = bandwidth;
        self.post(Msg::Wake);
    }

    fn lock(&self) -> MutexGuard<QueueState> {
        lock(&self.state)
    }

    fn post(&self, msg: Msg) {
        let wake = match self.wake.lock() {
            Ok(wake) => wake,
            Err(poisoned) => poisoned.into_inner(),
        };
        // The sender only hangs up on exit.
        let _ = wake.send(msg);
    }
}

impl Drop for SendQueue {
    fn drop(&mut self) {
        self.post(Msg::Exit);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(sendq = %self.name, "sender thread panicked");
            }
        }

        let dropped = self.lock().entries.drain(..).count();
        if dropped > 0 {
            tracing::info!(sendq = %self.name, dropped, "discarded queued frames");
        }
    }
}

fn lock(state: &Mutex<QueueState>) -> MutexGuard<QueueState> {
    match state.lock() {
        Ok(state) => state,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Sender {
    name: String,
    state: Arc<Mutex<QueueState>>,
    wake: mpsc::Receiver<Msg>,
    writer: Box<dyn FrameWriter>,
}

impl Sender {
    fn run(mut self) {
        loop {
            let step = lock(&self.state).next_step(Instant::now());
            let msg = match step {
                Step::Send(entry) => {
                    self.write(entry);
                    continue;
                },
                Step::Wait(None) => self.wake.recv().map_err(|_| mpsc::RecvTimeoutError::Disconnected),
                Step::Wait(Some(timeout)) => self.wake.recv_timeout(timeout),
            };

            match msg {
                Ok(Msg::Wake) | Err(mpsc::RecvTimeoutError::Timeout) => (),
                Ok(Msg::Exit) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::trace!(sendq = %self.name, "sender exiting");
    }

    fn write(&mut self, entry: Entry) {
        let result = self.writer.write_frame(&entry.frame);
        let now = Instant::now();
        let mut state = lock(&self.state);
        match result {
            Ok(()) => state.sent += 1,
            Err(err) => {
                state.failed += 1;
                tracing::warn!(sendq = %self.name, %err, len = entry.frame.len(), "write failed");
            },
        }
        state.account(entry.frame.len(), now);
    }
}
