//! Communication service access points.
//!
//! A CSAP couples a [`Stack`] of layers with an [`Endpoint`]. Sending turns a template into
//! frames and writes them, directly or through an attached send queue. Receiving runs a reader
//! thread that matches every captured frame against a pattern and collects the results.
//!
//! The CSAP is a small state machine. Sending and receiving both start from `Idle` and return
//! there; a receive operation ends at its deadline, after a number of matches, or when stopped.
//! A stop request is observed between frames, within one poll interval of the endpoint. An
//! endpoint failure leaves the CSAP in the terminal `Error` state.
//!
//! [`Stack`]: ../stack/struct.Stack.html
//! [`Endpoint`]: ../nic/trait.Endpoint.html
use core::fmt;
use std::collections::VecDeque;
use std::io::IoSlice;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};

use bytes::Bytes;

use crate::config::RuntimeConfig;
use crate::du::Evaluator;
use crate::layer::Pdu;
use crate::log::Level;
use crate::layer::tcp::flood;
use crate::nds::{Node, Pattern, Template};
use crate::nic::{self, Endpoint, FrameWriter, RecvMode, Retry};
use crate::sendq::SendQueue;
use crate::stack::Stack;
use crate::time::{Duration, Instant};
use crate::{Error, Result};

/// Identifier of a CSAP within its runtime.
pub type CsapId = u32;

/// The state of a CSAP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Ready for an operation.
    Idle,
    /// A send operation is in progress.
    Sending,
    /// A receive operation is in progress.
    Receiving,
    /// A receive operation was asked to stop.
    StopRequested,
    /// The endpoint failed, no further operations are possible.
    Error,
}

/// A frame that matched the pattern of a receive operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecvResult {
    /// Index of the matching pattern unit.
    pub unit: usize,
    /// The parsed PDUs, top-most first.
    pub pdus: Vec<Node>,
    /// What remains above the top-most layer.
    pub payload: Bytes,
    /// When the frame was captured.
    pub timestamp: Instant,
}

/// Parameters of a receive operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecvOptions {
    /// Stop receiving after this long, or never.
    pub timeout: Option<Duration>,
    /// Keep the matched results, otherwise they are only counted.
    pub want_results: bool,
    /// Stop after this number of matches.
    pub max_packets: Option<usize>,
    /// The frames the endpoint delivers.
    pub mode: RecvMode,
}

impl Default for RecvOptions {
    fn default() -> Self {
        RecvOptions {
            timeout: None,
            want_results: true,
            max_packets: None,
            mode: RecvMode::default(),
        }
    }
}

/// A communication service access point.
///
/// Dropping it stops a running receive operation.
pub struct Csap {
    inner: Arc<Inner>,
}

struct Inner {
    id: CsapId,
    state: Mutex<CsapState>,
    changed: Condvar,
    stack: Mutex<Stack>,
    endpoint: Box<dyn Endpoint>,
    evaluator: Option<Arc<dyn Evaluator>>,
    config: RuntimeConfig,
}

struct CsapState {
    status: Status,
    results: VecDeque<RecvResult>,
    matched: usize,
    last_error: Option<Error>,
    reader: Option<JoinHandle<()>>,
    sendq: Option<Arc<SendQueue>>,
}

/// Writes frames through the endpoint of a CSAP, for use by a send queue.
///
/// Holds the CSAP weakly, writes fail with `NotFound` once it is gone.
pub struct CsapWriter {
    id: CsapId,
    inner: Weak<Inner>,
}

impl CsapState {
    /// The matched count, or the error of a failed CSAP.
    fn outcome(&self) -> Result<usize> {
        match self.status {
            Status::Error => Err(self.last_error.clone().unwrap_or(Error::Fatal("failed without error"))),
            _ => Ok(self.matched),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Status::Idle => "idle",
            Status::Sending => "sending",
            Status::Receiving => "receiving",
            Status::StopRequested => "stopping",
            Status::Error => "failed",
        };
        f.write_str(name)
    }
}

impl Csap {
    /// Create a CSAP from its layer descriptions, top-most first.
    pub fn new(
        id: CsapId,
        descs: &[Node],
        endpoint: Box<dyn Endpoint>,
        evaluator: Option<Arc<dyn Evaluator>>,
        config: RuntimeConfig,
    ) -> Result<Self> {
        let stack = Stack::new(descs)?;
        let user = format!("csap {}", id);
        crate::tad_log!(Level::Ring, &user, "created with {} layers", stack.depth());

        Ok(Csap {
            inner: Arc::new(Inner {
                id,
                state: Mutex::new(CsapState {
                    status: Status::Idle,
                    results: VecDeque::new(),
                    matched: 0,
                    last_error: None,
                    reader: None,
                    sendq: None,
                }),
                changed: Condvar::new(),
                stack: Mutex::new(stack),
                endpoint,
                evaluator,
                config,
            }),
        })
    }

    /// The identifier of this CSAP.
    pub fn id(&self) -> CsapId {
        self.inner.id
    }

    /// The current state.
    pub fn status(&self) -> Status {
        self.inner.lock().status
    }

    /// The last error of the latest receive operation.
    ///
    /// Errors of single frames do not end a receive operation, only the last one is kept.
    pub fn last_error(&self) -> Option<Error> {
        self.inner.lock().last_error.clone()
    }

    /// Route sent frames through a send queue, or write them directly again.
    pub fn attach_sendq(&self, sendq: Option<Arc<SendQueue>>) {
        self.inner.lock().sendq = sendq;
    }

    /// A writer for the endpoint of this CSAP.
    pub fn writer(&self) -> CsapWriter {
        CsapWriter { id: self.inner.id, inner: Arc::downgrade(&self.inner) }
    }

    /// Build the frames of a template and send them.
    ///
    /// Returns the number of frames sent.
    pub fn send(&self, template: &Template) -> Result<usize> {
        self.inner.begin_send()?;
        let result = self.inner.send_template(template);
        self.inner.end_send(result)
    }

    /// Send `count` TCP segments that differ only in their sequence number.
    ///
    /// The template is built once. Each further segment advances the sequence number by the
    /// payload length and patches the checksum, the result equals a freshly built segment.
    pub fn tcp_flood(&self, template: &Template, count: usize) -> Result<usize> {
        self.inner.begin_send()?;
        let result = self.inner.flood(template, count);
        self.inner.end_send(result)
    }

    /// Start a receive operation on the reader thread.
    pub fn recv_start(&self, pattern: &Pattern, options: RecvOptions) -> Result<()> {
        let mut state = self.inner.lock();
        if state.status != Status::Idle {
            return Err(Error::invalid(format!("receive on a {} CSAP", state.status)));
        }

        let units = self.inner.stack().confirm_ptrn(pattern)?;
        if let Err(err) = self.inner.endpoint.recv_open(options.mode) {
            self.inner.stack().release_units(units);
            return Err(err);
        }
        // The handle of an earlier operation that ended by itself.
        if let Some(reader) = state.reader.take() {
            join_reader(self.inner.id, reader);
        }

        state.status = Status::Receiving;
        state.results.clear();
        state.matched = 0;
        state.last_error = None;

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(format!("csap-{}-recv", self.inner.id))
            .spawn(move || inner.receive(units, options));
        match spawned {
            Ok(reader) => {
                state.reader = Some(reader);
                tracing::debug!(csap = self.inner.id, "receive started");
                Ok(())
            },
            Err(err) => {
                state.status = Status::Idle;
                Err(err.into())
            },
        }
    }

    /// Stop a receive operation and wait for the reader.
    ///
    /// Returns the number of matched frames. Stopping an idle CSAP is not an error, a failed one
    /// returns the error it failed with.
    pub fn stop(&self) -> Result<usize> {
        let reader = {
            let mut state = self.inner.lock();
            if state.status == Status::Receiving {
                state.status = Status::StopRequested;
            }
            state.reader.take()
        };
        if let Some(reader) = reader {
            join_reader(self.inner.id, reader);
        }
        self.inner.lock().outcome()
    }

    /// Wait until the receive operation ends by itself.
    ///
    /// Returns the number of matched frames, fails with `Timeout` if it is still running after
    /// `timeout` and with the error that ended it if the endpoint failed.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<usize> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.inner.lock();
        while matches!(state.status, Status::Receiving | Status::StopRequested) {
            state = match deadline {
                None => self.inner.changed.wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left == Duration::from_micros(0) {
                        return Err(Error::Timeout);
                    }
                    self.inner.changed.wait_timeout(state, left)
                        .map(|(state, _)| state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0)
                },
            };
        }

        let reader = state.reader.take();
        let outcome = state.outcome();
        drop(state);
        if let Some(reader) = reader {
            join_reader(self.inner.id, reader);
        }
        outcome
    }

    /// Take all results collected so far, in capture order.
    pub fn poll_results(&self) -> Vec<RecvResult> {
        self.inner.lock().results.drain(..).collect()
    }

    /// Send a template and wait for the first frame matching a pattern.
    ///
    /// The receive operation starts before the frames are sent so that an immediate answer is
    /// not missed. Fails with `Timeout` when nothing matched in time.
    pub fn write_read(&self, template: &Template, pattern: &Pattern, timeout: Duration)
        -> Result<RecvResult>
    {
        self.recv_start(pattern, RecvOptions {
            timeout: Some(timeout),
            want_results: true,
            max_packets: Some(1),
            mode: RecvMode::default(),
        })?;

        if let Err(err) = self.inner.send_template(template) {
            self.stop()?;
            if err.is_terminal() {
                self.inner.fail(err.clone());
            }
            return Err(err);
        }

        self.wait(None)?;
        self.poll_results().into_iter().next().ok_or(Error::Timeout)
    }
}

impl Drop for Csap {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(csap = self.inner.id, %err, "failed to stop on destroy");
        }
        tracing::debug!(csap = self.inner.id, "destroyed");
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<CsapState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stack(&self) -> MutexGuard<Stack> {
        self.stack.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn retry(&self) -> Retry {
        Retry {
            attempts: self.config.write_retries,
            backoff_max: Duration::from_micros(self.config.write_backoff_max_us),
        }
    }

    fn user(&self) -> String {
        format!("csap {}", self.id)
    }

    fn begin_send(&self) -> Result<()> {
        let mut state = self.lock();
        if state.status != Status::Idle {
            return Err(Error::invalid(format!("send on a {} CSAP", state.status)));
        }
        state.status = Status::Sending;
        Ok(())
    }

    /// Leave the `Sending` state, for the terminal `Error` state if the endpoint failed.
    fn end_send(&self, result: Result<usize>) -> Result<usize> {
        match &result {
            Err(err) if err.is_terminal() => self.fail(err.clone()),
            _ => {
                let mut state = self.lock();
                if state.status == Status::Sending {
                    state.status = Status::Idle;
                }
                self.changed.notify_all();
            },
        }
        result
    }

    fn fail(&self, err: Error) {
        crate::tad_log!(Level::Error, &self.user(), "failed: {}", err.to_string().as_str());
        let mut state = self.lock();
        state.last_error = Some(err);
        state.status = Status::Error;
        self.changed.notify_all();
    }

    fn send_template(&self, template: &Template) -> Result<usize> {
        let packets = self.stack().build(template, self.evaluator.as_deref())?;
        let sendq = self.lock().sendq.clone();

        match sendq {
            Some(sendq) => {
                let now = Instant::now();
                for packet in &packets {
                    sendq.enqueue(packet.to_vec(), now)?;
                }
            },
            None => {
                self.endpoint.send_open()?;
                let retry = self.retry();
                let written = packets.iter()
                    .try_for_each(|packet| nic::write_with_retry(&*self.endpoint, packet, retry).map(drop));
                self.endpoint.send_close()?;
                written?;
            },
        }

        crate::tad_log!(Level::Verb, &self.user(), "sent {} packets", packets.len());
        Ok(packets.len())
    }

    fn flood(&self, template: &Template, count: usize) -> Result<usize> {
        let mut packets = self.stack().build(template, self.evaluator.as_deref())?;
        if packets.len() != 1 {
            return Err(Error::invalid(format!("flood template yields {} packets", packets.len())));
        }
        let packet = packets.remove(0);
        let offset = packet.mark()
            .ok_or_else(|| Error::invalid("flood needs a TCP layer"))?;
        let payload_len = template.payload_bytes().len() as u32;
        let mut frame = packet.to_vec();
        let sendq = self.lock().sendq.clone();

        let retry = self.retry();
        let advance = |frame: &mut Vec<u8>, idx: usize| match idx {
            0 => Ok(()),
            _ => flood::advance(frame, offset, payload_len).map(drop),
        };
        match sendq {
            Some(sendq) => {
                for idx in 0..count {
                    advance(&mut frame, idx)?;
                    sendq.enqueue(frame.clone(), Instant::now())?;
                }
            },
            None => {
                self.endpoint.send_open()?;
                let written = (0..count).try_for_each(|idx| {
                    advance(&mut frame, idx)?;
                    nic::send_with_retry(&*self.endpoint, &[IoSlice::new(&frame)], retry).map(drop)
                });
                self.endpoint.send_close()?;
                written?;
            },
        }

        crate::tad_log!(Level::Ring, &self.user(), "flooded {} TCP segments", count);
        Ok(count)
    }

    fn stop_requested(&self) -> bool {
        self.lock().status == Status::StopRequested
    }

    /// The body of the reader thread.
    fn receive(self: Arc<Self>, units: Vec<Vec<Pdu>>, options: RecvOptions) {
        let outcome = self.receive_loop(&units, &options);

        if let Err(err) = self.endpoint.recv_close() {
            tracing::warn!(csap = self.id, %err, "failed to close receive");
        }
        self.stack().release_units(units);

        match outcome {
            Ok(()) => {
                let mut state = self.lock();
                state.status = Status::Idle;
                self.changed.notify_all();
            },
            Err(err) => self.fail(err),
        }
        crate::tad_log!(Level::Ring, &self.user(), "receive done, {} matched", self.lock().matched);
    }

    fn receive_loop(&self, units: &[Vec<Pdu>], options: &RecvOptions) -> Result<()> {
        let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
        let poll = Duration::from_millis(self.config.recv_poll_interval_ms);
        let mut buf = vec![0; self.config.recv_buffer_len];
        let mut matched = 0;
        let mut frame_seq = 0u64;

        loop {
            if self.stop_requested() {
                return Ok(());
            }
            if options.max_packets.map_or(false, |max| matched >= max) {
                return Ok(());
            }
            let wait = match deadline {
                None => poll,
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left == Duration::from_micros(0) {
                        return Ok(());
                    }
                    left.min(poll)
                },
            };

            let len = match self.endpoint.recv(wait, &mut buf) {
                Ok(Some(len)) => len,
                Ok(None) | Err(Error::Timeout) => continue,
                Err(err) => return Err(err),
            };
            let timestamp = Instant::now();
            let frame = Bytes::copy_from_slice(&buf[..len]);
            let seq = frame_seq;
            frame_seq += 1;

            let result = self.stack().match_frame(units, frame, seq, self.evaluator.as_deref());
            match result {
                Ok(Some(found)) => {
                    matched += 1;
                    let mut state = self.lock();
                    state.matched += 1;
                    if options.want_results {
                        state.results.push_back(RecvResult {
                            unit: found.unit,
                            pdus: found.pdus,
                            payload: found.payload,
                            timestamp,
                        });
                    }
                    self.changed.notify_all();
                },
                Ok(None) => (),
                Err(err) if err.is_terminal() => return Err(err),
                Err(err) => {
                    tracing::debug!(csap = self.id, %err, len, "frame skipped");
                    self.lock().last_error = Some(err);
                },
            }
        }
    }
}

fn join_reader(id: CsapId, reader: JoinHandle<()>) {
    if reader.join().is_err() {
        tracing::error!(csap = id, "reader thread panicked");
    }
}

impl FrameWriter for CsapWriter {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let inner = self.inner.upgrade()
            .ok_or_else(|| Error::NotFound(format!("csap {}", self.id)))?;
        nic::send_with_retry(&*inner.endpoint, &[IoSlice::new(frame)], inner.retry()).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nds::Payload;
    use crate::nic::Loopback;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn udp_desc(local: u16, remote: u16) -> Vec<Node> {
        vec![
            Node::choice("udp", Node::structure(vec![
                ("local-port", Node::Int(local.into())),
                ("remote-port", Node::Int(remote.into())),
            ])),
            Node::choice("ip4", Node::structure(vec![
                ("local-addr", Node::Bytes(vec![10, 0, 0, 1])),
                ("remote-addr", Node::Bytes(vec![10, 0, 0, 1])),
            ])),
        ]
    }

    fn open(lo: &Loopback, descs: &[Node]) -> Csap {
        let config = RuntimeConfig { recv_poll_interval_ms: 10, ..RuntimeConfig::default() };
        Csap::new(1, descs, Box::new(lo.clone()), None, config).unwrap()
    }

    /// An endpoint whose link went away.
    struct Unplugged;

    impl Endpoint for Unplugged {
        fn send(&self, _: &[IoSlice]) -> Result<usize> {
            Err(Error::Io(std::io::ErrorKind::BrokenPipe))
        }

        fn recv_open(&self, _: RecvMode) -> Result<()> {
            Ok(())
        }

        fn recv(&self, _: Duration, _: &mut [u8]) -> Result<Option<usize>> {
            Err(Error::Io(std::io::ErrorKind::BrokenPipe))
        }
    }

    fn unplugged() -> Csap {
        let config = RuntimeConfig { recv_poll_interval_ms: 10, ..RuntimeConfig::default() };
        Csap::new(1, &udp_desc(1000, 2000), Box::new(Unplugged), None, config).unwrap()
    }

    /// Counts frames and the send batches around them.
    #[derive(Default)]
    struct Batches {
        open: AtomicUsize,
        closed: AtomicUsize,
        frames: AtomicUsize,
    }

    struct Batched(Arc<Batches>);

    impl Endpoint for Batched {
        fn send_open(&self) -> Result<()> {
            self.0.open.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn send(&self, iov: &[IoSlice]) -> Result<usize> {
            if self.0.open.load(Ordering::SeqCst) == self.0.closed.load(Ordering::SeqCst) {
                return Err(Error::Fatal("send outside a batch"));
            }
            self.0.frames.fetch_add(1, Ordering::SeqCst);
            Ok(iov.iter().map(|slice| slice.len()).sum())
        }

        fn send_close(&self) -> Result<()> {
            self.0.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn recv_open(&self, _: RecvMode) -> Result<()> {
            Ok(())
        }

        fn recv(&self, _: Duration, _: &mut [u8]) -> Result<Option<usize>> {
            Ok(None)
        }
    }

    fn payload(bytes: &[u8]) -> Template {
        Template::new(vec![]).with_payload(Payload::Bytes(bytes.to_vec()))
    }

    #[test]
    fn send_writes_frames() {
        let lo = Loopback::new();
        let csap = open(&lo, &udp_desc(1000, 2000));
        assert_eq!(csap.send(&payload(b"ping")).unwrap(), 1);
        let sent = lo.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), 32);
        assert_eq!(csap.status(), Status::Idle);
    }

    #[test]
    fn flood_sends_one_batch() {
        let batches = Arc::new(Batches::default());
        let descs = [
            Node::choice("tcp", Node::structure(vec![
                ("local-port", Node::Int(49152)),
                ("remote-port", Node::Int(80)),
            ])),
            Node::choice("ip4", Node::structure(vec![
                ("local-addr", Node::Bytes(vec![10, 0, 0, 1])),
                ("remote-addr", Node::Bytes(vec![10, 0, 0, 2])),
            ])),
        ];
        let csap = Csap::new(1, &descs, Box::new(Batched(Arc::clone(&batches))), None, RuntimeConfig::default())
            .unwrap();
        let segment = Template::new(vec![
            Node::choice("tcp", Node::structure(vec![("flags", Node::Int(0x18))])),
        ]).with_payload(Payload::Bytes(b"data".to_vec()));

        assert_eq!(csap.tcp_flood(&segment, 5).unwrap(), 5);
        assert_eq!(batches.frames.load(Ordering::SeqCst), 5);
        assert_eq!(batches.open.load(Ordering::SeqCst), 1);
        assert_eq!(batches.closed.load(Ordering::SeqCst), 1);
        assert_eq!(csap.status(), Status::Idle);
    }

    #[test]
    fn failed_send_is_terminal() {
        let csap = unplugged();
        let broken = Error::Io(std::io::ErrorKind::BrokenPipe);
        assert_eq!(csap.send(&payload(b"ping")), Err(broken.clone()));
        assert_eq!(csap.status(), Status::Error);
        assert_eq!(csap.last_error(), Some(broken.clone()));

        assert!(matches!(csap.send(&payload(b"ping")), Err(Error::Invalid(_))));
        assert!(matches!(csap.recv_start(&Pattern::single(vec![]), RecvOptions::default()), Err(Error::Invalid(_))));
        assert_eq!(csap.stop(), Err(broken));
    }

    #[test]
    fn failed_receive_is_terminal() {
        let csap = unplugged();
        let broken = Error::Io(std::io::ErrorKind::BrokenPipe);
        csap.recv_start(&Pattern::single(vec![]), RecvOptions {
            timeout: Some(Duration::from_secs(5)),
            ..RecvOptions::default()
        }).unwrap();

        assert_eq!(csap.wait(Some(Duration::from_secs(5))), Err(broken.clone()));
        assert_eq!(csap.status(), Status::Error);
        assert_eq!(csap.stop(), Err(broken));
        assert!(matches!(csap.send(&payload(b"ping")), Err(Error::Invalid(_))));
        assert!(matches!(csap.recv_start(&Pattern::single(vec![]), RecvOptions::default()), Err(Error::Invalid(_))));
    }

    #[test]
    fn receive_until_count() {
        let lo = Loopback::echoing();
        let csap = open(&lo, &udp_desc(1000, 1000));
        csap.recv_start(&Pattern::single(vec![]), RecvOptions {
            max_packets: Some(2),
            timeout: Some(Duration::from_secs(5)),
            ..RecvOptions::default()
        }).unwrap();
        assert_eq!(csap.status(), Status::Receiving);
        assert!(matches!(csap.send(&payload(b"x")), Err(Error::Invalid(_))));

        lo.inject(vec![0xff; 3]);
        let writer = Csap::new(2, &udp_desc(1000, 1000), Box::new(lo.clone()), None, RuntimeConfig::default())
            .unwrap();
        writer.send(&payload(b"one")).unwrap();
        writer.send(&payload(b"two")).unwrap();

        assert_eq!(csap.wait(Some(Duration::from_secs(5))).unwrap(), 2);
        let results = csap.poll_results();
        assert_eq!(results.len(), 2);
        assert_eq!(&results[0].payload[..], b"one");
        assert_eq!(&results[1].payload[..], b"two");
        assert!(results[0].timestamp <= results[1].timestamp);
        assert_eq!(csap.status(), Status::Idle);
    }

    #[test]
    fn stop_returns_count() {
        let lo = Loopback::new();
        let csap = open(&lo, &udp_desc(1000, 1000));
        csap.recv_start(&Pattern::single(vec![]), RecvOptions {
            want_results: false,
            ..RecvOptions::default()
        }).unwrap();

        let writer = Csap::new(2, &udp_desc(1000, 1000), Box::new(Loopback::new()), None, RuntimeConfig::default())
            .unwrap();
        writer.send(&payload(b"abc")).unwrap();

        assert_eq!(csap.stop().unwrap(), 0);
        assert_eq!(csap.status(), Status::Idle);
        assert!(csap.poll_results().is_empty());
    }

    #[test]
    fn timeout_ends_receive() {
        let lo = Loopback::new();
        let csap = open(&lo, &udp_desc(1000, 1000));
        csap.recv_start(&Pattern::single(vec![]), RecvOptions {
            timeout: Some(Duration::from_millis(30)),
            ..RecvOptions::default()
        }).unwrap();
        assert_eq!(csap.wait(Some(Duration::from_millis(1))), Err(Error::Timeout));
        assert_eq!(csap.wait(None).unwrap(), 0);
        assert_eq!(csap.status(), Status::Idle);
    }

    #[test]
    fn write_read_sees_the_echo() {
        let lo = Loopback::echoing();
        let csap = open(&lo, &udp_desc(1000, 1000));
        let result = csap.write_read(&payload(b"echo"), &Pattern::single(vec![]), Duration::from_secs(5))
            .unwrap();
        assert_eq!(&result.payload[..], b"echo");

        let lo = Loopback::new();
        let csap = open(&lo, &udp_desc(1000, 1000));
        let missed = csap.write_read(&payload(b"lost"), &Pattern::single(vec![]), Duration::from_millis(20));
        assert_eq!(missed, Err(Error::Timeout));
        assert_eq!(lo.sent().len(), 1);
    }

    #[test]
    fn sendq_routes_frames() {
        let lo = Loopback::new();
        let csap = open(&lo, &udp_desc(1000, 2000));
        let sendq = Arc::new(SendQueue::new("csap", Box::new(csap.writer()), 8, 0).unwrap());
        csap.attach_sendq(Some(Arc::clone(&sendq)));
        csap.send(&payload(b"queued")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while sendq.sent_count() == 0 {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(lo.sent().len(), 1);
        csap.attach_sendq(None);
    }
}
