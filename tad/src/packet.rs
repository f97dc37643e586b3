//! Scatter/gather packets.
//!
//! A [`Packet`] is an ordered list of [`Segment`]s. Layers add their headers by prepending a
//! segment and trailers by appending one, no existing segment is ever reallocated for this.
//! A segment either owns its octets, shares them with other packets as a fragment view or
//! aliases a static constant such as padding.
//!
//! Fragment views are reference counted through [`bytes::Bytes`]: creating the first view of an
//! owned segment converts its storage in place, without copying, and every view keeps the octets
//! alive until the last one is dropped. Writing into a shared or static segment copies it first,
//! so a view never observes modifications of another packet.
//!
//! [`Packet`]: struct.Packet.html
//! [`Segment`]: struct.Segment.html
use std::collections::VecDeque;
use std::fmt;
use std::io::IoSlice;

use bytes::Bytes;
use rand::RngCore;

use crate::{Error, Result};

/// Called once when a segment releases its storage.
pub type ReleaseFn = Box<dyn FnOnce() + Send>;

/// The octets of a segment.
pub enum Storage {
    /// No octets.
    Empty,
    /// Octets owned by the segment.
    Owned(Vec<u8>),
    /// A reference counted view, possibly shared with other packets.
    Shared(Bytes),
    /// Borrowed constant octets.
    Static(&'static [u8]),
}

/// One contiguous piece of a packet.
pub struct Segment {
    storage: Storage,
    release: Option<ReleaseFn>,
}

/// Side-channel of the ATM flow, attached to a packet for the bottom ATM layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AtmHint {
    /// The ATM user-to-user indication, set on the last cell of an AAL5 PDU.
    pub u2u: bool,
    /// Virtual path identifier override.
    pub vpi: Option<u16>,
    /// Virtual channel identifier override.
    pub vci: Option<u16>,
    /// The cell carries user data rather than OAM.
    pub user_data: bool,
}

/// What to do when a fragment view extends past the end of its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragPolicy {
    /// Fail.
    Error,
    /// Fill the missing octets with random data.
    Rand,
}

/// A packet made of segments.
#[derive(Default)]
pub struct Packet {
    segs: VecDeque<Segment>,
    mark: Option<usize>,
    hint: Option<AtmHint>,
}

impl Segment {
    /// A segment without octets.
    pub fn empty() -> Self {
        Segment { storage: Storage::Empty, release: None }
    }

    /// A segment owning its octets.
    pub fn owned(data: Vec<u8>) -> Self {
        Segment { storage: Storage::Owned(data), release: None }
    }

    /// A segment viewing shared octets.
    pub fn shared(data: Bytes) -> Self {
        Segment { storage: Storage::Shared(data), release: None }
    }

    /// A segment aliasing constant octets.
    pub fn from_static(data: &'static [u8]) -> Self {
        Segment { storage: Storage::Static(data), release: None }
    }

    /// Attach a function called when the storage is released.
    pub fn with_release(mut self, release: ReleaseFn) -> Self {
        self.release = Some(release);
        self
    }

    /// Install new storage, releasing the previous one.
    pub fn put_data(&mut self, storage: Storage, release: Option<ReleaseFn>) {
        self.release_storage();
        self.storage = storage;
        self.release = release;
    }

    /// The octets of the segment.
    pub fn as_slice(&self) -> &[u8] {
        match &self.storage {
            Storage::Empty => &[],
            Storage::Owned(data) => data,
            Storage::Shared(data) => data,
            Storage::Static(data) => data,
        }
    }

    /// The number of octets.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Query whether the segment has no octets.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Query whether the octets are owned exclusively.
    pub fn is_owned(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }

    /// Query whether the octets alias a constant.
    pub fn is_static(&self) -> bool {
        matches!(self.storage, Storage::Static(_))
    }

    /// Mutable access, copying shared or static octets first.
    pub fn make_mut(&mut self) -> &mut [u8] {
        if !self.is_owned() {
            let copy = self.as_slice().to_vec();
            self.storage = Storage::Owned(copy);
        }

        match &mut self.storage {
            Storage::Owned(data) => data,
            _ => &mut [],
        }
    }

    /// A reference counted handle to the octets.
    ///
    /// Owned octets are converted into shared storage in place.
    pub fn share(&mut self) -> Bytes {
        let bytes = match core::mem::replace(&mut self.storage, Storage::Empty) {
            Storage::Empty => Bytes::new(),
            Storage::Owned(data) => Bytes::from(data),
            Storage::Shared(data) => data,
            Storage::Static(data) => Bytes::from_static(data),
        };
        if !bytes.is_empty() {
            self.storage = Storage::Shared(bytes.clone());
        }
        bytes
    }

    fn release_storage(&mut self) {
        self.storage = Storage::Empty;
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        self.release_storage();
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.storage {
            Storage::Empty => "empty",
            Storage::Owned(_) => "owned",
            Storage::Shared(_) => "shared",
            Storage::Static(_) => "static",
        };
        f.debug_struct("Segment")
            .field("kind", &kind)
            .field("len", &self.len())
            .finish()
    }
}

impl Packet {
    /// An empty packet.
    pub fn new() -> Self {
        Packet::default()
    }

    /// A packet of one owned segment.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let mut packet = Packet::new();
        packet.append_seg(Segment::owned(data));
        packet
    }

    /// A packet of one shared segment.
    pub fn from_bytes(data: Bytes) -> Self {
        let mut packet = Packet::new();
        packet.append_seg(Segment::shared(data));
        packet
    }

    /// The total length, the sum of all segment lengths.
    pub fn len(&self) -> usize {
        self.segs.iter().map(Segment::len).sum()
    }

    /// Query whether the packet has no octets.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of segments.
    pub fn seg_count(&self) -> usize {
        self.segs.len()
    }

    /// The segments in order.
    pub fn segments(&self) -> impl Iterator<Item=&Segment> {
        self.segs.iter()
    }

    /// Add a segment at the end.
    pub fn append_seg(&mut self, seg: Segment) {
        self.segs.push_back(seg);
    }

    /// Add a segment at the front.
    ///
    /// Shifts the mark by the length of the segment.
    pub fn prepend_seg(&mut self, seg: Segment) {
        if let Some(mark) = &mut self.mark {
            *mark += seg.len();
        }
        self.segs.push_front(seg);
    }

    /// Insert a segment after the one at `idx`.
    pub fn insert_after(&mut self, idx: usize, seg: Segment) -> Result<()> {
        if idx >= self.segs.len() {
            return Err(Error::invalid(format!("no segment {}", idx)));
        }

        let before: usize = self.segs.iter().take(idx + 1).map(Segment::len).sum();
        if let Some(mark) = &mut self.mark {
            if *mark >= before {
                *mark += seg.len();
            }
        }
        self.segs.insert(idx + 1, seg);
        Ok(())
    }

    /// Install storage into the segment at `idx`, releasing what it held.
    pub fn put_seg_data(&mut self, idx: usize, storage: Storage, release: Option<ReleaseFn>)
        -> Result<()>
    {
        let seg = self.segs.get_mut(idx)
            .ok_or_else(|| Error::invalid(format!("no segment {}", idx)))?;
        seg.put_data(storage, release);
        Ok(())
    }

    /// The offset of a layer header recorded by the layer that built it.
    pub fn mark(&self) -> Option<usize> {
        self.mark
    }

    /// Record the offset of a header.
    pub fn set_mark(&mut self, offset: usize) {
        self.mark = Some(offset);
    }

    /// The ATM side-channel hint.
    pub fn hint(&self) -> Option<AtmHint> {
        self.hint
    }

    /// Attach the ATM side-channel hint.
    pub fn set_hint(&mut self, hint: AtmHint) {
        self.hint = Some(hint);
    }

    /// Read and clear the ATM side-channel hint.
    pub fn take_hint(&mut self) -> Option<AtmHint> {
        self.hint.take()
    }

    /// Copy all octets into one buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for seg in &self.segs {
            out.extend_from_slice(seg.as_slice());
        }
        out
    }

    /// Copy a range of octets, `None` if it is not contained in the packet.
    pub fn read_at(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        if offset + len > self.len() {
            return None;
        }
        let mut out = Vec::with_capacity(len);
        let mut start = 0;
        for seg in &self.segs {
            let data = seg.as_slice();
            let end = start + data.len();
            if end > offset && start < offset + len {
                let from = offset.max(start) - start;
                let to = (offset + len).min(end) - start;
                out.extend_from_slice(&data[from..to]);
            }
            start = end;
        }
        Some(out)
    }

    /// Overwrite octets at an offset, possibly spanning segments.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        if offset + data.len() > self.len() {
            return Err(Error::Fatal("write beyond the end of the packet"));
        }

        let end_at = offset + data.len();
        let mut start = 0;
        for seg in self.segs.iter_mut() {
            let end = start + seg.len();
            if end > offset && start < end_at {
                let from = offset.max(start);
                let to = end_at.min(end);
                let target = seg.make_mut();
                target[from - start..to - start].copy_from_slice(&data[from - offset..to - offset]);
            }
            start = end;
        }
        Ok(())
    }

    /// Build a packet viewing a range of this one.
    ///
    /// With `FragPolicy::Rand` the part of the range past the end is filled with random octets,
    /// otherwise such a range fails.
    pub fn get_frag(&mut self, offset: usize, len: usize, policy: FragPolicy) -> Result<Packet> {
        let total = self.len();
        if offset + len > total && policy == FragPolicy::Error {
            return Err(Error::invalid(format!(
                "fragment {}..{} escapes packet of {} octets", offset, offset + len, total)));
        }

        let mut frag = Packet::new();
        let end_at = offset + len;
        let mut start = 0;
        for seg in self.segs.iter_mut() {
            let end = start + seg.len();
            if end > offset && start < end_at {
                let from = offset.max(start) - start;
                let to = end_at.min(end) - start;
                let view = seg.share().slice(from..to);
                frag.append_seg(Segment::shared(view));
            }
            start = end;
        }

        if end_at > total {
            let missing = end_at - total.max(offset);
            let mut fill = vec![0; missing];
            rand::thread_rng().fill_bytes(&mut fill);
            frag.append_seg(Segment::owned(fill));
        }

        Ok(frag)
    }

    /// Split into packets of at most `mtu - extra_hdr_len` octets each.
    ///
    /// Every fragment views the octets of this packet. With `rand_fill` the last fragment is
    /// padded to the full fragment size with random octets.
    pub fn fragment(&mut self, mtu: usize, extra_hdr_len: usize, rand_fill: bool)
        -> Result<Vec<Packet>>
    {
        let chunk = mtu.checked_sub(extra_hdr_len)
            .filter(|&chunk| chunk > 0)
            .ok_or_else(|| Error::invalid(format!(
                "mtu {} leaves no room after {} header octets", mtu, extra_hdr_len)))?;

        let total = self.len();
        let mut frags = Vec::with_capacity(total / chunk + 1);
        let mut offset = 0;
        loop {
            let remaining = total - offset;
            let len = remaining.min(chunk);
            let (len, policy) = if rand_fill && len < chunk {
                (chunk, FragPolicy::Rand)
            } else {
                (len, FragPolicy::Error)
            };
            frags.push(self.get_frag(offset, len, policy)?);
            offset += len.min(remaining);
            if offset >= total {
                break;
            }
        }
        Ok(frags)
    }

    /// Call `f` for every segment until it fails.
    ///
    /// Returns the number of segments visited.
    pub fn for_each_seg<F>(&self, mut f: F) -> Result<usize>
        where F: FnMut(usize, &Segment) -> Result<()>
    {
        for (idx, seg) in self.segs.iter().enumerate() {
            f(idx, seg)?;
        }
        Ok(self.segs.len())
    }

    /// Fill an I/O vector with one entry per segment.
    ///
    /// Returns the number of entries used, fails with `TooSmall` if the vector is too short.
    pub fn segs_to_iov<'a>(&'a self, iov: &mut [IoSlice<'a>]) -> Result<usize> {
        if iov.len() < self.segs.len() {
            return Err(Error::TooSmall { needed: self.segs.len() });
        }
        for (slot, seg) in iov.iter_mut().zip(&self.segs) {
            *slot = IoSlice::new(seg.as_slice());
        }
        Ok(self.segs.len())
    }

    /// Move all segments of `other` to the end of this packet.
    pub fn concat(&mut self, mut other: Packet) {
        self.segs.extend(other.segs.drain(..));
    }
}

/// Call `f` for every packet until it fails.
///
/// Returns the number of packets visited.
pub fn iterate_packets<F>(packets: &mut [Packet], mut f: F) -> Result<usize>
    where F: FnMut(usize, &mut Packet) -> Result<()>
{
    for (idx, packet) in packets.iter_mut().enumerate() {
        f(idx, packet)?;
    }
    Ok(packets.len())
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len())
            .field("segs", &self.segs)
            .field("mark", &self.mark)
            .finish()
    }
}
