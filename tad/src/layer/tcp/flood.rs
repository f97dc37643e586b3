//! Advance a built TCP segment to the next sequence number.
//!
//! Flooding sends many segments that differ only in their sequence number, each one advanced by
//! the payload length of its predecessor. Instead of building every segment from the template,
//! the first frame is built once and then patched in place: the sequence number is rewritten and
//! the checksum updated incrementally, which yields the same octets as a full build.
use byteorder::{ByteOrder, NetworkEndian};

use crate::wire::checksum;
use crate::{Error, Result};

use super::{CHECKSUM_OFFSET, HEADER_LEN, SEQ_OFFSET};

/// Add `payload_len` to the sequence number of the segment at `tcp_offset`.
///
/// Returns the new sequence number.
pub fn advance(frame: &mut [u8], tcp_offset: usize, payload_len: u32) -> Result<u32> {
    if frame.len() < tcp_offset + HEADER_LEN {
        return Err(Error::invalid(format!(
            "frame of {} octets has no TCP header at {}", frame.len(), tcp_offset)));
    }
    let header = &mut frame[tcp_offset..];

    let old = NetworkEndian::read_u32(&header[SEQ_OFFSET..]);
    let new = old.wrapping_add(payload_len);
    NetworkEndian::write_u32(&mut header[SEQ_OFFSET..], new);

    let stored = NetworkEndian::read_u16(&header[CHECKSUM_OFFSET..]);
    NetworkEndian::write_u16(&mut header[CHECKSUM_OFFSET..], checksum::adjust32(stored, old, new));
    Ok(new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_frame() {
        let mut frame = [0; 30];
        assert!(matches!(advance(&mut frame, 14, 1), Err(Error::Invalid(_))));
    }

    #[test]
    fn wraps_around() {
        let mut frame = [0; 20];
        frame[4..8].copy_from_slice(&[0xff, 0xff, 0xff, 0xfe]);
        let sum = checksum::finish(checksum::data(&frame));
        frame[16..18].copy_from_slice(&sum.to_be_bytes());

        assert_eq!(advance(&mut frame, 0, 3).unwrap(), 1);
        assert_eq!(&frame[4..8], &[0, 0, 0, 1]);
        assert!(checksum::verifies(&frame));
    }
}
