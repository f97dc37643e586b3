//! Bit granular access to octet buffers.
//!
//! Bit offsets count from the most significant bit of the first octet. Integers are big-endian
//! with their most significant bit at the lowest bit index.

/// Read `len` bits, at most 64, starting at `bit_offset`.
///
/// Returns `None` if the range is not contained in the buffer.
pub fn read(buf: &[u8], bit_offset: usize, len: usize) -> Option<u64> {
    if len > 64 || bit_offset + len > buf.len() * 8 {
        return None;
    }

    let mut value = 0u64;
    for bit in bit_offset..bit_offset + len {
        let set = (buf[bit / 8] >> (7 - bit % 8)) & 1;
        value = (value << 1) | u64::from(set);
    }
    Some(value)
}

/// Write the low `len` bits of `value`, leaving all other bits of the buffer unchanged.
///
/// Returns `false`, without modifying anything, if the range is not contained in the buffer.
pub fn write(buf: &mut [u8], bit_offset: usize, len: usize, value: u64) -> bool {
    if len > 64 || bit_offset + len > buf.len() * 8 {
        return false;
    }

    for i in 0..len {
        let bit = bit_offset + i;
        let mask = 1u8 << (7 - bit % 8);
        if (value >> (len - 1 - i)) & 1 == 1 {
            buf[bit / 8] |= mask;
        } else {
            buf[bit / 8] &= !mask;
        }
    }
    true
}

/// Interpret up to eight octets as a big-endian integer.
pub fn be_int(bytes: &[u8]) -> Option<u64> {
    if bytes.len() > 8 {
        return None;
    }
    Some(bytes.iter().fold(0, |acc, &b| (acc << 8) | u64::from(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nibbles() {
        let mut buf = [0u8; 2];
        assert!(write(&mut buf, 0, 4, 4));
        assert!(write(&mut buf, 4, 4, 5));
        assert_eq!(buf[0], 0x45);
        assert_eq!(read(&buf, 0, 4), Some(4));
        assert_eq!(read(&buf, 4, 4), Some(5));
    }

    #[test]
    fn unaligned_span() {
        let mut buf = [0xffu8; 3];
        assert!(write(&mut buf, 3, 13, 0));
        assert_eq!(buf, [0xe0, 0x00, 0xff]);
        assert!(write(&mut buf, 3, 13, 0x1abc));
        assert_eq!(read(&buf, 3, 13), Some(0x1abc));
        assert_eq!(buf[2], 0xff);
    }

    #[test]
    fn out_of_range() {
        let mut buf = [0u8; 1];
        assert_eq!(read(&buf, 4, 5), None);
        assert!(!write(&mut buf, 7, 2, 3));
        assert_eq!(buf, [0]);
        assert_eq!(be_int(&[1, 2]), Some(0x0102));
        assert_eq!(be_int(&[0; 9]), None);
    }
}
