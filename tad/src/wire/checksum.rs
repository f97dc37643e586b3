//! The RFC 1071 internet checksum.
//!
//! All functions return the plain one's complement sum. The value stored in a header is the
//! complement of that, see [`finish`].
//!
//! [`finish`]: fn.finish.html
use byteorder::{ByteOrder, NetworkEndian};

fn propagate_carries(word: u32) -> u16 {
    let sum = (word >> 16) + (word & 0xffff);
    ((sum >> 16) as u16) + (sum as u16)
}

/// Compute an RFC 1071 compliant checksum (without the final complement).
pub fn data(mut data: &[u8]) -> u16 {
    let mut accum = 0;

    // For each 32-byte chunk...
    const CHUNK_SIZE: usize = 32;
    while data.len() >= CHUNK_SIZE {
        let mut d = &data[..CHUNK_SIZE];
        // ... take by 2 bytes and sum them.
        while d.len() >= 2 {
            accum += NetworkEndian::read_u16(d) as u32;
            d = &d[2..];
        }

        data = &data[CHUNK_SIZE..];
    }

    // Sum the rest that does not fit the last 32-byte chunk,
    // taking by 2 bytes.
    while data.len() >= 2 {
        accum += NetworkEndian::read_u16(data) as u32;
        data = &data[2..];
    }

    // Add the last remaining odd byte, if any.
    if let Some(&value) = data.first() {
        accum += (value as u32) << 8;
    }

    propagate_carries(accum)
}

/// Combine several RFC 1071 compliant checksums.
pub fn combine(checksums: &[u16]) -> u16 {
    let mut accum: u32 = 0;
    for &word in checksums {
        accum += word as u32;
    }
    propagate_carries(accum)
}

/// The value to store in a header checksum field.
pub fn finish(sum: u16) -> u16 {
    !sum
}

/// Add the two halves of a 32-bit word in one's complement.
pub fn fold16(word: u32) -> u16 {
    propagate_carries(word)
}

/// Compute the IPv4 pseudo header checksum.
pub fn pseudo_header_v4(src_addr: &[u8; 4], dst_addr: &[u8; 4], protocol: u8, length: u16) -> u16 {
    let mut proto_len = [0u8; 4];
    proto_len[1] = protocol;
    NetworkEndian::write_u16(&mut proto_len[2..4], length);

    combine(&[
        data(&src_addr[..]),
        data(&dst_addr[..]),
        data(&proto_len[..])
    ])
}

/// Compute the IPv6 pseudo header checksum.
pub fn pseudo_header_v6(src_addr: &[u8; 16], dst_addr: &[u8; 16], next_header: u8, length: u32)
    -> u16
{
    let mut proto_len = [0u8; 8];
    proto_len[7] = next_header;
    NetworkEndian::write_u32(&mut proto_len[0..4], length);

    combine(&[
        data(&src_addr[..]),
        data(&dst_addr[..]),
        data(&proto_len[..])
    ])
}

/// Incrementally update a stored checksum after a 16-bit word changed from `old` to `new`.
///
/// This is eqn. 3 of RFC 1624, `HC' = ~(~HC + ~m + m')`, which yields the same value as a full
/// recomputation.
pub fn adjust(stored: u16, old: u16, new: u16) -> u16 {
    !combine(&[!stored, !old, new])
}

/// Incrementally update a stored checksum after a 32-bit word changed from `old` to `new`.
pub fn adjust32(stored: u16, old: u32, new: u32) -> u16 {
    adjust(stored, fold16(old), fold16(new))
}

/// Query whether bytes containing their own checksum field verify.
pub fn verifies(bytes: &[u8]) -> bool {
    data(bytes) == !0
}

#[cfg(test)]
mod tests {
    use super::*;

    // Header from RFC 1071 examples and wikipedia.
    const IPV4_HEADER: [u8; 20] = [
        0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11,
        0xb8, 0x61, 0xc0, 0xa8, 0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
    ];

    #[test]
    fn header_verifies() {
        assert!(verifies(&IPV4_HEADER));
        let mut zeroed = IPV4_HEADER;
        zeroed[10] = 0;
        zeroed[11] = 0;
        assert_eq!(finish(data(&zeroed)), 0xb861);
    }

    #[test]
    fn odd_length() {
        assert_eq!(data(&[0x12, 0x34, 0x56]), 0x1234 + 0x5600);
        assert_eq!(data(&[]), 0);
    }

    #[test]
    fn fold() {
        assert_eq!(fold16(0x0001_0002), 3);
        assert_eq!(fold16(0xffff_0001), 1);
        assert_eq!(fold16(0xffff_ffff), 0xffff);
    }

    #[test]
    fn incremental_matches_recompute() {
        let mut bytes = [0u8; 24];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(37);
        }

        let mut seq = 0x1234_5678u32;
        NetworkEndian::write_u32(&mut bytes[4..8], seq);
        let mut stored = finish(data(&bytes));

        for step in [1u32, 1460, 0xffff, 0x8000_0000, 7] {
            let next = seq.wrapping_add(step);
            NetworkEndian::write_u32(&mut bytes[4..8], next);
            stored = adjust32(stored, seq, next);
            assert_eq!(stored, finish(data(&bytes)));
            seq = next;
        }
    }

    #[test]
    fn pseudo_headers() {
        let v4 = pseudo_header_v4(&[10, 0, 0, 1], &[10, 0, 0, 2], 17, 12);
        assert_eq!(v4, combine(&[0x0a00, 0x0001, 0x0a00, 0x0002, 0x0011, 0x000c]));

        let mut src = [0u8; 16];
        src[15] = 1;
        let v6 = pseudo_header_v6(&src, &src, 58, 64);
        assert_eq!(v6, combine(&[1, 1, 58, 64]));
    }
}
