//! The CRC-32 of the AAL5 CPCS trailer.
//!
//! Generator polynomial `x^32 + x^26 + x^23 + x^22 + x^16 + x^12 + x^11 + x^10 + x^8 + x^7 + x^5 +
//! x^4 + x^2 + x + 1`, processed most significant bit first without reflection. The register is
//! seeded with [`INIT`] and the final value is inverted before it is stored.
//!
//! [`INIT`]: constant.INIT.html

/// The generator polynomial in normal representation.
pub const POLYNOMIAL: u32 = 0x04C1_1DB7;

/// The initial register value.
pub const INIT: u32 = 0xFFFF_FFFF;

const TABLE: [u32; 256] = make_table();

const fn make_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut idx = 0;
    while idx < 256 {
        let mut crc = (idx as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[idx] = crc;
        idx += 1;
    }
    table
}

/// Feed bytes into a running (not inverted) register.
pub fn update(mut crc: u32, data: &[u8]) -> u32 {
    for &byte in data {
        let idx = ((crc >> 24) as u8 ^ byte) as usize;
        crc = (crc << 8) ^ TABLE[idx];
    }
    crc
}

/// Compute the stored CRC over a contiguous buffer.
pub fn checksum(data: &[u8]) -> u32 {
    !update(INIT, data)
}

/// Compute the stored CRC over a sequence of buffers.
pub fn checksum_iter<'a>(chunks: impl IntoIterator<Item=&'a [u8]>) -> u32 {
    !chunks.into_iter().fold(INIT, update)
}
